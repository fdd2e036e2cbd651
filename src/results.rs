//! Typed results for the write/getMore operations ([`crate::operation`]), assembled from each
//! command's reply body.

use std::collections::HashMap;
use std::collections::VecDeque;

use crate::bson::{Bson, Document, Timestamp};
use crate::coll::Namespace;

/// The result of an `insert` command, whether it carried one document or many: the `_id` the
/// driver assigned (or the server echoed back) for each document, keyed by its position in the
/// batch that was sent.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertManyResult {
    pub inserted_ids: HashMap<usize, Bson>,
}

/// The result of an `update` (or `findAndModify` update) command.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateResult {
    pub matched_count: u64,
    pub modified_count: u64,
    pub upserted_id: Option<Bson>,
}

/// The result of a `delete` command.
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteResult {
    pub deleted_count: u64,
}

/// A decoded `getMore` reply: the next batch, the cursor's (possibly now-zero) id, and whatever
/// resume-token material accompanied it.
#[derive(Debug, Clone)]
pub struct GetMoreResult {
    pub batch: VecDeque<Document>,
    pub id: i64,
    pub ns: Namespace,
    pub at_cluster_time: Option<Timestamp>,
    pub post_batch_resume_token: Option<Document>,
}

impl GetMoreResult {
    pub fn exhausted(&self) -> bool {
        self.id == 0
    }
}
