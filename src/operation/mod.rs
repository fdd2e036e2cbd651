//! Command/response plumbing the dispatcher ([`crate::client::executor`]) drives: the
//! [`Operation`] trait every command type implements, and the response envelopes shared across
//! find/aggregate/write commands.

mod aggregate;
mod delete;
mod find;
mod find_and_modify;
mod get_more;
mod insert;
mod kill_cursors;
mod run_command;
mod update;

pub use aggregate::{Aggregate, AggregateOptions, AggregateTarget};
pub use delete::{Delete, DeleteOptions};
pub use find::{CursorType, Find, FindOptions};
pub use find_and_modify::{FindAndModify, FindAndModifyOptions};
pub use get_more::GetMore;
pub use insert::{Insert, InsertOptions};
pub use kill_cursors::KillCursors;
pub use run_command::RunCommand;
pub use update::{Update, UpdateOptions};

use std::collections::VecDeque;
use std::ops::Deref;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

use crate::bson::{Bson, Document, Timestamp};
use crate::client::ClusterTime;
use crate::cmap::{Command, RawCommandResponse, StreamDescription};
use crate::coll::Namespace;
use crate::concern::{ReadConcern, WriteConcern};
use crate::error::{Error, ErrorKind, Result, WriteConcernError, WriteError, WriteFailure};
use crate::selection_criteria::SelectionCriteria;

/// The wire version a server advertises once it's running MongoDB 4.4+, the first release that
/// echoes a find/aggregate's `comment` back on every subsequent `getMore`.
pub(crate) const SERVER_4_4_0_WIRE_VERSION: i32 = 9;

/// How retryable a particular operation is, per the retryable-reads/retryable-writes split
/// (spec.md §4.5): reads and writes are triggered by different error classifications and are
/// tracked separately on the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retryability {
    Read,
    Write,
    None,
}

/// The operation-type classification the server selector needs (spec.md §4.4): write and
/// aggregate-with-write operations are subject to selection rules plain reads aren't, namely the
/// aggregate-with-write override rule implemented in
/// [`crate::sdam::TopologyDescription::suitable_servers_in_latency_window`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationType {
    Read,
    Write,
    AggregateWithWrite,
}

/// Models a single server-side command: how to build it, how to interpret its reply, and whether
/// it should be retried. The dispatcher ([`crate::client::executor::execute`]) is generic over
/// this trait rather than hardcoding per-command logic.
pub trait Operation {
    /// The operation's output, once `handle_response` has interpreted the reply.
    type O;

    /// The command document's first key, e.g. `"find"`.
    const NAME: &'static str;

    /// Builds the command to send, given the stream description of the connection it'll go out
    /// on (some fields, like comment propagation, are gated on the server's wire version).
    fn build(&mut self, description: &StreamDescription) -> Result<Command>;

    /// Interprets a successful (`ok: 1`) reply.
    fn handle_response(
        &self,
        response: RawCommandResponse,
        description: &StreamDescription,
    ) -> Result<Self::O>;

    /// Gives an operation a chance to recover from an error that would otherwise be surfaced.
    /// Every operation but `killCursors` (which swallows its own failures) just propagates.
    fn handle_error(&self, error: Error) -> Result<Self::O> {
        Err(error)
    }

    fn selection_criteria(&self) -> Option<&SelectionCriteria> {
        None
    }

    fn write_concern(&self) -> Option<&WriteConcern> {
        None
    }

    /// The read concern this operation was built with, if any. Only consulted by the dispatcher
    /// when [`Operation::supports_read_concern`] is true for the connection the command goes out
    /// on.
    fn read_concern(&self) -> Option<&ReadConcern> {
        None
    }

    fn is_acknowledged(&self) -> bool {
        self.write_concern().map(WriteConcern::is_acknowledged).unwrap_or(true)
    }

    /// Whether this command accepts a `readConcern` field. Write commands and `getMore` do not.
    fn supports_read_concern(&self, _description: &StreamDescription) -> bool {
        false
    }

    fn retryability(&self) -> Retryability {
        Retryability::None
    }

    /// Classifies the operation for server selection (spec.md §4.4). Defaults to `Read`, which is
    /// correct for every command that isn't a write or an aggregate possibly ending in `$out`/
    /// `$merge`.
    fn operation_type(&self) -> OperationType {
        OperationType::Read
    }

    /// Lets a retrying operation adjust its built command before a replay. Most operations need
    /// nothing (a retryable write reuses the same transaction number, which `build` already set);
    /// this exists for the rare case a retry needs different framing than the first attempt.
    fn update_for_retry(&mut self) {}

    fn name(&self) -> &str {
        Self::NAME
    }
}

fn bson_is_ok(ok: &Bson) -> bool {
    match ok {
        Bson::Double(d) => *d == 1.0,
        Bson::Int32(i) => *i == 1,
        Bson::Int64(i) => *i == 1,
        Bson::Boolean(b) => *b,
        _ => false,
    }
}

/// A command reply, generic over its command-specific body `T`: the envelope fields (`ok`,
/// `$clusterTime`, `operationTime`) every reply carries, plus `T` flattened in alongside them.
#[derive(Debug, Deserialize)]
pub struct CommandResponse<T> {
    pub ok: Bson,

    #[serde(rename = "$clusterTime")]
    pub cluster_time: Option<ClusterTime>,

    #[serde(rename = "operationTime")]
    pub operation_time: Option<Timestamp>,

    #[serde(flatten)]
    pub body: T,
}

impl<T> CommandResponse<T> {
    pub fn is_success(&self) -> bool {
        bson_is_ok(&self.ok)
    }
}

impl<T: DeserializeOwned> CommandResponse<T> {
    pub fn from_raw(raw: &RawCommandResponse) -> Result<Self> {
        raw.body()
    }
}

/// A response body useful for deserializing command errors (`ok: 0`).
#[derive(Debug, Deserialize)]
pub struct CommandErrorBody {
    #[serde(rename = "errorLabels")]
    pub error_labels: Option<Vec<String>>,

    #[serde(flatten)]
    pub command_error: crate::error::CommandError,
}

impl From<CommandErrorBody> for Error {
    fn from(body: CommandErrorBody) -> Error {
        Error::new(ErrorKind::Command(body.command_error))
            .with_labels(body.error_labels.unwrap_or_default())
    }
}

/// An empty command-specific body, for commands (`killCursors`, `findAndModify`'s ack-only path)
/// whose only interesting content is in the shared envelope.
#[derive(Debug, Default, Deserialize)]
pub struct EmptyBody {}

/// The part of a write command's reply concerned only with write concern acknowledgement, not
/// per-document write errors.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WriteConcernOnlyBody {
    #[serde(rename = "writeConcernError")]
    pub write_concern_error: Option<WriteConcernError>,

    #[serde(rename = "errorLabels")]
    pub labels: Option<Vec<String>>,
}

impl WriteConcernOnlyBody {
    pub(crate) fn validate(&self) -> Result<()> {
        match &self.write_concern_error {
            Some(wc_error) => Err(Error::new(ErrorKind::Write(WriteFailure::WriteConcernError(
                wc_error.clone(),
            )))
            .with_labels(self.labels.clone().unwrap_or_default())),
            None => Ok(()),
        }
    }
}

/// The reply body shared by insert/update/delete/findAndModify: an affected-count `n`, plus
/// whatever per-document write errors and write-concern errors accompanied it.
#[derive(Debug, Deserialize)]
pub struct WriteResponseBody<T = EmptyBody> {
    #[serde(flatten)]
    body: T,

    n: u64,

    #[serde(rename = "writeErrors")]
    write_errors: Option<Vec<WriteError>>,

    #[serde(flatten)]
    write_concern_info: WriteConcernOnlyBody,
}

impl<T> WriteResponseBody<T> {
    pub fn n(&self) -> u64 {
        self.n
    }

    /// Surfaces the first write error, if any, else falls through to the write-concern-only
    /// check. The crate doesn't accumulate a bulk-write failure report across every failed
    /// document (out of scope for this crate's narrowed write path) — the first error is enough
    /// to classify and, if eligible, retry the whole command.
    pub(crate) fn validate(&self) -> Result<()> {
        if let Some(first) = self.write_errors.as_ref().and_then(|errs| errs.first()) {
            return Err(Error::new(ErrorKind::Write(WriteFailure::WriteError(first.clone())))
                .with_labels(self.write_concern_info.labels.clone().unwrap_or_default()));
        }
        self.write_concern_info.validate()
    }
}

impl<T> Deref for WriteResponseBody<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.body
    }
}

/// The `cursor` subdocument shared by `find`/`aggregate`'s initial reply and `getMore`'s reply:
/// `firstBatch`/`nextBatch` are really the same field at two different points in a cursor's life,
/// so this unifies them into one `batch`.
#[derive(Debug, Clone)]
pub struct CursorInfo {
    pub id: i64,
    pub ns: Namespace,
    pub batch: VecDeque<Document>,
    pub at_cluster_time: Option<Timestamp>,
    pub post_batch_resume_token: Option<Document>,
}

impl<'de> Deserialize<'de> for CursorInfo {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Raw {
            id: i64,
            ns: Namespace,
            first_batch: Option<VecDeque<Document>>,
            next_batch: Option<VecDeque<Document>>,
            at_cluster_time: Option<Timestamp>,
            post_batch_resume_token: Option<Document>,
        }

        let raw = Raw::deserialize(deserializer)?;
        Ok(CursorInfo {
            id: raw.id,
            ns: raw.ns,
            batch: raw.first_batch.or(raw.next_batch).unwrap_or_default(),
            at_cluster_time: raw.at_cluster_time,
            post_batch_resume_token: raw.post_batch_resume_token,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct CursorBody {
    pub cursor: CursorInfo,

    #[serde(flatten)]
    write_concern_info: WriteConcernOnlyBody,
}

impl CursorBody {
    pub(crate) fn validate(&self) -> Result<()> {
        self.write_concern_info.validate()
    }
}

/// A reply to a command that returns a cursor (`find`, `aggregate`, `getMore`).
pub type CursorResponse = CommandResponse<CursorBody>;

/// Flattens `options` (if any) into `doc`. `options` must serialize to a BSON document at its top
/// level; anything else is a programmer error in the calling operation.
pub fn append_options<T: Serialize>(doc: &mut Document, options: Option<&T>) -> Result<()> {
    let Some(options) = options else {
        return Ok(());
    };
    match crate::bson::to_bson(options)? {
        Bson::Document(d) => {
            for (k, v) in d {
                doc.insert(k, v);
            }
            Ok(())
        }
        other => Err(ErrorKind::Internal {
            message: format!("options did not serialize to a document: {other:?}"),
        }
        .into()),
    }
}

/// Parses a raw reply into `CommandResponse<T>`, surfacing a [`CommandErrorBody`]-shaped error
/// if the command failed (`ok: 0`) rather than attempting (and likely failing) to deserialize
/// `T` from an error body.
pub fn deserialize_command_response<T: DeserializeOwned>(
    raw: &RawCommandResponse,
) -> Result<CommandResponse<T>> {
    let ok = raw.document().get("ok").cloned().ok_or_else(|| {
        Error::new(ErrorKind::InvalidResponse {
            message: "reply is missing an \"ok\" field".into(),
        })
    })?;
    if !bson_is_ok(&ok) {
        let error_body: CommandErrorBody = raw.body()?;
        return Err(error_body.into());
    }
    raw.body()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn write_response_body_surfaces_first_write_error() {
        let mut doc = Document::new();
        doc.insert("n", 0i64);
        doc.insert(
            "writeErrors",
            vec![{
                let mut e = Document::new();
                e.insert("index", 0i64);
                e.insert("code", 11000);
                e.insert("errmsg", "duplicate key");
                Bson::Document(e)
            }],
        );
        let body: WriteResponseBody = crate::bson::from_document(doc).unwrap();
        assert!(body.validate().is_err());
    }

    #[test]
    fn write_response_body_ok_when_no_errors() {
        let mut doc = Document::new();
        doc.insert("n", 1i64);
        let body: WriteResponseBody = crate::bson::from_document(doc).unwrap();
        assert!(body.validate().is_ok());
        assert_eq!(body.n(), 1);
    }
}
