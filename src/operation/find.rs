use std::time::Duration;

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::bson::Document;
use crate::cmap::{Command, RawCommandResponse, StreamDescription};
use crate::coll::Namespace;
use crate::concern::ReadConcern;
use crate::cursor::CursorSpecification;
use crate::error::{ErrorKind, Result};
use crate::selection_criteria::SelectionCriteria;

use super::{append_options, deserialize_command_response, CursorBody, Operation, Retryability, SERVER_4_4_0_WIRE_VERSION};

/// The kind of cursor a `find` should open, per spec.md §4.6's tailable/await flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CursorType {
    NonTailable,
    Tailable,
    TailableAwait,
}

#[derive(Debug, Default, Clone, TypedBuilder, Serialize)]
#[builder(field_defaults(default, setter(into, strip_option)))]
#[serde(rename_all = "camelCase")]
pub struct FindOptions {
    pub allow_partial_results: Option<bool>,
    pub batch_size: Option<u32>,
    pub comment: Option<String>,

    #[serde(skip)]
    pub cursor_type: Option<CursorType>,

    pub hint: Option<Document>,
    pub limit: Option<i64>,
    pub max: Option<Document>,

    #[serde(skip)]
    pub max_await_time: Option<Duration>,

    #[serde(
        rename = "maxTimeMS",
        serialize_with = "crate::serde_util::serialize_duration_option_as_int_millis"
    )]
    pub max_time: Option<Duration>,

    pub min: Option<Document>,
    pub no_cursor_timeout: Option<bool>,
    pub projection: Option<Document>,
    pub return_key: Option<bool>,
    pub show_record_id: Option<bool>,
    pub skip: Option<i64>,
    pub sort: Option<Document>,

    #[serde(skip)]
    pub read_concern: Option<ReadConcern>,

    #[serde(skip)]
    pub selection_criteria: Option<SelectionCriteria>,
}

/// A `find` command: the initiating command of a query cursor.
#[derive(Debug)]
pub struct Find {
    ns: Namespace,
    filter: Document,
    options: Option<FindOptions>,
}

impl Find {
    pub fn new(ns: Namespace, filter: Document, options: Option<FindOptions>) -> Self {
        Self { ns, filter, options }
    }
}

impl Operation for Find {
    type O = CursorSpecification;
    const NAME: &'static str = "find";

    fn build(&mut self, _description: &StreamDescription) -> Result<Command> {
        let mut body = Document::new();
        body.insert(Self::NAME, self.ns.coll.clone());

        if let Some(ref options) = self.options {
            // Negative limits are interpreted as a request for a single batch, per the CRUD spec.
            if options.limit.map(|limit| limit < 0) == Some(true) {
                body.insert("singleBatch", true);
            }

            if options.batch_size.map(|b| b > i32::MAX as u32) == Some(true) {
                return Err(ErrorKind::InvalidArgument {
                    message: "the batch size must fit into a signed 32-bit integer".to_string(),
                }
                .into());
            }

            match options.cursor_type {
                Some(CursorType::Tailable) => {
                    body.insert("tailable", true);
                }
                Some(CursorType::TailableAwait) => {
                    body.insert("tailable", true);
                    body.insert("awaitData", true);
                }
                _ => {}
            }
        }

        append_options(&mut body, self.options.as_ref())?;
        body.insert("filter", self.filter.clone());

        Ok(Command::new(Self::NAME, self.ns.db.clone(), body))
    }

    fn handle_response(&self, raw: RawCommandResponse, description: &StreamDescription) -> Result<Self::O> {
        let address = raw.source.clone();
        let response = deserialize_command_response::<CursorBody>(&raw)?;
        response.body.validate()?;

        // The comment is only propagated to getMore calls on 4.4+.
        let comment = if description.max_wire_version.unwrap_or(0) < SERVER_4_4_0_WIRE_VERSION {
            None
        } else {
            self.options.as_ref().and_then(|opts| opts.comment.clone())
        };

        Ok(CursorSpecification::new(
            response.body.cursor,
            address,
            self.options.as_ref().and_then(|opts| opts.batch_size),
            self.options.as_ref().and_then(|opts| opts.max_await_time),
            comment,
        ))
    }

    fn selection_criteria(&self) -> Option<&SelectionCriteria> {
        self.options.as_ref().and_then(|opts| opts.selection_criteria.as_ref())
    }

    fn read_concern(&self) -> Option<&ReadConcern> {
        self.options.as_ref().and_then(|opts| opts.read_concern.as_ref())
    }

    fn supports_read_concern(&self, _description: &StreamDescription) -> bool {
        true
    }

    fn retryability(&self) -> Retryability {
        Retryability::Read
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn negative_limit_requests_single_batch() {
        let ns = Namespace::new("db", "coll");
        let mut op = Find::new(
            ns,
            Document::new(),
            Some(FindOptions::builder().limit(-5).build()),
        );
        let description = StreamDescription::default();
        let command = op.build(&description).unwrap();
        assert_eq!(command.body.get_bool("singleBatch"), Some(true));
    }

    #[test]
    fn oversized_batch_size_is_rejected() {
        let ns = Namespace::new("db", "coll");
        let mut op = Find::new(
            ns,
            Document::new(),
            Some(FindOptions::builder().batch_size(u32::MAX).build()),
        );
        let description = StreamDescription::default();
        assert!(op.build(&description).is_err());
    }
}
