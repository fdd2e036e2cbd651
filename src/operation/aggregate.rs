use std::time::Duration;

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::bson::Document;
use crate::cmap::{Command, RawCommandResponse, StreamDescription};
use crate::coll::Namespace;
use crate::concern::{ReadConcern, WriteConcern};
use crate::cursor::CursorSpecification;
use crate::error::Result;
use crate::selection_criteria::SelectionCriteria;

use super::{append_options, deserialize_command_response, CursorBody, Operation, OperationType, Retryability};

/// What an `aggregate` runs against: a whole database (for `$currentOp`/`$listLocalSessions`-style
/// admin pipelines) or a single collection.
#[derive(Debug, Clone)]
pub enum AggregateTarget {
    Database(String),
    Collection(Namespace),
}

impl AggregateTarget {
    fn to_bson(&self) -> crate::bson::Bson {
        match self {
            AggregateTarget::Database(_) => crate::bson::Bson::Int32(1),
            AggregateTarget::Collection(ns) => crate::bson::Bson::String(ns.coll.clone()),
        }
    }

    fn db_name(&self) -> String {
        match self {
            AggregateTarget::Database(db) => db.clone(),
            AggregateTarget::Collection(ns) => ns.db.clone(),
        }
    }
}

impl From<Namespace> for AggregateTarget {
    fn from(ns: Namespace) -> Self {
        AggregateTarget::Collection(ns)
    }
}

#[derive(Debug, Default, Clone, TypedBuilder, Serialize)]
#[builder(field_defaults(default, setter(into, strip_option)))]
#[serde(rename_all = "camelCase")]
pub struct AggregateOptions {
    pub allow_disk_use: Option<bool>,

    #[serde(skip)]
    pub batch_size: Option<u32>,

    pub bypass_document_validation: Option<bool>,
    pub comment: Option<String>,
    pub hint: Option<Document>,
    pub collation: Option<Document>,

    #[serde(
        rename = "maxTimeMS",
        serialize_with = "crate::serde_util::serialize_duration_option_as_int_millis"
    )]
    pub max_time: Option<Duration>,

    /// How long a `getMore` against this cursor may block waiting for new results, for a tailable
    /// pipeline (a `$changeStream` aggregation). Not part of the `aggregate` command itself — fed
    /// into the opened cursor's `maxTimeMS` instead, same split as `FindOptions::max_await_time`.
    #[serde(skip)]
    pub max_await_time: Option<Duration>,

    #[serde(skip)]
    pub read_concern: Option<ReadConcern>,

    #[serde(skip)]
    pub write_concern: Option<WriteConcern>,

    #[serde(skip)]
    pub selection_criteria: Option<SelectionCriteria>,
}

/// An `aggregate` command: the initiating command of an aggregation pipeline's result cursor.
///
/// Unlike `find`, a pipeline ending in `$out`/`$merge` writes rather than reads, so it's neither
/// retryable nor given a `batchSize` (the server rejects one on those pipelines).
#[derive(Debug)]
pub struct Aggregate {
    target: AggregateTarget,
    pipeline: Vec<Document>,
    options: Option<AggregateOptions>,
}

impl Aggregate {
    pub fn new(
        target: impl Into<AggregateTarget>,
        pipeline: impl IntoIterator<Item = Document>,
        options: Option<AggregateOptions>,
    ) -> Self {
        Self {
            target: target.into(),
            pipeline: pipeline.into_iter().collect(),
            options,
        }
    }

    fn is_out_or_merge(&self) -> bool {
        self.pipeline
            .last()
            .and_then(|stage| stage.keys().next())
            .map(|key| key == "$out" || key == "$merge")
            .unwrap_or(false)
    }
}

impl Operation for Aggregate {
    type O = CursorSpecification;
    const NAME: &'static str = "aggregate";

    fn build(&mut self, _description: &StreamDescription) -> Result<Command> {
        let mut body = Document::new();
        body.insert(Self::NAME, self.target.to_bson());
        body.insert(
            "pipeline",
            self.pipeline
                .iter()
                .cloned()
                .map(crate::bson::Bson::Document)
                .collect::<Vec<_>>(),
        );

        let mut cursor = Document::new();
        if !self.is_out_or_merge() {
            if let Some(batch_size) = self.options.as_ref().and_then(|opts| opts.batch_size) {
                cursor.insert("batchSize", batch_size as i32);
            }
        }
        body.insert("cursor", cursor);

        append_options(&mut body, self.options.as_ref())?;

        Ok(Command::new(Self::NAME, self.target.db_name(), body))
    }

    fn handle_response(&self, raw: RawCommandResponse, _description: &StreamDescription) -> Result<Self::O> {
        let address = raw.source.clone();
        let response = deserialize_command_response::<CursorBody>(&raw)?;
        response.body.validate()?;
        let operation_time = response.operation_time;

        Ok(CursorSpecification::new(
            response.body.cursor,
            address,
            self.options.as_ref().and_then(|opts| opts.batch_size),
            self.options.as_ref().and_then(|opts| opts.max_await_time),
            self.options.as_ref().and_then(|opts| opts.comment.clone()),
        )
        .with_operation_time(operation_time))
    }

    fn selection_criteria(&self) -> Option<&SelectionCriteria> {
        self.options.as_ref().and_then(|opts| opts.selection_criteria.as_ref())
    }

    fn read_concern(&self) -> Option<&ReadConcern> {
        self.options.as_ref().and_then(|opts| opts.read_concern.as_ref())
    }

    fn write_concern(&self) -> Option<&WriteConcern> {
        if self.is_out_or_merge() {
            self.options.as_ref().and_then(|opts| opts.write_concern.as_ref())
        } else {
            None
        }
    }

    fn supports_read_concern(&self, _description: &StreamDescription) -> bool {
        !self.is_out_or_merge()
    }

    fn retryability(&self) -> Retryability {
        if self.is_out_or_merge() {
            Retryability::None
        } else {
            Retryability::Read
        }
    }

    fn operation_type(&self) -> OperationType {
        if self.is_out_or_merge() {
            OperationType::AggregateWithWrite
        } else {
            OperationType::Read
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn doc_with_key(key: &str) -> Document {
        let mut d = Document::new();
        d.insert(key, 1);
        d
    }

    #[test]
    fn cursor_subdocument_carries_batch_size() {
        let ns = Namespace::new("db", "coll");
        let mut op = Aggregate::new(
            ns,
            vec![doc_with_key("$match")],
            Some(AggregateOptions::builder().batch_size(25u32).build()),
        );
        let description = StreamDescription::default();
        let command = op.build(&description).unwrap();
        let cursor = command.body.get_document("cursor").unwrap();
        assert_eq!(cursor.get_i64("batchSize").map(|v| v as i32), Some(25));
    }

    #[test]
    fn out_stage_omits_batch_size_and_is_not_retryable() {
        let ns = Namespace::new("db", "coll");
        let mut op = Aggregate::new(
            ns,
            vec![doc_with_key("$out")],
            Some(AggregateOptions::builder().batch_size(25u32).build()),
        );
        assert_eq!(op.retryability(), Retryability::None);
        let description = StreamDescription::default();
        let command = op.build(&description).unwrap();
        let cursor = command.body.get_document("cursor").unwrap();
        assert!(!cursor.contains_key("batchSize"));
    }

    #[test]
    fn non_out_pipeline_is_retryable() {
        let ns = Namespace::new("db", "coll");
        let op = Aggregate::new(ns, vec![doc_with_key("$match")], None);
        assert_eq!(op.retryability(), Retryability::Read);
    }
}
