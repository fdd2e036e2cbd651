//! Options accepted by a `watch` call that opens a [`ChangeStream`](super::ChangeStream).

use std::time::Duration;

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::bson::Document;
use crate::change_stream::event::ResumeToken;
use crate::concern::ReadConcern;
use crate::operation::AggregateOptions;
use crate::selection_criteria::SelectionCriteria;

/// Options accepted when opening a change stream (spec.md §4.7's initial-options list).
#[derive(Debug, Default, Clone, TypedBuilder, Serialize)]
#[builder(field_defaults(default, setter(into, strip_option)))]
#[serde(rename_all = "camelCase")]
pub struct ChangeStreamOptions {
    pub full_document: Option<FullDocumentType>,
    pub full_document_before_change: Option<FullDocumentBeforeChangeType>,

    /// Resumes after the given token. Mutually exclusive with `start_after`; enforced at watch
    /// time, not here, since the exclusivity rule needs both fields read together.
    pub resume_after: Option<ResumeToken>,

    #[serde(rename = "startAtOperationTime")]
    pub start_at_operation_time: Option<crate::bson::Timestamp>,

    pub start_after: Option<ResumeToken>,

    #[serde(skip)]
    pub max_await_time: Option<Duration>,

    #[serde(skip)]
    pub batch_size: Option<u32>,

    #[serde(skip)]
    pub collation: Option<Document>,

    #[serde(skip)]
    pub read_concern: Option<ReadConcern>,

    #[serde(skip)]
    pub selection_criteria: Option<SelectionCriteria>,

    pub comment: Option<String>,
}

impl ChangeStreamOptions {
    /// How many of `resume_after`/`start_after`/`start_at_operation_time` the caller set. The
    /// `$changeStream` stage may carry at most one of the three (spec.md §4.7's per-reissuance
    /// invariant applies just as much to the very first aggregate that opens the stream).
    pub(crate) fn resume_option_count(&self) -> usize {
        [
            self.resume_after.is_some(),
            self.start_after.is_some(),
            self.start_at_operation_time.is_some(),
        ]
        .into_iter()
        .filter(|set| *set)
        .count()
    }

    pub(crate) fn aggregate_options(&self) -> AggregateOptions {
        AggregateOptions::builder()
            .batch_size(self.batch_size)
            .max_await_time(self.max_await_time)
            .collation(self.collation.clone())
            .read_concern(self.read_concern.clone())
            .selection_criteria(self.selection_criteria.clone())
            .comment(self.comment.clone())
            .build()
    }
}

/// Configures how a change event's `full_document` field is populated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub enum FullDocumentType {
    Default,
    UpdateLookup,
    WhenAvailable,
    Required,
}

/// Configures how a change event's `full_document_before_change` field is populated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub enum FullDocumentBeforeChangeType {
    WhenAvailable,
    Required,
    Off,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn resume_option_count_is_zero_by_default() {
        let opts = ChangeStreamOptions::default();
        assert_eq!(opts.resume_option_count(), 0);
    }

    #[test]
    fn resume_option_count_counts_resume_after() {
        let opts = ChangeStreamOptions::builder()
            .resume_after(ResumeToken::parse(Document::new()))
            .build();
        assert_eq!(opts.resume_option_count(), 1);
    }
}
