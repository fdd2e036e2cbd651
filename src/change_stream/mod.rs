//! Change streams: a cursor running a `[{$changeStream: <opts>}, ...user stages]` pipeline that
//! resumes itself once, transparently, across a resumable error (spec.md §4.7).

pub mod event;
pub mod options;

use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_core::Stream;
use futures_util::future::BoxFuture;
use serde::de::DeserializeOwned;

use crate::bson::{Bson, Document, Timestamp};
use crate::change_stream::event::{ChangeStreamEvent, ResumeToken};
use crate::change_stream::options::ChangeStreamOptions;
use crate::client::Client;
use crate::coll::Namespace;
use crate::cursor::{Cursor, CursorSpecification};
use crate::error::{ErrorKind, Result};
use crate::operation::{Aggregate, AggregateTarget};

/// What a change stream watches: a single collection, or every collection in a database.
/// Whole-deployment (`allChangesForCluster`) watches are out of scope (see DESIGN.md).
#[derive(Debug, Clone)]
pub enum ChangeStreamTarget {
    Collection(Namespace),
    Database(String),
}

impl From<ChangeStreamTarget> for AggregateTarget {
    fn from(target: ChangeStreamTarget) -> Self {
        match target {
            ChangeStreamTarget::Collection(ns) => AggregateTarget::Collection(ns),
            ChangeStreamTarget::Database(db) => AggregateTarget::Database(db),
        }
    }
}

enum ResumeState {
    Idle,
    Resuming(BoxFuture<'static, Result<CursorSpecification>>),
}

/// A resumable cursor over a `$changeStream` pipeline's events. Automatically reissues the
/// aggregate once across a resumable getMore error (network errors, the
/// `ResumableChangeStreamError` label, or the pre-4.4 code allow-list — see
/// [`crate::error::Error::is_resumable`]), then surfaces any further failure as-is.
///
/// Yields [`ChangeStreamEvent<T>`], deserializing the `fullDocument` field (when present) as `T`;
/// defaults to a raw [`Document`] when the caller doesn't care about its shape.
pub struct ChangeStream<T = Document> {
    cursor: Cursor,
    client: Client,
    /// The user-supplied pipeline stages, without the `$changeStream` stage this type prepends.
    pipeline: Vec<Document>,
    target: ChangeStreamTarget,
    /// The options the stream was opened with; reused unchanged on every resume except for the
    /// resume-point field, which is recomputed from the tracked token each time.
    base_options: ChangeStreamOptions,
    resume_token: Option<ResumeToken>,
    /// Whether at least one document has been iterated since the stream (or its latest resume)
    /// opened — governs which resume-point field an automatic resume selects, per spec.md §4.7.
    document_returned: bool,
    /// The server's `operationTime` from the most recent aggregate reply, used as a last-resort
    /// resume point when no token has ever been observed.
    operation_time: Option<Timestamp>,
    original_used_start_after: bool,
    resume_attempted: bool,
    resume_state: ResumeState,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ChangeStream<T>
where
    T: DeserializeOwned,
{
    /// Opens a change stream over `target`, running `[{$changeStream: <options>}, ...pipeline]`.
    pub async fn new(
        client: Client,
        target: ChangeStreamTarget,
        pipeline: Vec<Document>,
        options: Option<ChangeStreamOptions>,
    ) -> Result<Self> {
        let options = options.unwrap_or_default();
        if options.resume_option_count() > 1 {
            return Err(ErrorKind::InvalidArgument {
                message: "at most one of resumeAfter, startAfter, and startAtOperationTime may be \
                          set"
                    .to_string(),
            }
            .into());
        }
        let original_used_start_after = options.start_after.is_some();

        let stage = build_change_stream_stage(&options, initial_resume_field(&options))?;
        let mut full_pipeline = Vec::with_capacity(pipeline.len() + 1);
        full_pipeline.push(stage);
        full_pipeline.extend(pipeline.iter().cloned());

        let mut op = Aggregate::new(
            AggregateTarget::from(target.clone()),
            full_pipeline,
            Some(options.aggregate_options()),
        );
        let spec = client.execute_operation(&mut op, None).await?;

        let resume_token = spec.post_batch_resume_token().cloned().map(ResumeToken);
        let operation_time = if resume_token.is_none() {
            spec.operation_time()
        } else {
            None
        };
        let cursor = Cursor::new(client.clone(), spec);

        Ok(Self {
            cursor,
            client,
            pipeline,
            target,
            base_options: options,
            resume_token,
            document_returned: false,
            operation_time,
            original_used_start_after,
            resume_attempted: false,
            resume_state: ResumeState::Idle,
            _marker: PhantomData,
        })
    }

    /// The cached resume token that can be used to resume after the most recently returned
    /// change, for persisting across a process restart.
    pub fn resume_token(&self) -> Option<ResumeToken> {
        self.resume_token.clone()
    }

    /// Per spec.md §4.7's resume-token tracking rule: `postBatchResumeToken` wins whenever the
    /// cursor has one; otherwise the most recently iterated document's `_id` does. If neither is
    /// available, the pipeline has projected `_id` away and there's nothing to resume from.
    fn track_resume_token(&mut self, doc: &Document) -> Result<()> {
        if let Some(pbrt) = self.cursor.post_batch_resume_token() {
            self.resume_token = Some(ResumeToken(pbrt.clone()));
            self.document_returned = true;
            return Ok(());
        }
        match doc.get("_id").and_then(Bson::as_document) {
            Some(id) => {
                self.resume_token = Some(ResumeToken(id.clone()));
                self.document_returned = true;
                Ok(())
            }
            None => Err(ErrorKind::MissingResumeToken.into()),
        }
    }

    /// The `$changeStream` stage field an automatic resume should send, per spec.md §4.7's table.
    fn resume_field(&self) -> Option<(&'static str, Bson)> {
        match &self.resume_token {
            Some(token) if self.document_returned => {
                Some(("resumeAfter", Bson::Document(token.0.clone())))
            }
            Some(token) if self.original_used_start_after => {
                Some(("startAfter", Bson::Document(token.0.clone())))
            }
            Some(token) => Some(("resumeAfter", Bson::Document(token.0.clone()))),
            None => self
                .operation_time
                .map(|ts| ("startAtOperationTime", Bson::Timestamp(ts))),
        }
    }

    fn start_resume(&mut self) -> BoxFuture<'static, Result<CursorSpecification>> {
        let client = self.client.clone();
        let target = self.target.clone();
        let user_pipeline = self.pipeline.clone();
        let base_options = self.base_options.clone();
        let resume_field = self.resume_field();

        Box::pin(async move {
            let stage = build_change_stream_stage(&base_options, resume_field)?;
            let mut full_pipeline = Vec::with_capacity(user_pipeline.len() + 1);
            full_pipeline.push(stage);
            full_pipeline.extend(user_pipeline);

            let mut op = Aggregate::new(
                AggregateTarget::from(target),
                full_pipeline,
                Some(base_options.aggregate_options()),
            );
            client.execute_operation(&mut op, None).await
        })
    }
}

/// Builds the `{$changeStream: {...}}` stage: the options that survive every reissuance
/// (`fullDocument`/`fullDocumentBeforeChange`) plus whichever single resume-point field applies.
fn build_change_stream_stage(
    options: &ChangeStreamOptions,
    resume_field: Option<(&'static str, Bson)>,
) -> Result<Document> {
    let mut inner = Document::new();
    if let Some(full_document) = &options.full_document {
        inner.insert("fullDocument", crate::bson::to_bson(full_document)?);
    }
    if let Some(full_document_before_change) = &options.full_document_before_change {
        inner.insert(
            "fullDocumentBeforeChange",
            crate::bson::to_bson(full_document_before_change)?,
        );
    }
    if let Some((key, value)) = resume_field {
        inner.insert(key, value);
    }
    let mut stage = Document::new();
    stage.insert("$changeStream", inner);
    Ok(stage)
}

fn initial_resume_field(options: &ChangeStreamOptions) -> Option<(&'static str, Bson)> {
    if let Some(token) = &options.resume_after {
        Some(("resumeAfter", Bson::Document(token.0.clone())))
    } else if let Some(token) = &options.start_after {
        Some(("startAfter", Bson::Document(token.0.clone())))
    } else {
        options
            .start_at_operation_time
            .map(|ts| ("startAtOperationTime", Bson::Timestamp(ts)))
    }
}

impl<T> Stream for ChangeStream<T>
where
    T: DeserializeOwned,
{
    type Item = Result<ChangeStreamEvent<T>>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if let ResumeState::Resuming(future) = &mut this.resume_state {
                match future.as_mut().poll(cx) {
                    Poll::Pending => return Poll::Pending,
                    Poll::Ready(Ok(spec)) => {
                        this.resume_state = ResumeState::Idle;
                        this.cursor = Cursor::new(this.client.clone(), spec);
                        this.resume_attempted = false;
                        continue;
                    }
                    Poll::Ready(Err(e)) => {
                        this.resume_state = ResumeState::Idle;
                        return Poll::Ready(Some(Err(e)));
                    }
                }
            }

            return match Pin::new(&mut this.cursor).poll_next(cx) {
                Poll::Pending => Poll::Pending,
                Poll::Ready(None) => Poll::Ready(None),
                Poll::Ready(Some(Ok(doc))) => {
                    if let Err(e) = this.track_resume_token(&doc) {
                        return Poll::Ready(Some(Err(e)));
                    }
                    match crate::bson::from_document::<ChangeStreamEvent<T>>(doc) {
                        Ok(event) => Poll::Ready(Some(Ok(event))),
                        Err(e) => Poll::Ready(Some(Err(e.into()))),
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    if !this.resume_attempted && e.is_resumable() {
                        this.resume_attempted = true;
                        this.resume_state = ResumeState::Resuming(this.start_resume());
                        continue;
                    }
                    Poll::Ready(Some(Err(e)))
                }
            };
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn base_stream() -> ChangeStream<Document> {
        ChangeStream {
            cursor: Cursor::new(
                test_client(),
                CursorSpecification::new(
                    crate::operation::CursorInfo {
                        id: 0,
                        ns: Namespace::new("db", "coll"),
                        batch: Default::default(),
                        at_cluster_time: None,
                        post_batch_resume_token: None,
                    },
                    crate::options::ServerAddress::new("localhost", None),
                    None,
                    None,
                    None,
                ),
            ),
            client: test_client(),
            pipeline: vec![],
            target: ChangeStreamTarget::Collection(Namespace::new("db", "coll")),
            base_options: ChangeStreamOptions::default(),
            resume_token: None,
            document_returned: false,
            operation_time: None,
            original_used_start_after: false,
            resume_attempted: false,
            resume_state: ResumeState::Idle,
            _marker: PhantomData,
        }
    }

    fn test_client() -> Client {
        Client::with_options(
            crate::options::ClientOptions::builder()
                .hosts(vec![crate::options::ServerAddress::new("localhost", None)])
                .build(),
        )
        .unwrap()
    }

    fn token_doc(data: &str) -> Document {
        let mut d = Document::new();
        d.insert("_data", data);
        d
    }

    #[test]
    fn resume_field_uses_resume_after_once_a_document_was_returned() {
        let mut stream = base_stream();
        stream.resume_token = Some(ResumeToken(token_doc("a")));
        stream.document_returned = true;
        assert_eq!(stream.resume_field().unwrap().0, "resumeAfter");
    }

    #[test]
    fn resume_field_uses_start_after_when_original_did_and_no_doc_returned() {
        let mut stream = base_stream();
        stream.resume_token = Some(ResumeToken(token_doc("a")));
        stream.document_returned = false;
        stream.original_used_start_after = true;
        assert_eq!(stream.resume_field().unwrap().0, "startAfter");
    }

    #[test]
    fn resume_field_falls_back_to_operation_time_with_no_token() {
        let mut stream = base_stream();
        stream.operation_time = Some(Timestamp { time: 5, increment: 1 });
        assert_eq!(stream.resume_field().unwrap().0, "startAtOperationTime");
    }

    #[test]
    fn track_resume_token_errors_without_id_or_post_batch_token() {
        let mut stream = base_stream();
        let doc = Document::new();
        assert!(stream.track_resume_token(&doc).is_err());
    }

    #[test]
    fn track_resume_token_reads_the_document_id() {
        let mut stream = base_stream();
        let mut doc = Document::new();
        doc.insert("_id", token_doc("b"));
        stream.track_resume_token(&doc).unwrap();
        assert!(stream.document_returned);
        assert_eq!(stream.resume_token, Some(ResumeToken(token_doc("b"))));
    }
}
