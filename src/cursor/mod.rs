//! Cursor iteration: a `Stream<Item = Result<Document>>` that drives `getMore` as the current
//! batch runs dry, and a best-effort `killCursors` on drop. No generic `GetMoreProvider`
//! abstraction and no connection pinning — this crate has no transactions to pin a cursor's
//! connection for (see DESIGN.md's C6 entry).

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_core::Stream;
use futures_util::future::BoxFuture;

use crate::bson::Document;
use crate::client::Client;
use crate::coll::Namespace;
use crate::error::Result;
use crate::operation::{self, GetMore, KillCursors};
use crate::options::ServerAddress;
use crate::results::GetMoreResult;

/// Everything a `getMore` needs to know to fetch a cursor's next batch, independent of how much
/// of the current batch has already been consumed.
#[derive(Debug, Clone)]
pub(crate) struct CursorInformation {
    pub(crate) ns: Namespace,
    pub(crate) address: ServerAddress,
    pub(crate) id: i64,
    pub(crate) batch_size: Option<u32>,
    pub(crate) max_time: Option<Duration>,
    pub(crate) comment: Option<String>,
}

/// What a `find`/`aggregate` reply hands back to open a [`Cursor`] on its result, before a session
/// or client is in the picture.
#[derive(Debug, Clone)]
pub(crate) struct CursorSpecification {
    info: CursorInformation,
    initial_buffer: VecDeque<Document>,
    post_batch_resume_token: Option<Document>,
    operation_time: Option<crate::bson::Timestamp>,
}

impl CursorSpecification {
    pub(crate) fn new(
        info: operation::CursorInfo,
        address: ServerAddress,
        batch_size: impl Into<Option<u32>>,
        max_time: impl Into<Option<Duration>>,
        comment: impl Into<Option<String>>,
    ) -> Self {
        Self {
            info: CursorInformation {
                ns: info.ns,
                id: info.id,
                address,
                batch_size: batch_size.into(),
                max_time: max_time.into(),
                comment: comment.into(),
            },
            initial_buffer: info.batch,
            post_batch_resume_token: info.post_batch_resume_token,
            operation_time: None,
        }
    }

    pub(crate) fn id(&self) -> i64 {
        self.info.id
    }

    /// Tags this specification with the `operationTime` from the command reply that produced it,
    /// used as a change stream's resume fallback when no document or postBatchResumeToken is seen.
    pub(crate) fn with_operation_time(mut self, operation_time: Option<crate::bson::Timestamp>) -> Self {
        self.operation_time = operation_time;
        self
    }

    pub(crate) fn post_batch_resume_token(&self) -> Option<&Document> {
        self.post_batch_resume_token.as_ref()
    }

    pub(crate) fn operation_time(&self) -> Option<crate::bson::Timestamp> {
        self.operation_time
    }
}

enum State {
    Idle,
    Executing(BoxFuture<'static, Result<GetMoreResult>>),
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::Idle => f.write_str("Idle"),
            State::Executing(_) => f.write_str("Executing"),
        }
    }
}

/// Streams the documents a `find`/`aggregate` matched, fetching additional batches via `getMore`
/// as the current one runs out. Dropping a `Cursor` before it's exhausted fires a `killCursors`
/// on the runtime in the background; the result is never observed (see DESIGN.md).
#[derive(Debug)]
pub struct Cursor {
    client: Client,
    info: CursorInformation,
    buffer: VecDeque<Document>,
    exhausted: bool,
    state: State,
    post_batch_resume_token: Option<Document>,
}

impl Cursor {
    pub(crate) fn new(client: Client, spec: CursorSpecification) -> Self {
        let exhausted = spec.info.id == 0;
        Self {
            client,
            info: spec.info,
            buffer: spec.initial_buffer,
            exhausted,
            state: State::Idle,
            post_batch_resume_token: spec.post_batch_resume_token,
        }
    }

    /// The server's id for this cursor, or 0 once it's been exhausted/killed.
    pub(crate) fn id(&self) -> i64 {
        self.info.id
    }

    /// The most recent `postBatchResumeToken` seen, from either the initial reply or the latest
    /// `getMore` — used by change streams to track the resume point without inspecting iterated
    /// documents.
    pub(crate) fn post_batch_resume_token(&self) -> Option<&Document> {
        self.post_batch_resume_token.as_ref()
    }

    fn start_get_more(&mut self) {
        let client = self.client.clone();
        let info = self.info.clone();
        self.state = State::Executing(Box::pin(async move {
            let mut op = GetMore::new(info);
            client.execute_operation(&mut op, None).await
        }));
    }
}

impl Stream for Cursor {
    type Item = Result<Document>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if let State::Executing(future) = &mut self.state {
                match future.as_mut().poll(cx) {
                    Poll::Pending => return Poll::Pending,
                    Poll::Ready(result) => {
                        self.state = State::Idle;
                        match result {
                            Ok(get_more) => {
                                self.exhausted = get_more.exhausted();
                                self.info.id = get_more.id;
                                self.buffer = get_more.batch;
                                if get_more.post_batch_resume_token.is_some() {
                                    self.post_batch_resume_token = get_more.post_batch_resume_token;
                                }
                            }
                            Err(e) => return Poll::Ready(Some(Err(e))),
                        }
                    }
                }
            }

            match self.buffer.pop_front() {
                Some(doc) => return Poll::Ready(Some(Ok(doc))),
                None if !self.exhausted => self.start_get_more(),
                None => return Poll::Ready(None),
            }
        }
    }
}

impl Drop for Cursor {
    fn drop(&mut self) {
        if self.exhausted {
            return;
        }

        let client = self.client.clone();
        let ns = self.info.ns.clone();
        let address = self.info.address.clone();
        let cursor_id = self.info.id;
        tokio::spawn(async move {
            let mut op = KillCursors::new(ns, address, vec![cursor_id]);
            let _ = client.execute_operation(&mut op, None).await;
        });
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn spec(id: i64, batch: Vec<Document>) -> CursorSpecification {
        CursorSpecification {
            info: CursorInformation {
                ns: Namespace::new("db", "coll"),
                address: ServerAddress::new("localhost", None),
                id,
                batch_size: None,
                max_time: None,
                comment: None,
            },
            initial_buffer: batch.into(),
            post_batch_resume_token: None,
            operation_time: None,
        }
    }

    #[test]
    fn a_zero_id_cursor_is_immediately_exhausted() {
        let spec = spec(0, vec![]);
        assert!(spec.id() == 0);
    }

    #[test]
    fn cursor_info_clone_preserves_the_pinned_address() {
        let info = CursorInformation {
            ns: Namespace::new("db", "coll"),
            address: ServerAddress::new("localhost", Some(27018)),
            id: 5,
            batch_size: Some(10),
            max_time: None,
            comment: Some("hi".to_string()),
        };
        let cloned = info.clone();
        assert_eq!(cloned.address, info.address);
        assert_eq!(cloned.comment, info.comment);
    }
}
