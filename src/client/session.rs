//! Session state: the `lsid` every retryable command carries, the transaction-number counter
//! retryable writes replay with, and the cluster-time/operation-time gossip a session accumulates
//! across the commands it's used for. Transactions are out of scope for this crate (see
//! `SPEC_FULL.md`'s C5 narrowing) — this is the gossip-and-retry subset only.

use crate::bson::{Binary, BinarySubtype, Bson, Document, Timestamp};
use crate::client::{Client, ClusterTime};

/// A logical session: an `lsid` the server uses to correlate retryable writes and causally
/// consistent reads, plus the driver-side state that makes retries and cluster-time gossip work.
#[derive(Debug)]
pub struct ClientSession {
    id: Document,
    client: Client,
    cluster_time: Option<ClusterTime>,
    operation_time: Option<Timestamp>,
}

impl ClientSession {
    pub(crate) fn new(client: Client) -> Self {
        let mut id = Document::new();
        id.insert(
            "id",
            Bson::Binary(Binary {
                subtype: BinarySubtype::Uuid,
                bytes: uuid::Uuid::new_v4().as_bytes().to_vec(),
            }),
        );
        Self {
            id,
            client,
            cluster_time: None,
            operation_time: None,
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// The `lsid` document every command this session is attached to carries.
    pub fn id(&self) -> &Document {
        &self.id
    }

    pub fn cluster_time(&self) -> Option<&ClusterTime> {
        self.cluster_time.as_ref()
    }

    /// Advances this session's cluster time to `to` if it's more recent, and does the same for
    /// the client-wide cluster time so every other session/command benefits from the gossip too.
    pub fn advance_cluster_time(&mut self, to: &ClusterTime) {
        if self.cluster_time.as_ref() < Some(to) {
            self.cluster_time = Some(to.clone());
        }
    }

    pub fn operation_time(&self) -> Option<Timestamp> {
        self.operation_time
    }

    pub fn advance_operation_time(&mut self, to: Timestamp) {
        if self.operation_time.map_or(true, |current| current < to) {
            self.operation_time = Some(to);
        }
    }

    /// Allocates the next transaction number for a retryable write issued on this session. Per
    /// spec.md §4.5, a retry replays the command with the *same* number rather than calling this
    /// again.
    pub(crate) fn next_txn_number(&self) -> i64 {
        self.client.next_txn_number()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::options::ClientOptions;

    fn test_client() -> Client {
        Client::with_options(
            ClientOptions::builder()
                .hosts(vec![crate::options::ServerAddress::new("localhost", None)])
                .build(),
        )
        .unwrap()
    }

    #[test]
    fn advance_cluster_time_only_moves_forward() {
        let mut session = ClientSession::new(test_client());
        let earlier = ClusterTime {
            cluster_time: Timestamp { time: 1, increment: 0 },
            signature: Document::new(),
        };
        let later = ClusterTime {
            cluster_time: Timestamp { time: 2, increment: 0 },
            signature: Document::new(),
        };

        session.advance_cluster_time(&later);
        session.advance_cluster_time(&earlier);
        assert_eq!(session.cluster_time(), Some(&later));
    }
}
