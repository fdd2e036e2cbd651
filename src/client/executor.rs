//! Command dispatch: server selection, command assembly ($db/lsid/$clusterTime/read preference/
//! concerns/API version), and the retryable-read/write replay loop (spec.md §4.5). No auth,
//! transactions, or reauthentication — those stay out of scope per `SPEC_FULL.md`'s C5 narrowing.

use crate::bson::Document;
use crate::error::{Error, ErrorKind, Result};
use crate::operation::{Operation, Retryability};
use crate::options::ServerAddress;
use crate::sdam::Server;

use super::session::ClientSession;
use super::Client;

impl Client {
    /// Executes `op`, selecting a server per its selection criteria and retrying once if the
    /// failure and the operation's retryability both allow it.
    pub async fn execute_operation<T: Operation>(
        &self,
        op: &mut T,
        mut session: Option<&mut ClientSession>,
    ) -> Result<T::O> {
        if !op.is_acknowledged() {
            return Err(ErrorKind::InvalidArgument {
                message: "unacknowledged write concerns are not supported".to_string(),
            }
            .into());
        }

        let retryability = self.operation_retryability(op);

        // A retried write must replay with the same transaction number; allocate it up front so
        // both the first attempt and the retry use it. Retryable writes need a session to carry
        // the `lsid`/`txnNumber` pair, so an operation that can't find one simply isn't retried.
        let txn_number = match (retryability, session.as_deref()) {
            (Retryability::Write, Some(session)) => Some(session.next_txn_number()),
            _ => None,
        };

        let mut already_retried = false;
        // Populated with the failed attempt's server before a retryable-read reselection, so the
        // replay doesn't immediately re-pick the server that just failed it (spec.md §4.5).
        let mut deprioritized: Option<ServerAddress> = None;
        loop {
            let criteria = op.selection_criteria().cloned();
            let server = self
                .select_server(criteria.as_ref(), op.operation_type(), deprioritized.as_ref())
                .await?;

            let result = self
                .execute_operation_on_server(op, &server, session.as_deref_mut(), txn_number)
                .await;
            server.decrement_operation_count();

            match result {
                Ok(output) => return Ok(output),
                Err(err) => {
                    self.handle_dispatch_error(&server.address, &err).await;

                    let can_retry = !already_retried
                        && match retryability {
                            Retryability::Read => err.is_read_retryable(),
                            Retryability::Write => err.is_write_retryable(),
                            Retryability::None => false,
                        };

                    if !can_retry {
                        return op.handle_error(err);
                    }
                    if retryability == Retryability::Read {
                        deprioritized = Some(server.address.clone());
                    }
                    already_retried = true;
                    op.update_for_retry();
                }
            }
        }
    }

    async fn execute_operation_on_server<T: Operation>(
        &self,
        op: &mut T,
        server: &Server,
        session: Option<&mut ClientSession>,
        txn_number: Option<i64>,
    ) -> Result<T::O> {
        let address = &server.address;
        let mut conn = server.pool.checkout().await?;
        let description = conn
            .stream_description
            .clone()
            .unwrap_or_default();

        let mut command = op.build(&description)?;
        self.update_command_read_pref(address, &mut command, op.selection_criteria());

        if let Some(ref session) = session {
            command.set_session_id(session.id().clone());
            if let Some(txn_number) = txn_number {
                command.set_txn_number(txn_number);
            }
        }

        let session_cluster_time = session.as_ref().and_then(|s| s.cluster_time());
        let client_cluster_time = self.cluster_time();
        let cluster_time = std::cmp::max(session_cluster_time, client_cluster_time.as_ref());
        if let Some(cluster_time) = cluster_time {
            command.set_cluster_time(cluster_time)?;
        }

        if let Some(ref server_api) = self.options().server_api {
            command.set_server_api(server_api);
        }

        if op.supports_read_concern(&description) {
            if let Some(read_concern) = op.read_concern() {
                command.body.insert("readConcern", crate::bson::to_bson(read_concern)?);
            }
        }

        if let Some(write_concern) = op.write_concern() {
            write_concern.validate()?;
            command.body.insert("writeConcern", crate::bson::to_bson(write_concern)?);
        }

        let raw_response = conn.execute(command).await?;

        if let Some(cluster_time) = extract_cluster_time(raw_response.document())? {
            self.advance_cluster_time(&cluster_time);
            if let Some(session) = session {
                session.advance_cluster_time(&cluster_time);
            }
        }

        op.handle_response(raw_response, &description)
    }

    /// Folds a dispatch failure back into SDAM: network errors and not-writable-primary/recovering
    /// replies mark the responding server Unknown (spec.md §4.5), and network errors additionally
    /// clear its connection pool so no pre-error connection is handed out again.
    async fn handle_dispatch_error(&self, address: &ServerAddress, error: &Error) {
        if error.is_network_error() || error.is_notwritableprimary() || error.is_recovering() {
            self.mark_server_unknown(address, error.clone());
        }
        if error.is_network_error() {
            self.invalidate_server_pool(address).await;
        }
    }

    fn operation_retryability<T: Operation>(&self, op: &T) -> Retryability {
        match op.retryability() {
            Retryability::Read if self.options().retry_reads => Retryability::Read,
            Retryability::Write if self.options().retry_writes => Retryability::Write,
            _ => Retryability::None,
        }
    }
}

/// Pulls `$clusterTime` back out of a raw reply document, if present, for cluster-time gossip.
/// Unlike `CommandResponse<T>`'s typed field, this doesn't require knowing `T` up front.
fn extract_cluster_time(doc: &Document) -> Result<Option<crate::client::ClusterTime>> {
    match doc.get("$clusterTime") {
        Some(crate::bson::Bson::Document(d)) => {
            Ok(Some(crate::bson::from_document(d.clone())?))
        }
        _ => Ok(None),
    }
}
