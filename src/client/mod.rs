//! The `Client` handle: a topology registry plus the server-selection and generation-bookkeeping
//! surface the dispatcher ([`executor`]) and session layer ([`session`]) build on. No background
//! monitoring loop runs here — see the crate-level concurrency notes — so a `Client` only ever
//! changes its topology in response to a `hello` reply the caller hands it.

pub mod executor;
pub mod session;

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::bson::Document;
use crate::error::{Error, ErrorKind, Result};
use crate::operation::OperationType;
use crate::options::{ClientOptions, ServerAddress};
use crate::sdam::{Server, ServerDescription, ServerInfo, TopologyDescription};
use crate::selection_criteria::SelectionCriteria;

pub use session::ClientSession;

/// The highest `$clusterTime` seen across every server this client has talked to, gossiped back
/// out on every subsequent command so the deployment's logical clock only ever moves forward.
/// Ordered (and compared for equality) purely by the timestamp, ignoring the signature used to
/// validate it came from a real mongod/mongos.
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterTime {
    pub cluster_time: crate::bson::Timestamp,
    pub signature: Document,
}

impl PartialEq for ClusterTime {
    fn eq(&self, other: &ClusterTime) -> bool {
        self.cluster_time == other.cluster_time
    }
}

impl Eq for ClusterTime {}

impl PartialOrd for ClusterTime {
    fn partial_cmp(&self, other: &ClusterTime) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ClusterTime {
    fn cmp(&self, other: &ClusterTime) -> std::cmp::Ordering {
        let lhs = (self.cluster_time.time, self.cluster_time.increment);
        let rhs = (other.cluster_time.time, other.cluster_time.increment);
        lhs.cmp(&rhs)
    }
}

#[derive(Debug)]
struct Topology {
    description: TopologyDescription,
    servers: std::collections::HashMap<crate::options::ServerAddress, Arc<Server>>,
}

#[derive(Debug)]
struct ClientInner {
    options: Arc<ClientOptions>,
    topology: Mutex<Topology>,
    next_txn_number: AtomicI64,
}

/// A handle to a MongoDB deployment. Cheap to clone; every clone shares the same topology state
/// and connection pools.
#[derive(Debug, Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    pub fn with_options(options: ClientOptions) -> Result<Self> {
        options.validate()?;
        let options = Arc::new(options);

        let mut description = TopologyDescription::default();
        description.initialize(&options);

        let servers = description
            .server_addresses()
            .map(|addr| (addr.clone(), Server::new(addr.clone(), options.clone())))
            .collect();

        Ok(Self {
            inner: Arc::new(ClientInner {
                options,
                topology: Mutex::new(Topology { description, servers }),
                next_txn_number: AtomicI64::new(0),
            }),
        })
    }

    pub fn options(&self) -> &ClientOptions {
        &self.inner.options
    }

    /// The next transaction number to assign a retryable write, per the spec's one-global-counter-
    /// per-session-pool approach (simplified here to one counter per client, since this crate has
    /// no session pool to scope it to).
    pub(crate) fn next_txn_number(&self) -> i64 {
        self.inner.next_txn_number.fetch_add(1, Ordering::SeqCst)
    }

    /// Folds a `hello` reply (or the error produced instead of one) into the topology, adding
    /// [`Server`] pool handles for any newly-discovered addresses and dropping any removed.
    pub fn update_topology(&self, server_description: ServerDescription) -> Result<()> {
        let mut topology = self.inner.topology.lock().expect("topology mutex poisoned");
        let before: std::collections::HashSet<_> =
            topology.description.server_addresses().cloned().collect();

        topology.description.update(server_description)?;

        let after: std::collections::HashSet<_> =
            topology.description.server_addresses().cloned().collect();
        for addr in after.difference(&before) {
            topology
                .servers
                .insert(addr.clone(), Server::new(addr.clone(), self.inner.options.clone()));
        }
        for addr in before.difference(&after) {
            topology.servers.remove(addr);
        }
        Ok(())
    }

    /// Advances the client-wide `$clusterTime` gossiped on every subsequent command, if `to` is
    /// more recent than what's on record.
    pub(crate) fn advance_cluster_time(&self, to: &ClusterTime) {
        let mut topology = self.inner.topology.lock().expect("topology mutex poisoned");
        topology.description.advance_cluster_time(to);
    }

    pub fn cluster_time(&self) -> Option<ClusterTime> {
        self.inner
            .topology
            .lock()
            .expect("topology mutex poisoned")
            .description
            .cluster_time()
            .cloned()
    }

    /// Picks a server matching `criteria` (primary, if unspecified — the default every write and
    /// unqualified read uses), blocking (in the async sense) until one becomes available or
    /// `server_selection_timeout` elapses, per spec.md §4.4.
    ///
    /// `operation_type` drives the aggregate-with-write override rule (an `AggregateWithWrite`
    /// operation is silently redirected to the primary if any known server predates the
    /// secondary-writes wire version); `deprioritized`, when set, is excluded from the candidate
    /// list on Sharded topologies unless doing so would leave none (used by retryable-read
    /// reselection to avoid immediately re-picking the server the failed attempt just used).
    pub async fn select_server(
        &self,
        criteria: Option<&SelectionCriteria>,
        operation_type: OperationType,
        deprioritized: Option<&ServerAddress>,
    ) -> Result<Arc<Server>> {
        let default_criteria =
            SelectionCriteria::ReadPreference(crate::selection_criteria::ReadPreference::Primary);
        let criteria = criteria.unwrap_or(&default_criteria);

        let timeout = self.inner.options.server_selection_timeout;
        let deadline = Instant::now() + timeout;

        loop {
            let candidate = {
                let topology = self.inner.topology.lock().expect("topology mutex poisoned");
                let (in_window, overridden) = topology.description.suitable_servers_in_latency_window(
                    criteria,
                    operation_type,
                    deprioritized,
                )?;
                if overridden {
                    #[cfg(feature = "tracing-unstable")]
                    log::warn!(
                        "aggregate with $out/$merge selected against a topology containing a \
                         server below the secondary-writes wire version; overriding read \
                         preference to primary"
                    );
                }
                let in_window: Vec<&Arc<Server>> = in_window
                    .into_iter()
                    .filter_map(|desc| topology.servers.get(&desc.address))
                    .collect();
                topology.description.select_server_in_latency_window(in_window)
            };

            if let Some(server) = candidate {
                server.increment_operation_count();
                return Ok(server);
            }

            if Instant::now() >= deadline {
                let message = {
                    let topology = self.inner.topology.lock().expect("topology mutex poisoned");
                    topology.description.server_selection_timeout_error_message(criteria)
                };
                return Err(Error::new(ErrorKind::ServerSelection { message }));
            }

            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Marks `address`'s connection pool stale, forcing every in-flight or idle connection from
    /// before this call to be refused on checkin, per the NetworkError generation-bump rule
    /// (spec.md §4.5).
    pub(crate) async fn invalidate_server_pool(&self, address: &crate::options::ServerAddress) {
        let pool = {
            let topology = self.inner.topology.lock().expect("topology mutex poisoned");
            topology.servers.get(address).map(|s| s.pool.clone())
        };
        if let Some(pool) = pool {
            pool.clear().await;
        }
    }

    /// Attaches `$readPreference` to `command` per the topology/server-type combination currently
    /// on record for `address` (spec.md §4.5 command-assembly step 5).
    pub(crate) fn update_command_read_pref(
        &self,
        address: &crate::options::ServerAddress,
        command: &mut crate::cmap::Command,
        criteria: Option<&SelectionCriteria>,
    ) {
        let topology = self.inner.topology.lock().expect("topology mutex poisoned");
        topology.description.update_command_with_read_pref(address, command, criteria);
    }

    /// Folds a dispatch failure into the topology as an SDAM "mark Unknown" update, per spec.md
    /// §4.5's NetworkError/NotMasterOrRecovering handling. A no-op if `address` was since removed
    /// from the topology (e.g. by a concurrent hello-driven update).
    pub(crate) fn mark_server_unknown(&self, address: &crate::options::ServerAddress, error: Error) {
        let _ = self.update_topology(ServerDescription::new_from_error(address.clone(), error));
    }

    pub(crate) fn server_info(&self, address: &crate::options::ServerAddress) -> Option<ServerInfo<'static>> {
        let topology = self.inner.topology.lock().expect("topology mutex poisoned");
        topology
            .description
            .get_server_description(address)
            .cloned()
            .map(ServerInfo::new_owned)
    }

    pub fn start_session(&self) -> ClientSession {
        ClientSession::new(self.clone())
    }
}
