//! Server discovery and monitoring: turning `hello` replies into a [`description::TopologyDescription`]
//! and selecting a server out of it. This crate does not run the background monitoring threads
//! that keep a topology description fresh (see the crate-level docs) — callers hand in replies as
//! they get them and ask this module to fold them in and pick a server.

pub mod description;

pub use description::{
    verify_max_staleness, ServerDescription, ServerType, TopologyDescription,
    TopologyDescriptionDiff, TopologyType, TopologyVersion, TransactionSupportStatus,
    IDLE_WRITE_PERIOD,
};

use std::borrow::Cow;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::cmap::ConnectionPool;
use crate::options::{ClientOptions, ServerAddress};

/// The default interval between SDAM heartbeats, used whenever a caller hasn't overridden
/// [`ClientOptions::heartbeat_freq`].
pub const DEFAULT_HEARTBEAT_FREQUENCY: Duration = Duration::from_secs(10);

/// Picks (without replacement) up to `n` elements of `values`, in the spec's "random subset" sense
/// used both for limiting the hosts a `srv_max_hosts`-bounded topology tracks and for the
/// power-of-two-choices server selection does over the latency window.
pub(crate) fn choose_n<T>(values: &[T], n: usize) -> impl Iterator<Item = &T> {
    use rand::{prelude::SliceRandom, SeedableRng};
    values.choose_multiple(&mut rand::rngs::SmallRng::from_entropy(), n)
}

/// A read-only view of a server's metadata, handed to [`crate::selection_criteria::Predicate`]
/// closures so they can filter candidates without depending on the full [`ServerDescription`]
/// type. Borrows by default; [`ServerInfo::new_owned`] exists for callers that need to keep a
/// snapshot past the lifetime of the topology description it came from.
pub struct ServerInfo<'a> {
    description: Cow<'a, ServerDescription>,
}

impl<'a> ServerInfo<'a> {
    pub(crate) fn new_borrowed(description: &'a ServerDescription) -> Self {
        Self {
            description: Cow::Borrowed(description),
        }
    }

    pub(crate) fn new_owned(description: ServerDescription) -> ServerInfo<'static> {
        ServerInfo {
            description: Cow::Owned(description),
        }
    }

    pub fn address(&self) -> &ServerAddress {
        &self.description.address
    }

    pub fn server_type(&self) -> ServerType {
        self.description.server_type
    }

    pub fn average_round_trip_time(&self) -> Option<Duration> {
        self.description.average_round_trip_time
    }
}

impl fmt::Display for ServerInfo<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{ address: {}, type: {:?} }}", self.address(), self.server_type())
    }
}

/// The live state for a single server in the topology: its address and the connection pool
/// operations checkout connections from. Distinct from [`ServerDescription`], which is just the
/// data SDAM folds `hello` replies into — a `Server` is the thing server selection hands back so
/// the caller can actually dispatch a command.
#[derive(Debug)]
pub struct Server {
    pub address: ServerAddress,
    pub pool: ConnectionPool,
    operation_count: AtomicU32,
}

impl Server {
    pub fn new(address: ServerAddress, options: Arc<ClientOptions>) -> Arc<Self> {
        Arc::new(Self {
            pool: ConnectionPool::new(address.clone(), options),
            address,
            operation_count: AtomicU32::new(0),
        })
    }

    #[cfg(test)]
    pub(crate) fn new_mocked(address: ServerAddress, operation_count: u32) -> Arc<Self> {
        Arc::new(Self {
            pool: ConnectionPool::new(address.clone(), Arc::new(test_client_options(&address))),
            address,
            operation_count: AtomicU32::new(operation_count),
        })
    }

    pub fn operation_count(&self) -> u32 {
        self.operation_count.load(Ordering::SeqCst)
    }

    pub(crate) fn increment_operation_count(&self) {
        self.operation_count.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn decrement_operation_count(&self) {
        self.operation_count.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
fn test_client_options(address: &ServerAddress) -> ClientOptions {
    ClientOptions::builder().hosts(vec![address.clone()]).build()
}
