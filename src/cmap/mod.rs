//! The connection-monitoring-and-pooling layer C5 dispatches commands through: wire framing
//! ([`wire`]), a single connection's handshake state ([`conn`]), and a pool that hands out
//! connections bounded by a generation counter (so a cleared pool can refuse to check back in
//! connections established before the clear).

mod conn;
mod wire;

pub use conn::{Connection, RawCommandResponse, StreamDescription};
pub use wire::{next_request_id, Message, MessageFlags};

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};

use crate::bson::Document;
use crate::client::ClusterTime;
use crate::error::Result;
use crate::options::{ClientOptions, ServerAddress, ServerApi};
use crate::selection_criteria::ReadPreference;

const DEFAULT_MAX_POOL_SIZE: u32 = 100;

/// A server command, assembled incrementally as the dispatcher attaches session, cluster-time,
/// read-preference, and API-version metadata before it goes out on the wire.
#[derive(Debug, Clone)]
pub struct Command {
    pub name: String,
    pub target_db: String,
    pub body: Document,
}

impl Command {
    pub fn new(name: impl Into<String>, target_db: impl Into<String>, body: Document) -> Self {
        Self {
            name: name.into(),
            target_db: target_db.into(),
            body,
        }
    }

    pub fn set_session_id(&mut self, lsid: Document) {
        self.body.insert("lsid", lsid);
    }

    pub fn set_cluster_time(&mut self, cluster_time: &ClusterTime) -> Result<()> {
        self.body
            .insert("$clusterTime", crate::bson::to_document(cluster_time)?);
        Ok(())
    }

    pub fn set_txn_number(&mut self, txn_number: i64) {
        self.body.insert("txnNumber", txn_number);
    }

    /// `getMore` does not accept `apiVersion`/`apiStrict`/`apiDeprecationErrors` — only the
    /// command that opened its cursor does.
    pub fn set_server_api(&mut self, server_api: &ServerApi) {
        if self.name == "getMore" {
            return;
        }
        self.body.insert("apiVersion", server_api.version.as_str());
        if let Some(strict) = server_api.strict {
            self.body.insert("apiStrict", strict);
        }
        if let Some(de) = server_api.deprecation_errors {
            self.body.insert("apiDeprecationErrors", de);
        }
    }

    pub fn set_read_preference(&mut self, read_preference: ReadPreference) {
        self.body
            .insert("$readPreference", read_preference.into_document());
    }

    pub fn into_document(mut self) -> Document {
        self.body.insert("$db", self.target_db);
        self.body
    }
}

#[derive(Debug)]
struct ConnectionPoolInner {
    address: ServerAddress,
    options: Arc<ClientOptions>,
    generation: AtomicU32,
    next_id: AtomicU32,
    semaphore: Arc<Semaphore>,
    idle: Mutex<Vec<Connection>>,
}

/// Hands out connections to a single server, bounded by `max_pool_size` concurrent checkouts.
/// Idle connections are reused across checkouts as long as they were established under the pool's
/// current generation; [`ConnectionPool::clear`] bumps the generation so in-flight and idle
/// connections from before a network error are never handed out again. Cheap to clone — every
/// clone shares the same underlying pool state.
#[derive(Debug, Clone)]
pub struct ConnectionPool {
    inner: Arc<ConnectionPoolInner>,
}

impl ConnectionPool {
    pub fn new(address: ServerAddress, options: Arc<ClientOptions>) -> Self {
        Self {
            inner: Arc::new(ConnectionPoolInner {
                address,
                options,
                generation: AtomicU32::new(0),
                next_id: AtomicU32::new(1),
                semaphore: Arc::new(Semaphore::new(DEFAULT_MAX_POOL_SIZE as usize)),
                idle: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn address(&self) -> &ServerAddress {
        &self.inner.address
    }

    pub fn generation(&self) -> u32 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    /// Invalidates every connection currently attributed to this pool, per the connection-pool
    /// clearing behavior CMAP requires after a network error or "not primary" response: existing
    /// checkouts finish their in-flight operation but are dropped rather than checked back in.
    pub async fn clear(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.inner.idle.lock().await.clear();
    }

    pub async fn checkout(&self) -> Result<PooledConnection> {
        let permit = self
            .inner
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("semaphore is never closed");
        let current_generation = self.generation();

        let mut idle = self.inner.idle.lock().await;
        while let Some(conn) = idle.pop() {
            if conn.generation == current_generation {
                return Ok(PooledConnection {
                    pool: self.clone(),
                    conn: Some(conn),
                    _permit: permit,
                });
            }
        }
        drop(idle);

        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let conn = Connection::establish(
            id,
            self.inner.address.clone(),
            current_generation,
            &self.inner.options,
        )
        .await?;
        Ok(PooledConnection {
            pool: self.clone(),
            conn: Some(conn),
            _permit: permit,
        })
    }

    async fn checkin(&self, conn: Connection) {
        if conn.generation == self.generation() {
            self.inner.idle.lock().await.push(conn);
        }
    }
}

/// A connection on loan from a [`ConnectionPool`]. Returned to the pool's idle list on drop
/// (via a spawned task, since `Drop` can't `.await`), unless it was invalidated by a clear while
/// checked out.
pub struct PooledConnection {
    pool: ConnectionPool,
    conn: Option<Connection>,
    _permit: OwnedSemaphorePermit,
}

impl std::ops::Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn.as_ref().expect("connection taken only on drop")
    }
}

impl std::ops::DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().expect("connection taken only on drop")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            let pool = self.pool.clone();
            tokio::spawn(async move { pool.checkin(conn).await });
        }
    }
}
