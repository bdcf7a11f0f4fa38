//! `Node` (§3): a non-owning handle to one cluster member, grounded in the teacher's
//! `sdam::server::Server` (address + pool + an atomic operation/health counter).

use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use crate::cmap::NodeConnectionPool;
use crate::options::ClientPolicy;

/// One server member of the cluster (glossary). Owned by the cluster's membership
/// layer (out of scope, §1); this crate only holds a reference-counted, non-owning
/// handle that is cleared when the node is removed from a [`crate::ClusterState`]
/// snapshot.
#[derive(Debug)]
pub struct Node {
    pub name: String,
    pub address: SocketAddr,
    /// Monotonic health counter: decreased on network error, restored on success.
    health: AtomicI64,
    pub pool: NodeConnectionPool,
    alive: std::sync::atomic::AtomicBool,
}

impl Node {
    pub const STARTING_HEALTH: i64 = 100;

    pub fn new(name: impl Into<String>, address: SocketAddr, policy: &ClientPolicy) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            address,
            health: AtomicI64::new(Self::STARTING_HEALTH),
            pool: NodeConnectionPool::new(address, policy),
            alive: std::sync::atomic::AtomicBool::new(true),
        })
    }

    pub fn health(&self) -> i64 {
        self.health.load(Ordering::SeqCst)
    }

    pub fn decrease_health(&self) {
        self.health.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn restore_health(&self) {
        self.health.store(Self::STARTING_HEALTH, Ordering::SeqCst);
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Called by membership when this node leaves the cluster; closes all pooled
    /// connections so they are not handed out for new commands.
    pub async fn retire(&self) {
        self.alive.store(false, Ordering::SeqCst);
        self.pool.close_all().await;
    }
}
