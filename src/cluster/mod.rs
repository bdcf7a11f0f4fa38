//! The `Cluster` handle each command carries, and the `ClusterState` snapshot
//! produced by the membership/tend layer this crate treats as an external
//! collaborator (§1, §3).
//!
//! Grounded in the teacher's split between `sdam::topology::NewTopology` (owns the
//! live view) and `sdam::server::Server` (one node's pool + health); this crate
//! collapses that into a single `Cluster` so there is exactly one `TimeoutWheel` and
//! one `AdmissionScheduler` per cluster handle, per §9's design note against
//! process-wide singletons.

pub mod node;
pub mod partition;

pub use node::Node;
pub use partition::{Partition, PartitionMap};

use std::sync::{Arc, RwLock};

use crate::admission::AdmissionScheduler;
use crate::options::ClientPolicy;
use crate::timeout_wheel::TimeoutWheel;

/// An immutable snapshot of cluster membership, handed to the core by whatever owns
/// the tend thread (out of scope, §1). The core never mutates it.
#[derive(Clone, Default)]
pub struct ClusterState {
    pub generation: u64,
    pub nodes: Vec<Arc<Node>>,
    pub partition_map: Arc<PartitionMap>,
}

impl ClusterState {
    pub fn node_named(&self, name: &str) -> Option<Arc<Node>> {
        self.nodes.iter().find(|n| n.name == name).cloned()
    }
}

/// The handle each command carries: cluster membership plus the two cluster-scoped
/// singletons (the admission scheduler and the timeout wheel).
pub struct Cluster {
    pub policy: ClientPolicy,
    state: RwLock<Arc<ClusterState>>,
    pub admission: Arc<AdmissionScheduler>,
    pub timeout_wheel: TimeoutWheel,
}

impl Cluster {
    pub fn new(policy: ClientPolicy) -> Arc<Self> {
        let admission = Arc::new(AdmissionScheduler::new(
            policy.async_max_command_action,
            policy.async_max_commands,
            policy.async_max_commands_in_queue,
        ));
        Arc::new(Self {
            policy,
            state: RwLock::new(Arc::new(ClusterState::default())),
            admission,
            timeout_wheel: TimeoutWheel::start(),
        })
    }

    /// Installs a new membership snapshot. Called by the (external) tend layer;
    /// never by command code.
    pub fn apply_state(&self, state: ClusterState) {
        *self.state.write().unwrap() = Arc::new(state);
    }

    pub fn state(&self) -> Arc<ClusterState> {
        self.state.read().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::ClientPolicy;

    #[tokio::test]
    async fn new_cluster_starts_with_empty_state() {
        let cluster = Cluster::new(ClientPolicy::default());
        assert_eq!(cluster.state().nodes.len(), 0);
    }

    #[tokio::test]
    async fn apply_state_is_visible_immediately() {
        let cluster = Cluster::new(ClientPolicy::default());
        let node = Node::new(
            "n1",
            "127.0.0.1:3000".parse().unwrap(),
            &cluster.policy,
        );
        cluster.apply_state(ClusterState {
            generation: 1,
            nodes: vec![node],
            partition_map: Arc::new(PartitionMap::new(1)),
        });
        assert_eq!(cluster.state().nodes.len(), 1);
        assert_eq!(cluster.state().node_named("n1").unwrap().name, "n1");
    }
}
