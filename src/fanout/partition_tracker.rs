//! `PartitionTracker` (§4.10): per-partition progress for a scan or query spread
//! across the whole partition map, including the unavailable-partition retry round
//! described there.
//!
//! Grounded in the teacher's `sdam::topology` "which partitions does this server
//! still own" bookkeeping, narrowed here to the single axis this crate needs: has
//! this partition finished, and if not, whose fault is that.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::cluster::{ClusterState, Node, PartitionMap};
use crate::options::ReplicaPolicy;

/// Per-partition state machine (§4.10).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PartitionStatus {
    Unassigned,
    InProgress,
    Done,
    /// The node serving this partition dropped it mid-scan (PARTITION_DONE with a
    /// non-OK result code, or the child command failed outright). Eligible for
    /// reassignment on the next round, up to the retry-round budget.
    Unavailable,
}

#[derive(Clone, Debug)]
pub struct PartitionProgress {
    pub status: PartitionStatus,
    /// Last digest observed for this partition, resumed from on retry (§4.10's
    /// per-partition cursor). `None` means "start from the beginning."
    pub last_digest: Option<[u8; 20]>,
}

impl Default for PartitionProgress {
    fn default() -> Self {
        Self {
            status: PartitionStatus::Unassigned,
            last_digest: None,
        }
    }
}

/// Tracks every partition of one namespace across the rounds of a scan or query.
pub struct PartitionTracker {
    namespace: String,
    max_retry_rounds: u32,
    rounds_used: Mutex<u32>,
    progress: Mutex<HashMap<u32, PartitionProgress>>,
}

impl PartitionTracker {
    /// `partition_ids` is the set this command covers (the whole map for an
    /// unfiltered scan, or a caller-supplied subset for a partition-filtered query).
    pub fn new(namespace: impl Into<String>, partition_ids: impl IntoIterator<Item = u32>, max_retry_rounds: u32) -> Self {
        let progress = partition_ids
            .into_iter()
            .map(|id| (id, PartitionProgress::default()))
            .collect();
        Self {
            namespace: namespace.into(),
            max_retry_rounds,
            rounds_used: Mutex::new(0),
            progress: Mutex::new(progress),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Groups every partition not yet `Done` by the node that currently owns it
    /// (§4.10's `assignPartitionsToNodes`). Partitions whose node has no live replica
    /// are left out of the result and stay `Unassigned`; the caller should treat an
    /// empty result as "nothing left to schedule this round."
    pub fn assign_partitions_to_nodes(
        &self,
        state: &ClusterState,
        replica_policy: ReplicaPolicy,
    ) -> HashMap<String, (Arc<Node>, Vec<u32>)> {
        let map: &PartitionMap = &state.partition_map;
        let mut progress = self.progress.lock().unwrap();
        let mut grouped: HashMap<String, (Arc<Node>, Vec<u32>)> = HashMap::new();

        for (&partition_id, entry) in progress.iter_mut() {
            if entry.status == PartitionStatus::Done {
                continue;
            }
            let Some(partition) = map.get(partition_id) else {
                continue;
            };
            let Some(node) = partition.select_replica(replica_policy, 0) else {
                continue;
            };
            entry.status = PartitionStatus::InProgress;
            grouped
                .entry(node.name.clone())
                .or_insert_with(|| (node.clone(), Vec::new()))
                .1
                .push(partition_id);
        }
        grouped
    }

    /// Records the digest of the last record seen for `partition_id` (§4.10's
    /// `setLast`), so a retry round resumes rather than rescanning from the start.
    pub fn set_last(&self, partition_id: u32, digest: [u8; 20], is_last: bool) {
        let mut progress = self.progress.lock().unwrap();
        if let Some(entry) = progress.get_mut(&partition_id) {
            entry.last_digest = Some(digest);
            if is_last {
                entry.status = PartitionStatus::Done;
            }
        }
    }

    /// Marks `partition_id` as dropped mid-round (§4.10's `partitionUnavailable`):
    /// either the server returned PARTITION_DONE with a non-OK code, or the whole
    /// child command covering it failed.
    pub fn partition_unavailable(&self, partition_id: u32) {
        let mut progress = self.progress.lock().unwrap();
        if let Some(entry) = progress.get_mut(&partition_id) {
            if entry.status != PartitionStatus::Done {
                entry.status = PartitionStatus::Unavailable;
            }
        }
    }

    /// Moves every `Unavailable` partition back to `Unassigned` for another round,
    /// provided the retry-round budget is not exhausted. Returns `false` (with no
    /// state change) once the budget runs out, so the caller can report the scan as
    /// incomplete rather than looping forever.
    pub fn begin_retry_round(&self) -> bool {
        let mut rounds_used = self.rounds_used.lock().unwrap();
        if *rounds_used >= self.max_retry_rounds {
            return false;
        }
        *rounds_used += 1;
        let mut progress = self.progress.lock().unwrap();
        for entry in progress.values_mut() {
            if entry.status == PartitionStatus::Unavailable {
                entry.status = PartitionStatus::Unassigned;
            }
        }
        true
    }

    /// True once every tracked partition is `Done` (§4.10's `isClusterComplete`).
    pub fn is_cluster_complete(&self) -> bool {
        self.progress
            .lock()
            .unwrap()
            .values()
            .all(|entry| entry.status == PartitionStatus::Done)
    }

    pub fn unavailable_count(&self) -> usize {
        self.progress
            .lock()
            .unwrap()
            .values()
            .filter(|entry| entry.status == PartitionStatus::Unavailable)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::Partition;
    use crate::options::ClientPolicy;
    use std::net::SocketAddr;

    fn node(name: &str) -> Arc<Node> {
        let addr: SocketAddr = "127.0.0.1:3000".parse().unwrap();
        Node::new(name, addr, &ClientPolicy::default())
    }

    fn state_with_one_partition(partition_id: u32, node_name: &str) -> ClusterState {
        let mut map = PartitionMap::new(1);
        map.set(Partition {
            namespace: "test".into(),
            partition_id,
            replicas: vec![node(node_name)],
        });
        ClusterState {
            generation: 1,
            nodes: vec![],
            partition_map: Arc::new(map),
        }
    }

    #[test]
    fn assigns_unassigned_partitions_to_their_replica() {
        let tracker = PartitionTracker::new("test", [0], 1);
        let state = state_with_one_partition(0, "n1");
        let grouped = tracker.assign_partitions_to_nodes(&state, ReplicaPolicy::Master);
        assert_eq!(grouped.len(), 1);
        assert_eq!(grouped["n1"].1, vec![0]);
    }

    #[test]
    fn setting_last_with_is_last_marks_partition_done() {
        let tracker = PartitionTracker::new("test", [0, 1], 1);
        assert!(!tracker.is_cluster_complete());
        tracker.set_last(0, [1u8; 20], true);
        tracker.set_last(1, [2u8; 20], true);
        assert!(tracker.is_cluster_complete());
    }

    #[test]
    fn unavailable_partitions_are_reassigned_next_round() {
        let tracker = PartitionTracker::new("test", [0], 2);
        let state = state_with_one_partition(0, "n1");
        tracker.assign_partitions_to_nodes(&state, ReplicaPolicy::Master);
        tracker.partition_unavailable(0);
        assert_eq!(tracker.unavailable_count(), 1);
        assert!(tracker.begin_retry_round());
        assert_eq!(tracker.unavailable_count(), 0);
        let grouped = tracker.assign_partitions_to_nodes(&state, ReplicaPolicy::Master);
        assert_eq!(grouped["n1"].1, vec![0]);
    }

    #[test]
    fn retry_round_budget_is_exhausted_eventually() {
        let tracker = PartitionTracker::new("test", [0], 1);
        tracker.partition_unavailable(0);
        assert!(tracker.begin_retry_round());
        tracker.partition_unavailable(0);
        assert!(!tracker.begin_retry_round());
    }
}
