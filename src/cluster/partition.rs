//! `Partition` and `PartitionMap` (§3): key digest → partition id, and the replica
//! selection policy used while resolving a node for a key-addressed command.

use std::sync::Arc;

use crate::cluster::Node;
use crate::options::ReplicaPolicy;

/// Total partitions in the keyspace (glossary: "one of 4096 hash slots").
pub const NUM_PARTITIONS: u32 = 4096;

/// Derives the partition id from a 20-byte key digest, the way the original client
/// takes the first two bytes of the RIPEMD-160 digest modulo the partition count. The
/// digest itself is produced upstream (out of scope, §1) — this crate only maps it to
/// a slot.
pub fn partition_id_for_digest(digest: &[u8; 20]) -> u32 {
    let high = u16::from_le_bytes([digest[0], digest[1]]);
    (high as u32) % NUM_PARTITIONS
}

/// One partition's replica set, as handed down in a [`crate::ClusterState`] snapshot.
#[derive(Clone)]
pub struct Partition {
    pub namespace: String,
    pub partition_id: u32,
    /// Replica 0 is the master; the rest are proles, in preference order.
    pub replicas: Vec<Arc<Node>>,
}

impl Partition {
    /// Resolves the node to use for this partition under `policy`, advancing
    /// `attempt` (the command's retry iteration) through the replica list when the
    /// policy allows it.
    pub fn select_replica(&self, policy: ReplicaPolicy, attempt: u32) -> Option<Arc<Node>> {
        if self.replicas.is_empty() {
            return None;
        }
        let index = match policy {
            ReplicaPolicy::Master => 0,
            ReplicaPolicy::MasterProles => attempt as usize % self.replicas.len(),
            ReplicaPolicy::Sequence => attempt as usize % self.replicas.len(),
            ReplicaPolicy::PreferRack => 0,
            ReplicaPolicy::Random => {
                use rand::Rng;
                rand::rng().random_range(0..self.replicas.len())
            }
        };
        self.replicas
            .get(index)
            .cloned()
            .filter(|node| node.is_alive())
            .or_else(|| self.replicas.iter().find(|n| n.is_alive()).cloned())
    }
}

/// A namespace's full partition table, as produced by the membership/tend layer.
#[derive(Clone, Default)]
pub struct PartitionMap {
    pub generation: u64,
    partitions: Vec<Option<Partition>>,
}

impl PartitionMap {
    pub fn new(generation: u64) -> Self {
        Self {
            generation,
            partitions: (0..NUM_PARTITIONS).map(|_| None).collect(),
        }
    }

    pub fn set(&mut self, partition: Partition) {
        let id = partition.partition_id as usize;
        self.partitions[id] = Some(partition);
    }

    pub fn get(&self, partition_id: u32) -> Option<&Partition> {
        self.partitions.get(partition_id as usize)?.as_ref()
    }

    pub fn for_digest(&self, digest: &[u8; 20]) -> Option<&Partition> {
        self.get(partition_id_for_digest(digest))
    }

    pub fn all(&self) -> impl Iterator<Item = &Partition> {
        self.partitions.iter().filter_map(|p| p.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::ClientPolicy;
    use std::net::SocketAddr;

    fn node(name: &str) -> Arc<Node> {
        let addr: SocketAddr = "127.0.0.1:3000".parse().unwrap();
        Node::new(name, addr, &ClientPolicy::default())
    }

    #[test]
    fn partition_id_is_stable_for_a_digest() {
        let digest = [7u8; 20];
        assert_eq!(
            partition_id_for_digest(&digest),
            partition_id_for_digest(&digest)
        );
        assert!(partition_id_for_digest(&digest) < NUM_PARTITIONS);
    }

    #[test]
    fn master_policy_always_selects_replica_zero() {
        let partition = Partition {
            namespace: "t".into(),
            partition_id: 0,
            replicas: vec![node("master"), node("prole")],
        };
        let selected = partition.select_replica(ReplicaPolicy::Master, 0).unwrap();
        assert_eq!(selected.name, "master");
    }

    #[test]
    fn sequence_policy_advances_with_attempt() {
        let partition = Partition {
            namespace: "t".into(),
            partition_id: 0,
            replicas: vec![node("a"), node("b")],
        };
        let first = partition.select_replica(ReplicaPolicy::Sequence, 0).unwrap();
        let second = partition.select_replica(ReplicaPolicy::Sequence, 1).unwrap();
        assert_ne!(first.name, second.name);
    }

    #[test]
    fn dead_replica_is_skipped() {
        let dead = node("dead");
        tokio_test_block_on(dead.retire());
        let partition = Partition {
            namespace: "t".into(),
            partition_id: 0,
            replicas: vec![dead, node("alive")],
        };
        let selected = partition.select_replica(ReplicaPolicy::Master, 0).unwrap();
        assert_eq!(selected.name, "alive");
    }

    fn tokio_test_block_on(fut: impl std::future::Future<Output = ()>) {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(fut)
    }

    #[test]
    fn partition_map_round_trips_by_digest() {
        let mut map = PartitionMap::new(1);
        let digest = [9u8; 20];
        let id = partition_id_for_digest(&digest);
        map.set(Partition {
            namespace: "t".into(),
            partition_id: id,
            replicas: vec![node("n")],
        });
        assert!(map.for_digest(&digest).is_some());
    }
}
