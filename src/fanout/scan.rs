//! Cluster-wide partition scan fan-out (§8 scenario 5): assigns the namespace's
//! partitions to their owning nodes, runs one [`MultiRecordCommand`] per node, and
//! retries whatever the round left `Unavailable` until [`PartitionTracker`] runs out
//! of rounds or the whole map reports `Done`.
//!
//! A child command's outright failure (node unreachable, timed out) is accounted as
//! a successful round completion rather than a fan-out failure (§4.9: "the executor
//! treats it as success for accounting but re-issues those partitions on the next
//! round") — the affected partitions are simply marked `Unavailable` and picked up
//! by the next round, rather than failing the whole scan on one bad node.

use std::sync::Arc;

use crate::cluster::Cluster;
use crate::command::{MultiRecordCommand, Record};
use crate::error::Result;
use crate::listener::{collect, Listener};
use crate::options::ScanPolicy;

use super::{FanOutExecutor, FanOutOutcome, PartitionTracker};

/// Builds the already-encoded request body covering the given partition ids for one
/// node's child command. Wire encoding of the scan request itself is out of scope
/// (§1); this crate only drives the resulting response stream.
pub trait ScanBodyBuilder: Fn(&[u32]) -> Vec<u8> + Send + Sync {}
impl<T: Fn(&[u32]) -> Vec<u8> + Send + Sync> ScanBodyBuilder for T {}

/// Runs a cluster-wide scan of `namespace` over `partition_ids`. Returns every
/// record observed across every round, plus whether any partition never completed
/// within the retry-round budget (`Ok(true)` = partial).
pub async fn execute_scan(
    cluster: Arc<Cluster>,
    namespace: impl Into<String>,
    partition_ids: Vec<u32>,
    build_body: impl ScanBodyBuilder + 'static,
    policy: ScanPolicy,
) -> (Vec<Record>, Result<bool>) {
    let tracker = Arc::new(PartitionTracker::new(
        namespace.into(),
        partition_ids,
        policy.max_retry_rounds,
    ));
    let build_body = Arc::new(build_body);
    let mut records = Vec::new();

    loop {
        let state = cluster.state();
        let grouped = tracker.assign_partitions_to_nodes(&state, policy.base.replica_policy);
        if grouped.is_empty() {
            break;
        }

        let (listener, receiver) = Listener::channel();
        let executor = Arc::new(FanOutExecutor::new(grouped.len() as u32));

        for (_, (node, partition_ids)) in grouped {
            let cluster = cluster.clone();
            let listener = listener.clone();
            let executor = executor.clone();
            let tracker = tracker.clone();
            let policy_base = policy.base.clone();
            let body = build_body(&partition_ids);

            tokio::spawn(async move {
                let command = MultiRecordCommand {
                    cluster,
                    node,
                    policy: policy_base,
                    body,
                    listener: listener.clone(),
                    tracker: Some(tracker.clone()),
                };
                // A failed child still counts toward the round (§4.9); its
                // partitions are left for the next retry round instead.
                let outcome = match command.execute().await {
                    Ok(()) => executor.child_success(""),
                    Err(_) => {
                        for id in &partition_ids {
                            tracker.partition_unavailable(*id);
                        }
                        executor.child_success("")
                    }
                };
                match outcome {
                    FanOutOutcome::Success { partial } => listener.success(partial),
                    FanOutOutcome::Failure(err) => listener.failure(err),
                    FanOutOutcome::Pending => {}
                }
            });
        }

        let (round_records, round_outcome) = collect(receiver).await;
        records.extend(round_records);
        if let Err(e) = round_outcome {
            return (records, Err(e));
        }

        if tracker.is_cluster_complete() {
            return (records, Ok(false));
        }
        if !tracker.begin_retry_round() {
            return (records, Ok(true));
        }
    }

    (records, Ok(tracker.unavailable_count() > 0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{ClusterState, Node, Partition, PartitionMap};
    use crate::options::ClientPolicy;
    use crate::wire::record::{Info3, RECORD_HEADER_LEN};
    use crate::wire::{FrameType, Header, HEADER_LEN};
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn record_group(info3: Info3) -> Vec<u8> {
        let mut record = vec![0u8; RECORD_HEADER_LEN];
        record[3] = info3.bits();
        let header = Header::new(FrameType::Message, 0, record.len() as u64).unwrap();
        let mut buf = header.to_bytes().to_vec();
        buf.extend_from_slice(&record);
        buf
    }

    fn partition_done_group(partition_id: u32, is_last: bool) -> Vec<u8> {
        let mut record = vec![0u8; RECORD_HEADER_LEN];
        let mut info3 = Info3::PARTITION_DONE;
        if is_last {
            info3 |= Info3::LAST;
        }
        record[3] = info3.bits();
        record[6..10].copy_from_slice(&partition_id.to_be_bytes());
        let header = Header::new(FrameType::Message, 0, record.len() as u64).unwrap();
        let mut buf = header.to_bytes().to_vec();
        buf.extend_from_slice(&record);
        buf
    }

    /// Replies with one plain record followed by a PARTITION_DONE marker for every
    /// requested partition, the owning node's single child command reading all of
    /// them off one connection.
    async fn server_streaming_partitions(partition_ids: Vec<u32>) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let (mut socket, _) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(_) => return,
                };
                let partition_ids = partition_ids.clone();
                tokio::spawn(async move {
                    let mut req_header = [0u8; HEADER_LEN];
                    if socket.read_exact(&mut req_header).await.is_err() {
                        return;
                    }
                    let size = Header::from_bytes(&req_header).unwrap().size as usize;
                    let mut req_body = vec![0u8; size];
                    let _ = socket.read_exact(&mut req_body).await;
                    let last_index = partition_ids.len().saturating_sub(1);
                    for (i, &id) in partition_ids.iter().enumerate() {
                        let _ = socket.write_all(&record_group(Info3::empty())).await;
                        let _ = socket
                            .write_all(&partition_done_group(id, i == last_index))
                            .await;
                    }
                    tokio::time::sleep(std::time::Duration::from_secs(60)).await;
                });
            }
        });
        addr
    }

    fn single_node_full_map_cluster_with(addr: SocketAddr, ids: Vec<u32>) -> (Arc<Cluster>, Vec<u32>) {
        let cluster = Cluster::new(ClientPolicy::default());
        let node = Node::new("n1", addr, &cluster.policy);
        let mut map = PartitionMap::new(1);
        for &id in &ids {
            map.set(Partition {
                namespace: "test".into(),
                partition_id: id,
                replicas: vec![node.clone()],
            });
        }
        cluster.apply_state(ClusterState {
            generation: 1,
            nodes: vec![node],
            partition_map: Arc::new(map),
        });
        (cluster, ids)
    }

    #[tokio::test]
    async fn scan_completes_once_every_partition_reports_done() {
        let ids: Vec<u32> = (0..4).collect();
        let addr = server_streaming_partitions(ids.clone()).await;
        let (cluster, ids) = single_node_full_map_cluster_with(addr, ids);

        let (records, outcome) =
            execute_scan(cluster, "test", ids, |_| vec![1u8], ScanPolicy::default()).await;
        assert_eq!(records.len(), 4);
        assert!(!outcome.unwrap());
    }

    #[tokio::test]
    async fn unreachable_node_is_reported_partial_after_retry_budget() {
        let cluster = Cluster::new(ClientPolicy::default());
        let node = Node::new("n1", "127.0.0.1:1".parse().unwrap(), &cluster.policy);
        let mut map = PartitionMap::new(1);
        map.set(Partition {
            namespace: "test".into(),
            partition_id: 0,
            replicas: vec![node.clone()],
        });
        cluster.apply_state(ClusterState {
            generation: 1,
            nodes: vec![node],
            partition_map: Arc::new(map),
        });

        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let policy = ScanPolicy::builder().max_retry_rounds(1).build();
        let (records, outcome) = execute_scan(
            cluster,
            "test",
            vec![0],
            move |_| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                vec![1u8]
            },
            policy,
        )
        .await;
        assert!(records.is_empty());
        assert!(outcome.unwrap());
        assert!(calls.load(Ordering::SeqCst) >= 1);
    }
}
