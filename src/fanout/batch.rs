//! Batch-get fan-out (§8 scenario 4): splits a set of digest-addressed keys across
//! the nodes that own them and runs one [`SingleRecordCommand`] per key
//! concurrently, aggregating through a [`FanOutExecutor`]/[`Listener`] pair rather
//! than a `Vec<JoinHandle>` the caller has to reconcile by hand.
//!
//! Grounded in the teacher's `BulkWriteAction`/`run_all` pattern (group by server,
//! spawn a task per item, reconcile through a shared result collector) adapted from
//! a single write-concern aggregate to per-key row outcomes.

use std::sync::Arc;

use crate::cluster::Cluster;
use crate::command::{CommandKind, Record, SingleRecordCommand};
use crate::error::Result;
use crate::listener::{collect, Listener};
use crate::options::BatchPolicy;

use super::{FanOutExecutor, FanOutOutcome};

/// One key's pre-encoded request body plus its digest, as handed to
/// [`execute_batch`]. Wire encoding of the request body is out of scope (§1).
pub struct BatchKey {
    pub digest: [u8; 20],
    pub body: Vec<u8>,
}

/// Runs `keys` as concurrent [`SingleRecordCommand`]s and waits for every row to
/// report in. A row's application-level result code (key not found, filtered out,
/// ...) is a row error, not a batch failure (§4.9); only a network/timeout/
/// invalid-node failure that exhausts its own retries fails the whole batch.
pub async fn execute_batch(
    cluster: Arc<Cluster>,
    namespace: impl Into<String>,
    keys: Vec<BatchKey>,
    policy: BatchPolicy,
) -> (Vec<Record>, Result<bool>) {
    if keys.is_empty() {
        return (Vec::new(), Ok(false));
    }
    let namespace = namespace.into();
    let fail_on_cluster_change = policy.fail_on_cluster_change;
    let (listener, receiver) = Listener::channel();
    let executor = Arc::new(FanOutExecutor::new(keys.len() as u32));

    for key in keys {
        let cluster = cluster.clone();
        let namespace = namespace.clone();
        let listener = listener.clone();
        let executor = executor.clone();
        let command_policy = policy.base.clone();
        tokio::spawn(async move {
            let command = SingleRecordCommand {
                cluster,
                kind: CommandKind::Read,
                namespace,
                digest: key.digest,
                policy: command_policy,
                body: key.body,
                mrt: None,
            };
            // Exactly one child observes a non-Pending outcome from the executor
            // (the mutex in FanOutExecutor::resolve serializes the count check), so
            // exactly one of these spawned tasks raises the terminal listener event.
            let outcome = match command.execute().await {
                Ok(record) => {
                    listener.record(record);
                    executor.child_success("")
                }
                Err(e) if e.is_server_error() => {
                    listener.row_error(e);
                    executor.child_row_error("")
                }
                Err(e) if fail_on_cluster_change => executor.child_failure("", e),
                Err(e) => {
                    listener.row_error(e);
                    executor.child_row_error("")
                }
            };
            match outcome {
                FanOutOutcome::Success { partial } => listener.success(partial),
                FanOutOutcome::Failure(err) => listener.failure(err),
                FanOutOutcome::Pending => {}
            }
        });
    }

    collect(receiver).await
}
