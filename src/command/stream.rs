//! `MultiRecordCommand` (§4.8's "MultiCommandStateMachine"): like
//! [`super::single::SingleRecordCommand`] but drives one node's framed sequence of
//! record groups into a [`Listener`] instead of parsing a single `Record`. Used as
//! the per-node child of a batch, scan, or query fan-out.
//!
//! Shares [`super::single::SingleRecordCommand`]'s admission/timeout wiring
//! (`CompletionLatch` + `DeadlineMarker`) rather than duplicating it; the only real
//! difference is what "done" means — here it's `GroupOutcome::End` or a group's
//! `LAST` bit, not one parsed record.

use std::sync::Arc;
use std::time::Instant;

use crate::cluster::{Cluster, Node};
use crate::error::{Error, Result, ResultCode};
use crate::fanout::PartitionTracker;
use crate::listener::Listener;
use crate::options::CommandPolicy;
use crate::wire::{FrameType, Header, HEADER_LEN};

use super::multi::{read_group, GroupOutcome};
use super::{CompletionLatch, DeadlineMarker};

/// One node's share of a multi-record command. Reports every record and the
/// terminal outcome through `listener`; never returns parsed data directly, since a
/// fan-out's whole point is that several of these run concurrently against
/// different nodes and feed one shared sink.
pub struct MultiRecordCommand {
    pub cluster: Arc<Cluster>,
    pub node: Arc<Node>,
    pub policy: CommandPolicy,
    pub body: Vec<u8>,
    pub listener: Listener,
    /// Present for scan/query, so a PARTITION_DONE marker updates per-partition
    /// progress; `None` for a batch-get child, which has no partition concept.
    pub tracker: Option<Arc<PartitionTracker>>,
}

impl MultiRecordCommand {
    pub async fn execute(self) -> Result<()> {
        let guard = self.cluster.admission.admit().await?;
        let start = Instant::now();
        let deadline = start + self.policy.total_timeout;
        let latch = CompletionLatch::new();
        self.cluster.timeout_wheel.enqueue(
            deadline,
            Arc::new(DeadlineMarker {
                deadline,
                latch: latch.clone(),
            }),
        );

        let result = self.drive(&latch).await;
        latch.try_complete();
        drop(guard);

        match &result {
            Ok(()) => self.listener.success(false),
            Err(e) => self.listener.failure(e.clone()),
        }
        result
    }

    async fn drive(&self, latch: &CompletionLatch) -> Result<()> {
        let mut conn = self.node.pool.checkout().await?;
        let frame = self.build_frame()?;
        if let Err(e) = conn.send(&frame).await {
            self.node.decrease_health();
            self.node.pool.discard(conn);
            return Err(e);
        }

        loop {
            if latch.is_completed() {
                self.node.pool.discard(conn);
                return Err(Error::timeout(self.policy.total_timeout, self.policy.total_timeout));
            }
            match read_group(&mut conn).await {
                Ok(GroupOutcome::Record { record, is_last }) => {
                    self.listener.record(record);
                    if is_last {
                        self.node.restore_health();
                        self.node.pool.checkin(conn);
                        return Ok(());
                    }
                }
                Ok(GroupOutcome::PartitionDone {
                    partition_id,
                    result_code,
                    is_last,
                }) => {
                    if let Some(tracker) = &self.tracker {
                        if result_code == ResultCode::Ok {
                            tracker.set_last(partition_id as u32, [0u8; 20], true);
                        } else {
                            tracker.partition_unavailable(partition_id as u32);
                        }
                    }
                    if is_last {
                        self.node.restore_health();
                        self.node.pool.checkin(conn);
                        return Ok(());
                    }
                }
                Ok(GroupOutcome::End) => {
                    self.node.restore_health();
                    self.node.pool.checkin(conn);
                    return Ok(());
                }
                Err(e) => {
                    self.node.decrease_health();
                    self.node.pool.discard(conn);
                    return Err(e);
                }
            }
        }
    }

    fn build_frame(&self) -> Result<Vec<u8>> {
        let header = Header::new(FrameType::Message, 0, self.body.len() as u64)?;
        let mut frame = Vec::with_capacity(HEADER_LEN + self.body.len());
        frame.extend_from_slice(&header.to_bytes());
        frame.extend_from_slice(&self.body);
        Ok(frame)
    }
}
