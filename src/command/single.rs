//! `SingleRecordCommand` (§4.7): connect → write → read → parse → retry → finish.
//!
//! Grounded in the teacher's `Operation`/`OperationWithDefaults` split (`operation.rs`):
//! this crate keeps the same idea — a small tagged [`super::CommandKind`] rather than
//! a trait-object hierarchy — so each retry attempt is a cheap clone of a plain struct.
//!
//! A note on the body-read loop: `tokio::io::AsyncReadExt::read_exact` is not safe to
//! cancel mid-flight — bytes already pulled off the socket are gone even though the
//! future never resolved, which would desync the wire framing for whatever runs on the
//! connection next. So this driver never races a read against the deadline with
//! `select!`. It reads the body in bounded chunks and only checks the deadline between
//! chunks (a safe point — each chunk's `recv` either fully lands or the connection is
//! already dead). If the deadline has passed by the time a chunk boundary is reached,
//! the remaining bytes are handed to [`crate::cmap::recover::ConnectionRecover`] as a
//! detached task rather than read further on this call stack.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::cluster::Cluster;
use crate::cmap::recover::{ConnectionRecover, RecoverMode};
use crate::cmap::Connection;
use crate::error::{Error, Result, ResultCode};
use crate::options::CommandPolicy;
use crate::txn::MrtContext;
use crate::wire::record::{parse_fields, parse_ops, RecordHeader, RECORD_HEADER_LEN};
use crate::wire::{FrameType, Header, HEADER_LEN};

use super::{CommandKind, CompletionLatch, DeadlineMarker, Record};

const BODY_CHUNK: usize = 4096;

/// A single key-addressed command: policy, target coordinates, and a pre-encoded
/// request body (wire encoding of individual opcodes is out of scope, §1).
pub struct SingleRecordCommand {
    pub cluster: Arc<Cluster>,
    pub kind: CommandKind,
    pub namespace: String,
    pub digest: [u8; 20],
    pub policy: CommandPolicy,
    pub body: Vec<u8>,
    /// Present when this write participates in a multi-record transaction, so an
    /// in-doubt outcome can escalate to the transaction context (§4.7's
    /// `OnWriteInDoubt(key)`) rather than only being wrapped in the returned error.
    pub mrt: Option<Arc<MrtContext>>,
}

impl SingleRecordCommand {
    /// Drives the command to completion, retrying per §4.7's rules. Returns the
    /// in-doubt-wrapped error for a write that may have applied but was never
    /// decisively acknowledged.
    pub async fn execute(self) -> Result<Record> {
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

        let mut attempt: u32 = 0;
        let mut sent_but_undecided = false;
        loop {
            if latch.is_completed() {
                crate::trace::command_timeout(attempt);
                return Err(Error::timeout(start.elapsed(), self.policy.total_timeout));
            }

            match self
                .try_once(attempt, &latch, &mut sent_but_undecided)
                .await
            {
                Ok(record) => {
                    // If the timeout wheel already flipped the latch, it won the
                    // arbitration (§4.7/§9's "losers become no-ops") and this
                    // result must not be reported as success.
                    if !latch.try_complete() {
                        drop(guard);
                        crate::trace::command_timeout(attempt);
                        return Err(Error::timeout(start.elapsed(), self.policy.total_timeout));
                    }
                    drop(guard);
                    return Ok(record);
                }
                Err(e) if e.is_retryable() && attempt < self.policy.max_retries => {
                    let node_name = self.resolve_node(attempt).map(|node| {
                        node.decrease_health();
                        node.name.clone()
                    });
                    crate::trace::command_retry(attempt, node_name.as_deref().unwrap_or("?"));
                    attempt += 1;
                    let elapsed = start.elapsed();
                    if elapsed + self.policy.sleep_between_retries >= self.policy.total_timeout {
                        latch.try_complete();
                        drop(guard);
                        crate::trace::command_timeout(attempt);
                        return Err(Error::timeout(elapsed, self.policy.total_timeout));
                    }
                    tokio::time::sleep(self.policy.sleep_between_retries).await;
                    continue;
                }
                Err(e) => {
                    latch.try_complete();
                    drop(guard);
                    if sent_but_undecided && self.kind.is_write() {
                        if let Some(mrt) = &self.mrt {
                            mrt.on_write_in_doubt(self.digest);
                        }
                        crate::trace::command_in_doubt(attempt);
                        return Err(Error::in_doubt(Box::new(e)));
                    }
                    return Err(e);
                }
            }
        }
    }

    fn resolve_node(&self, attempt: u32) -> Option<Arc<crate::cluster::Node>> {
        let state = self.cluster.state();
        let partition = state.partition_map.for_digest(&self.digest)?;
        partition.select_replica(self.policy.replica_policy, attempt)
    }

    async fn try_once(
        &self,
        attempt: u32,
        latch: &CompletionLatch,
        sent_but_undecided: &mut bool,
    ) -> Result<Record> {
        let node = self
            .resolve_node(attempt)
            .ok_or_else(|| Error::invalid_node("no replica available for this partition"))?;
        if !node.is_alive() {
            return Err(Error::invalid_node(format!("node {} is not alive", node.name)));
        }

        let mut conn = node.pool.checkout().await?;

        let frame = self.build_frame()?;
        conn.send(&frame).await?;
        *sent_but_undecided = self.kind.is_write();

        let mut header_buf = [0u8; HEADER_LEN];
        conn.recv(&mut header_buf).await?;
        let header = Header::from_bytes(&header_buf)?;

        if header.size == 0 {
            node.restore_health();
            node.pool.checkin(conn);
            return Ok(Record {
                result_code: ResultCode::Ok,
                generation: 0,
                expiration: 0,
                bins: Vec::new(),
            });
        }

        if header.is_compressed() {
            node.pool.discard(conn);
            return Err(Error::internal("compressed single-record responses are not supported"));
        }

        let body = match self
            .read_body_cooperatively(&mut conn, header.size as usize, latch)
            .await
        {
            Ok(body) => body,
            Err(RecoveryHandoff { consumed }) => {
                let timeout_delay = self.policy.timeout_delay;
                let remaining = (header.size as usize - consumed) as u64;
                let pool = node.pool.clone();
                tokio::spawn(async move {
                    let recover = ConnectionRecover::new(pool, timeout_delay);
                    let _ = recover
                        .recover(conn, RecoverMode::Single { remaining })
                        .await;
                });
                return Err(Error::timeout(self.policy.total_timeout, self.policy.total_timeout));
            }
        };

        let record_header = RecordHeader::parse(&body)?;
        let rest = &body[RECORD_HEADER_LEN..];
        let (fields, consumed) = parse_fields(rest, record_header.field_count)?;
        let (ops, _) = parse_ops(&rest[consumed..], record_header.op_count)?;
        let _ = fields;
        let record = Record::from_wire(&record_header, &ops);

        *sent_but_undecided = false;
        node.restore_health();

        if record.result_code == ResultCode::Ok || record.result_code.keeps_connection() {
            node.pool.checkin(conn);
        } else {
            node.pool.discard(conn);
        }

        if record.result_code != ResultCode::Ok {
            return Err(Error::server(record.result_code));
        }
        Ok(record)
    }

    /// Reads `body_len` bytes in [`BODY_CHUNK`]-sized pieces, checking the shared
    /// deadline latch between chunks (never mid-chunk — see the module doc comment).
    /// On a deadline hit, `RecoveryHandoff::consumed` is exactly the number of bytes
    /// already landed, since every completed chunk's `recv` fully succeeded before the
    /// next check runs.
    async fn read_body_cooperatively(
        &self,
        conn: &mut Connection,
        body_len: usize,
        latch: &CompletionLatch,
    ) -> std::result::Result<Vec<u8>, RecoveryHandoff> {
        let mut body = vec![0u8; body_len];
        let mut offset = 0;
        while offset < body_len {
            if latch.is_completed() {
                return Err(RecoveryHandoff { consumed: offset });
            }
            let end = (offset + BODY_CHUNK).min(body_len);
            conn.recv(&mut body[offset..end])
                .await
                .map_err(|_| RecoveryHandoff { consumed: offset })?;
            offset = end;
        }
        Ok(body)
    }

    fn build_frame(&self) -> Result<Vec<u8>> {
        let header = Header::new(FrameType::Message, 0, self.body.len() as u64)?;
        let mut frame = Vec::with_capacity(HEADER_LEN + self.body.len());
        frame.extend_from_slice(&header.to_bytes());
        frame.extend_from_slice(&self.body);
        Ok(frame)
    }
}

struct RecoveryHandoff {
    consumed: usize,
}
