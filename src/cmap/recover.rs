//! `AsyncConnectionRecover` (§4.4): drains the tail of a timed-out command's response
//! so a warm connection can go back to its pool instead of being closed.
//!
//! Grounded in §9's `SocketConsumer` design note: the teacher achieves the equivalent
//! "who owns this connection's events" handoff with `PooledConnectionState`'s enum
//! swap in `cmap::conn::pooled`. Under tokio's per-task-owns-its-io model there is no
//! event dispatcher to rewire — recovery is simply an async task that takes ownership
//! of the `Connection` for the duration of the drain, which is the structural
//! equivalent of "wiring itself in as the new command".

use std::time::{Duration, Instant};

use tokio::io::AsyncReadExt;

use super::{Connection, NodeConnectionPool};
use crate::error::{Error, Result};
use crate::wire::record::{RecordHeader, RECORD_HEADER_LEN};
use crate::wire::{Header, HEADER_LEN};

/// Which protocol shape is being drained.
#[derive(Clone, Copy, Debug)]
pub enum RecoverMode {
    /// A single-record response with `remaining` bytes left in the current body.
    Single { remaining: u64 },
    /// A multi-record response: read frames until one's first record carries LAST.
    Multi,
    /// An in-flight authentication handshake: the next byte read is a one-byte result
    /// code that must be validated (§4.4's auth-drain note).
    Auth,
}

/// Drains a connection whose command timed out mid-response, per §4.4's contract.
pub struct ConnectionRecover {
    pool: NodeConnectionPool,
    deadline: Instant,
}

impl ConnectionRecover {
    pub fn new(pool: NodeConnectionPool, timeout_delay: Duration) -> Self {
        Self {
            pool,
            deadline: Instant::now() + timeout_delay,
        }
    }

    pub fn check_timeout(&self) -> bool {
        Instant::now() <= self.deadline
    }

    /// Attempts to drain `conn` under `mode`. On success the connection is returned
    /// to the pool via [`NodeConnectionPool::checkin_recovered`]; on any failure
    /// (deadline exceeded, I/O error, or a disallowed compressed body) the connection
    /// is closed and the failure is returned.
    pub async fn recover(self, mut conn: Connection, mode: RecoverMode) -> Result<()> {
        let remaining_budget = self.deadline.saturating_duration_since(Instant::now());
        let drain = async {
            match mode {
                RecoverMode::Single { remaining } => {
                    Self::drain_exact(&mut conn, remaining).await
                }
                RecoverMode::Multi => Self::drain_groups(&mut conn).await,
                RecoverMode::Auth => Self::drain_auth(&mut conn).await,
            }
        };

        match tokio::time::timeout(remaining_budget, drain).await {
            Ok(Ok(())) => {
                self.pool.checkin_recovered(conn);
                Ok(())
            }
            Ok(Err(e)) => {
                conn.close();
                Err(e)
            }
            Err(_) => {
                conn.close();
                Err(Error::timeout(remaining_budget, remaining_budget))
            }
        }
    }

    async fn drain_exact(conn: &mut Connection, remaining: u64) -> Result<()> {
        let mut remaining = remaining as usize;
        let mut scratch = [0u8; 4096];
        while remaining > 0 {
            let chunk = remaining.min(scratch.len());
            conn.recv(&mut scratch[..chunk]).await?;
            remaining -= chunk;
        }
        Ok(())
    }

    async fn drain_groups(conn: &mut Connection) -> Result<()> {
        loop {
            let mut header_buf = [0u8; HEADER_LEN];
            conn.recv(&mut header_buf).await?;
            let header = Header::from_bytes(&header_buf)?;

            // Decompressing solely to drain is disallowed (§4.4): abort and close.
            if header.is_compressed() {
                return Err(Error::internal(
                    "cannot recover a connection mid-compressed multi-record body",
                ));
            }

            if header.size == 0 {
                return Ok(());
            }

            let mut record_header_buf = [0u8; RECORD_HEADER_LEN];
            conn.recv(&mut record_header_buf).await?;
            let record_header = RecordHeader::parse(&record_header_buf)?;

            let remaining_in_body = header.size - RECORD_HEADER_LEN as u64;
            Self::drain_exact(conn, remaining_in_body).await?;

            if record_header.is_last() {
                return Ok(());
            }
        }
    }

    async fn drain_auth(conn: &mut Connection) -> Result<()> {
        let mut byte = [0u8; 1];
        conn.recv(&mut byte).await?;
        if byte[0] != 0 {
            return Err(Error::server(crate::error::ResultCode::from_u8(byte[0])));
        }
        Ok(())
    }
}
