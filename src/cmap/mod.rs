//! `NodeConnectionPool` (§4.3): a bounded collection of idle connections per node.
//!
//! Grounded in the teacher's earlier-generation `cmap::ConnectionPool`
//! (`Arc<ConnectionPoolInner>` holding `AtomicU32` counters plus a mutex-guarded idle
//! `Vec`) rather than its actor-per-pool rewrite — this shape is the direct match for
//! the spec's "single mutex, atomic counters" requirement (§5).

pub mod conn;
pub mod recover;

pub use conn::Connection;
pub use recover::ConnectionRecover;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::options::ClientPolicy;

#[derive(Debug)]
struct Inner {
    address: SocketAddr,
    max_conns: u32,
    min_conns: u32,
    max_idle: Duration,
    idle: Mutex<Vec<Connection>>,
    total_opened: AtomicU32,
    recovered: AtomicU32,
    in_flight: AtomicU32,
    next_id: AtomicU32,
    active: std::sync::atomic::AtomicBool,
}

/// Per-node bounded idle-connection pool. Cloning shares the same underlying state
/// (cheap `Arc` clone), mirroring the teacher's `ConnectionPool`/`ConnectionPoolInner`
/// split.
#[derive(Clone, Debug)]
pub struct NodeConnectionPool {
    inner: Arc<Inner>,
}

impl NodeConnectionPool {
    pub fn new(address: SocketAddr, policy: &ClientPolicy) -> Self {
        Self {
            inner: Arc::new(Inner {
                address,
                max_conns: policy.async_max_conns_per_node,
                min_conns: policy.async_min_conns_per_node,
                max_idle: policy.max_socket_idle,
                idle: Mutex::new(Vec::new()),
                total_opened: AtomicU32::new(0),
                recovered: AtomicU32::new(0),
                in_flight: AtomicU32::new(0),
                next_id: AtomicU32::new(1),
                active: std::sync::atomic::AtomicBool::new(true),
            }),
        }
    }

    pub fn total_opened(&self) -> u32 {
        self.inner.total_opened.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> u32 {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    pub fn recovered(&self) -> u32 {
        self.inner.recovered.load(Ordering::SeqCst)
    }

    pub fn idle_len(&self) -> usize {
        self.inner.idle.lock().unwrap().len()
    }

    /// Pops the first valid idle connection, discarding stale ones along the way.
    /// Returns `None` if the pool has no usable idle connection (the caller then
    /// either opens a new one, per the §4.3 policy, or fails with
    /// `NoMoreConnections`).
    fn pop_idle(&self) -> Option<Connection> {
        let mut idle = self.inner.idle.lock().unwrap();
        while let Some(conn) = idle.pop() {
            if conn.is_valid(self.inner.max_idle) {
                return Some(conn);
            }
            drop(idle);
            self.close_one(conn);
            idle = self.inner.idle.lock().unwrap();
        }
        None
    }

    /// Checks out a connection: reuse an idle one, or open a new one if under the
    /// per-node cap. Fails with [`Error::no_more_connections`] at the cap (§4.3's
    /// policy paragraph): the slot is reserved (total_opened incremented) before the
    /// socket is established, so concurrent checkouts cannot overshoot the cap.
    pub async fn checkout(&self) -> Result<Connection> {
        if let Some(conn) = self.pop_idle() {
            self.inner.in_flight.fetch_add(1, Ordering::SeqCst);
            crate::trace::pool_checkout(&self.inner.address.to_string(), conn.id);
            return Ok(conn);
        }

        let reserved = self
            .inner
            .total_opened
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                if n < self.inner.max_conns {
                    Some(n + 1)
                } else {
                    None
                }
            });

        if reserved.is_err() {
            return Err(Error::no_more_connections(self.inner.address));
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst) as u64;
        match Connection::connect(id, self.inner.address).await {
            Ok(conn) => {
                self.inner.in_flight.fetch_add(1, Ordering::SeqCst);
                crate::trace::pool_create(&self.inner.address.to_string(), id);
                Ok(conn)
            }
            Err(e) => {
                self.inner.total_opened.fetch_sub(1, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    /// Returns `conn` to the idle set, unless the node has been retired or the pool
    /// is already at capacity, in which case it is closed (§4.3).
    pub fn checkin(&self, conn: Connection) {
        self.inner.in_flight.fetch_sub(1, Ordering::SeqCst);
        if !self.inner.active.load(Ordering::SeqCst) {
            self.close_one(conn);
            return;
        }
        let mut idle = self.inner.idle.lock().unwrap();
        if idle.len() as u32 >= self.inner.max_conns {
            drop(idle);
            self.close_one(conn);
            return;
        }
        crate::trace::pool_checkin(&self.inner.address.to_string(), conn.id, false);
        idle.push(conn);
    }

    /// Closes `conn` and releases its slot, without attempting to return it to the
    /// idle set. Used when a command learns the connection is no longer at a clean
    /// protocol boundary (an unsupported frame, a stale node) even though no I/O
    /// error occurred.
    pub fn discard(&self, conn: Connection) {
        self.close_one(conn);
    }

    /// A connection recovered after its command timed out mid-response
    /// ([`ConnectionRecover`]) re-enters the idle set through here rather than
    /// `checkin`, so the recovered counter can be tracked separately per §4.3.
    pub fn checkin_recovered(&self, conn: Connection) {
        self.inner.recovered.fetch_add(1, Ordering::SeqCst);
        self.checkin(conn);
    }

    fn close_one(&self, conn: Connection) {
        crate::trace::pool_close(&self.inner.address.to_string(), conn.id);
        conn.close();
        self.inner.total_opened.fetch_sub(1, Ordering::SeqCst);
    }

    /// Opens connections until `total_opened >= asyncMinConnsPerNode` (§4.3's
    /// min-fill routine). Typically driven by a periodic maintenance task.
    pub async fn min_fill(&self) {
        loop {
            let current = self.inner.total_opened.load(Ordering::SeqCst);
            if current >= self.inner.min_conns || !self.inner.active.load(Ordering::SeqCst) {
                return;
            }
            if self
                .inner
                .total_opened
                .compare_exchange(current, current + 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                continue;
            }
            let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst) as u64;
            match Connection::connect(id, self.inner.address).await {
                Ok(conn) => self.inner.idle.lock().unwrap().push(conn),
                Err(_) => {
                    self.inner.total_opened.fetch_sub(1, Ordering::SeqCst);
                    return;
                }
            }
        }
    }

    /// Closes and discards idle connections that have been sitting past
    /// `max_socket_idle`, without touching checked-out connections.
    pub fn reap_idle(&self) {
        let stale: Vec<Connection> = {
            let mut idle = self.inner.idle.lock().unwrap();
            let (fresh, stale): (Vec<_>, Vec<_>) = idle
                .drain(..)
                .partition(|c| c.is_valid(self.inner.max_idle));
            *idle = fresh;
            stale
        };
        for conn in stale {
            self.close_one(conn);
        }
    }

    /// Closes every pooled connection and marks the pool inactive so future
    /// check-ins are discarded rather than recycled (§4.3, node-shutdown path).
    pub async fn close_all(&self) {
        self.inner.active.store(false, Ordering::SeqCst);
        let idle: Vec<Connection> = std::mem::take(&mut *self.inner.idle.lock().unwrap());
        for conn in idle {
            self.close_one(conn);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn accepting_server() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((socket, _)) => {
                        tokio::spawn(async move {
                            let _socket = socket;
                            tokio::time::sleep(Duration::from_secs(60)).await;
                        });
                    }
                    Err(_) => return,
                }
            }
        });
        addr
    }

    fn policy(max_conns: u32) -> ClientPolicy {
        ClientPolicy::builder()
            .async_max_conns_per_node(max_conns)
            .async_min_conns_per_node(0)
            .build()
    }

    #[tokio::test]
    async fn checkout_then_checkin_returns_the_same_connection() {
        let addr = accepting_server().await;
        let pool = NodeConnectionPool::new(addr, &policy(2));
        let conn = pool.checkout().await.unwrap();
        let id = conn.id;
        pool.checkin(conn);
        let reused = pool.checkout().await.unwrap();
        assert_eq!(reused.id, id);
        assert_eq!(pool.total_opened(), 1);
    }

    #[tokio::test]
    async fn exceeding_max_conns_fails_with_no_more_connections() {
        let addr = accepting_server().await;
        let pool = NodeConnectionPool::new(addr, &policy(1));
        let _first = pool.checkout().await.unwrap();
        let second = pool.checkout().await;
        assert!(second.is_err());
        assert_eq!(pool.total_opened(), 1);
    }

    #[tokio::test]
    async fn idle_aged_connection_is_not_returned() {
        let addr = accepting_server().await;
        let pool = NodeConnectionPool::new(addr, &ClientPolicy::builder()
            .async_max_conns_per_node(2)
            .async_min_conns_per_node(0)
            .max_socket_idle(Duration::from_millis(0))
            .build());
        let conn = pool.checkout().await.unwrap();
        pool.checkin(conn);
        tokio::time::sleep(Duration::from_millis(5)).await;
        let fresh = pool.checkout().await.unwrap();
        // A brand-new connection was opened since the idle one aged out.
        assert_eq!(pool.total_opened(), 1);
        drop(fresh);
    }

    #[tokio::test]
    async fn min_fill_opens_connections_up_to_the_floor() {
        let addr = accepting_server().await;
        let pool = NodeConnectionPool::new(
            addr,
            &ClientPolicy::builder()
                .async_max_conns_per_node(5)
                .async_min_conns_per_node(3)
                .build(),
        );
        pool.min_fill().await;
        assert_eq!(pool.total_opened(), 3);
        assert_eq!(pool.idle_len(), 3);
    }

    #[tokio::test]
    async fn close_all_discards_idle_connections() {
        let addr = accepting_server().await;
        let pool = NodeConnectionPool::new(addr, &policy(2));
        let conn = pool.checkout().await.unwrap();
        pool.checkin(conn);
        pool.close_all().await;
        assert_eq!(pool.idle_len(), 0);
        assert_eq!(pool.total_opened(), 0);
    }
}
