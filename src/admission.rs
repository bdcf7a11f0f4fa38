//! `AdmissionScheduler` (§4.6): gates command start against `asyncMaxCommands` with
//! reject / block / delay policies. Grounded in the teacher's atomic-counter CMAP
//! pattern (`cmap::mod::ConnectionPoolInner`'s `AtomicU32` counters), adapted from
//! connection counting to command admission.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{oneshot, Semaphore};

use crate::error::{Error, Result};
use crate::options::AdmissionAction;

struct DelayQueue {
    waiters: Mutex<VecDeque<oneshot::Sender<()>>>,
    bound: u32,
}

/// Bounds the number of commands admitted concurrently against `asyncMaxCommands`.
pub struct AdmissionScheduler {
    action: AdmissionAction,
    limit: u32,
    in_flight: AtomicU32,
    /// Used only under `Block`: a permit-per-slot semaphore.
    semaphore: Semaphore,
    /// Used only under `Delay`: a FIFO of tasks waiting for a slot.
    delay_queue: DelayQueue,
}

/// RAII guard returned by [`AdmissionScheduler::admit`]. Dropping it releases the
/// in-flight slot and advances the delay queue, per §4.6's
/// "admission and buffer lifetime are intentionally coupled" note — callers attach
/// the command's [`crate::buffer::BufferSegment`] alongside this guard and let both
/// drop together.
pub struct AdmissionGuard {
    scheduler: Arc<AdmissionScheduler>,
    released: bool,
}

impl AdmissionScheduler {
    pub fn new(action: AdmissionAction, limit: u32, queue_bound: u32) -> Self {
        Self {
            action,
            limit,
            in_flight: AtomicU32::new(0),
            // `Semaphore::new(0)` is valid and gives `async_max_commands = 0` the
            // "suspends indefinitely under BLOCK" semantics §8 requires; seeding a
            // phantom permit here would let the first admit through instead.
            semaphore: Semaphore::new(limit as usize),
            delay_queue: DelayQueue {
                waiters: Mutex::new(VecDeque::new()),
                bound: queue_bound,
            },
        }
    }

    pub fn in_flight(&self) -> u32 {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Admits a command per the configured policy. On success, returns a guard whose
    /// drop releases the slot.
    pub async fn admit(self: &Arc<Self>) -> Result<AdmissionGuard> {
        match self.action {
            AdmissionAction::Reject => self.admit_reject(),
            AdmissionAction::Block => self.admit_block().await,
            AdmissionAction::Delay => self.admit_delay().await,
        }
    }

    fn admit_reject(self: &Arc<Self>) -> Result<AdmissionGuard> {
        let previous = self.in_flight.fetch_add(1, Ordering::SeqCst);
        if previous + 1 > self.limit {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            crate::trace::admission_reject(previous + 1, self.limit);
            return Err(Error::rejected(previous + 1, self.limit));
        }
        Ok(AdmissionGuard {
            scheduler: self.clone(),
            released: false,
        })
    }

    async fn admit_block(self: &Arc<Self>) -> Result<AdmissionGuard> {
        // forget() hands the permit's slot accounting to `in_flight`; the guard's
        // drop performs the matching `add_permits`.
        let permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| Error::internal("admission semaphore closed"))?;
        permit.forget();
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        Ok(AdmissionGuard {
            scheduler: self.clone(),
            released: false,
        })
    }

    async fn admit_delay(self: &Arc<Self>) -> Result<AdmissionGuard> {
        let previous = self.in_flight.fetch_add(1, Ordering::SeqCst);
        if previous < self.limit {
            return Ok(AdmissionGuard {
                scheduler: self.clone(),
                released: false,
            });
        }

        // At the limit: enqueue unless the (bounded) delay queue is full.
        let (tx, rx) = oneshot::channel();
        {
            let mut waiters = self.delay_queue.waiters.lock().unwrap();
            if self.delay_queue.bound != 0 && waiters.len() as u32 >= self.delay_queue.bound {
                drop(waiters);
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                crate::trace::admission_reject(previous + 1, self.limit);
                return Err(Error::rejected(previous + 1, self.limit));
            }
            waiters.push_back(tx);
            crate::trace::admission_delay_queued(waiters.len());
        }
        rx.await
            .map_err(|_| Error::internal("admission delay queue sender dropped"))?;
        Ok(AdmissionGuard {
            scheduler: self.clone(),
            released: false,
        })
    }

    /// Releases one in-flight slot and, under `Delay`, wakes the next FIFO waiter.
    fn release(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if self.action == AdmissionAction::Block {
            self.semaphore.add_permits(1);
        }
        if self.action == AdmissionAction::Delay {
            if let Some(next) = self.delay_queue.waiters.lock().unwrap().pop_front() {
                let _ = next.send(());
            }
        }
    }
}

impl AdmissionGuard {
    /// Explicit release; equivalent to dropping the guard, provided for call sites
    /// that want the release point to be visible at the call site.
    pub fn release(mut self) {
        self.do_release();
    }

    fn do_release(&mut self) {
        if !self.released {
            self.released = true;
            self.scheduler.release();
        }
    }
}

impl Drop for AdmissionGuard {
    fn drop(&mut self) {
        self.do_release();
    }
}
