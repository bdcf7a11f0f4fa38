//! `TimeoutWheel` (§4.5): one background task per [`crate::Cluster`] that advances
//! command deadlines and triggers cancellation.
//!
//! The spec's "doubly-linked internal list" is implemented here as a plain
//! `Vec<Entry>` walked front-to-back once per wake: Rust's ownership model makes a
//! real intrusive linked list impractical without `unsafe`, and a single-pass walk
//! appending still-alive entries to a fresh `Vec` gives the same externally
//! observable behavior (§9 open question is not implicated here — this is a pure
//! implementation-strategy substitution, not a semantics change).

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

/// A command (or connection recovery drain) registered with the wheel.
pub trait Timeoutable: Send + Sync {
    /// Returns `true` if the entry is still alive and should remain on the wheel.
    /// Returns `false` once the command has completed on its own, or after this call
    /// has itself driven the command to a timeout (flipping its completion latch and
    /// closing its connection, per §4.5).
    fn check_timeout(&self, now: Instant) -> bool;
}

struct Entry {
    deadline: Instant,
    timeoutable: Arc<dyn Timeoutable>,
}

enum WheelMessage {
    Enqueue(Entry),
}

/// The handle a [`crate::Cluster`] holds. Dropping it stops the background task.
pub struct TimeoutWheel {
    sender: mpsc::UnboundedSender<WheelMessage>,
    notify: Arc<Notify>,
    handle: JoinHandle<()>,
}

impl TimeoutWheel {
    pub fn start() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let notify = Arc::new(Notify::new());
        let worker_notify = notify.clone();
        let handle = tokio::spawn(Self::run(receiver, worker_notify));
        Self {
            sender,
            notify,
            handle,
        }
    }

    /// Registers `timeoutable` to be checked at `deadline`.
    pub fn enqueue(&self, deadline: Instant, timeoutable: Arc<dyn Timeoutable>) {
        let interrupt = self
            .sender
            .send(WheelMessage::Enqueue(Entry {
                deadline,
                timeoutable,
            }))
            .is_ok();
        if interrupt {
            self.notify.notify_one();
        }
    }

    async fn run(mut receiver: mpsc::UnboundedReceiver<WheelMessage>, notify: Arc<Notify>) {
        let mut entries: Vec<Entry> = Vec::new();
        loop {
            let sleep_for = entries
                .iter()
                .map(|e| e.deadline.saturating_duration_since(Instant::now()))
                .min()
                .map(|d| d + Duration::from_millis(1))
                .unwrap_or(Duration::from_secs(3600));

            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {}
                _ = notify.notified() => {}
                msg = receiver.recv() => {
                    match msg {
                        Some(WheelMessage::Enqueue(entry)) => entries.push(entry),
                        None => return,
                    }
                }
            }

            // Drain any additional enqueues that arrived alongside the one above.
            while let Ok(WheelMessage::Enqueue(entry)) = receiver.try_recv() {
                entries.push(entry);
            }

            let now = Instant::now();
            let mut still_alive = Vec::with_capacity(entries.len());
            for entry in entries.drain(..) {
                if entry.timeoutable.check_timeout(now) {
                    still_alive.push(entry);
                }
            }
            entries = still_alive;
        }
    }
}

impl Drop for TimeoutWheel {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    struct CountingTimeoutable {
        deadline: Instant,
        fired: AtomicBool,
        checks: AtomicU32,
    }

    impl Timeoutable for CountingTimeoutable {
        fn check_timeout(&self, now: Instant) -> bool {
            self.checks.fetch_add(1, Ordering::SeqCst);
            if now >= self.deadline {
                self.fired.store(true, Ordering::SeqCst);
                false
            } else {
                true
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn entry_fires_at_its_deadline() {
        let wheel = TimeoutWheel::start();
        let entry = Arc::new(CountingTimeoutable {
            deadline: Instant::now() + Duration::from_millis(50),
            fired: AtomicBool::new(false),
            checks: AtomicU32::new(0),
        });
        wheel.enqueue(entry.deadline, entry.clone());

        tokio::time::advance(Duration::from_millis(80)).await;
        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_millis(1)).await;
        tokio::task::yield_now().await;

        assert!(entry.fired.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn completed_entry_is_not_touched_again() {
        let wheel = TimeoutWheel::start();
        let entry = Arc::new(CountingTimeoutable {
            deadline: Instant::now() + Duration::from_millis(10),
            fired: AtomicBool::new(false),
            checks: AtomicU32::new(0),
        });
        wheel.enqueue(entry.deadline, entry.clone());
        tokio::time::advance(Duration::from_millis(20)).await;
        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_secs(10)).await;
        tokio::task::yield_now().await;

        // Once dropped from the wheel after firing, subsequent wheel sweeps (from
        // the long advance above) must not invoke it again.
        let checks_after_fire = entry.checks.load(Ordering::SeqCst);
        assert!(entry.fired.load(Ordering::SeqCst));
        assert!(checks_after_fire >= 1);
    }
}
