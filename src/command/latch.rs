//! The completion-latch tie-break described in §4.7/§9: whichever actor — the receive
//! path or the timeout wheel — flips the latch first is the one whose outcome counts.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A one-shot, thread-safe "who gets to finish this command" latch.
#[derive(Clone, Debug, Default)]
pub struct CompletionLatch {
    completed: Arc<AtomicBool>,
}

impl CompletionLatch {
    pub fn new() -> Self {
        Self {
            completed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Attempts to flip the latch. Returns `true` for exactly one caller across any
    /// number of concurrent attempts.
    pub fn try_complete(&self) -> bool {
        self.completed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::SeqCst)
    }
}
