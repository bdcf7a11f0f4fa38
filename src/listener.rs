//! Listener interfaces (§9): modeled as a sum type of events pushed through an
//! `mpsc` channel rather than a callback class hierarchy, so a fan-out command's
//! children can all report into the same sink from whichever worker task completed
//! them, and a single reader composes the aggregate result.
//!
//! Grounded in the teacher's `Cursor`/`GetMoreResult` streaming pattern (a channel
//! feeding an async iterator) adapted from "one stream of documents" to "one stream
//! of command events," since this layer also needs to carry success/failure/partial
//! outcomes, not just records.

use tokio::sync::mpsc;

use crate::command::Record;
use crate::error::Error;

/// One event raised over the lifetime of a command. `Record` may be raised any
/// number of times before exactly one of `Success`/`Failure` ends the stream.
#[derive(Debug)]
pub enum ListenerEvent {
    Record(Record),
    /// A row-level error on one child of a fan-out command (§4.9's `setRowError`):
    /// does not end the stream, but flips the terminal `Success.partial` flag.
    RowError(Error),
    Success { partial: bool },
    Failure(Error),
}

/// The write half of a listener channel. Cloned freely: every child of a fan-out
/// command holds its own clone and reports independently.
#[derive(Clone)]
pub struct Listener {
    sender: mpsc::UnboundedSender<ListenerEvent>,
}

impl Listener {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ListenerEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    /// Best-effort: if the receiver has already been dropped (the caller stopped
    /// listening), events are silently discarded rather than erroring the command.
    pub fn record(&self, record: Record) {
        let _ = self.sender.send(ListenerEvent::Record(record));
    }

    pub fn row_error(&self, error: Error) {
        let _ = self.sender.send(ListenerEvent::RowError(error));
    }

    pub fn success(&self, partial: bool) {
        let _ = self.sender.send(ListenerEvent::Success { partial });
    }

    pub fn failure(&self, error: Error) {
        let _ = self.sender.send(ListenerEvent::Failure(error));
    }
}

/// Drains `receiver` to completion, collecting every record plus the terminal
/// outcome. A convenience for callers (and tests) that want the whole result rather
/// than a live stream.
pub async fn collect(
    mut receiver: mpsc::UnboundedReceiver<ListenerEvent>,
) -> (Vec<Record>, Result<bool, Error>) {
    let mut records = Vec::new();
    let mut row_error = false;
    loop {
        match receiver.recv().await {
            Some(ListenerEvent::Record(record)) => records.push(record),
            Some(ListenerEvent::RowError(_)) => row_error = true,
            Some(ListenerEvent::Success { partial }) => {
                return (records, Ok(partial || row_error));
            }
            Some(ListenerEvent::Failure(error)) => return (records, Err(error)),
            None => return (records, Ok(row_error)),
        }
    }
}
