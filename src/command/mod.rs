//! Command state machines (§4.7, §4.8): the per-command drivers that turn a
//! checked-out connection, a pre-encoded request body, and a policy into a parsed
//! [`Record`] or a terminal [`crate::Error`].
//!
//! Wire encoding of individual opcodes is out of scope (§1) — callers hand this
//! module an already-built request body; the state machine owns everything from
//! "frame it and send it" onward.

pub mod latch;
pub mod multi;
pub mod single;
pub mod stream;

pub use latch::CompletionLatch;
pub use multi::{read_group, GroupOutcome};
pub use single::SingleRecordCommand;
pub use stream::MultiRecordCommand;

use std::time::Instant;

use crate::error::ResultCode;
use crate::timeout_wheel::Timeoutable;
use crate::wire::record::{OpEntry, RecordHeader};

/// One bin (name, typed value) read off the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Bin {
    pub name: String,
    pub particle_type: u8,
    pub value: Vec<u8>,
}

/// A parsed record: the result code plus metadata and bins carried by one record
/// message (§6).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    pub result_code: ResultCode,
    pub generation: u32,
    pub expiration: u32,
    pub bins: Vec<Bin>,
}

impl Record {
    pub fn from_wire(header: &RecordHeader, ops: &[OpEntry<'_>]) -> Self {
        Record {
            result_code: ResultCode::from_u8(header.result_code),
            generation: header.generation,
            expiration: header.expiration,
            bins: ops
                .iter()
                .map(|op| Bin {
                    name: op.name.to_string(),
                    particle_type: op.particle_type,
                    value: op.particle.to_vec(),
                })
                .collect(),
        }
    }
}

/// The capability-table tag for a command (§9's flattening note): rather than a
/// trait-object hierarchy, each kind carries only the data the state machine needs to
/// decide write-accounting and connection-retention, so retrying a command is a cheap
/// struct clone instead of a virtual dispatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandKind {
    Read,
    Write,
    Delete,
    Operate,
}

impl CommandKind {
    pub fn is_write(self) -> bool {
        matches!(
            self,
            CommandKind::Write | CommandKind::Delete | CommandKind::Operate
        )
    }

    pub fn latency_category(self) -> &'static str {
        match self {
            CommandKind::Read => "read",
            CommandKind::Write => "write",
            CommandKind::Delete => "delete",
            CommandKind::Operate => "operate",
        }
    }
}

/// Registered with the [`crate::timeout_wheel::TimeoutWheel`] for the lifetime of one
/// [`SingleRecordCommand::execute`] call. Firing only flips the shared
/// [`CompletionLatch`] — all recovery/close bookkeeping happens cooperatively in the
/// command loop, which checks `is_completed()` between I/O stages (§4.7's tie-break
/// rule; see `single.rs` for why the connection itself is never forcibly cancelled
/// mid-read).
pub(crate) struct DeadlineMarker {
    pub(crate) deadline: Instant,
    pub(crate) latch: CompletionLatch,
}

impl Timeoutable for DeadlineMarker {
    fn check_timeout(&self, now: Instant) -> bool {
        if now >= self.deadline {
            self.latch.try_complete();
            false
        } else {
            true
        }
    }
}
