//! Configuration structs, grounded in the teacher's `ClientOptions`/`*Options`
//! `typed-builder` pattern (`client/options.rs`). Defaults are documented as
//! associated constants next to each struct, mirroring
//! `cmap::DEFAULT_MAX_POOL_SIZE`.

use std::time::Duration;

use typed_builder::TypedBuilder;

/// Admission policy selecting how `AdmissionScheduler::admit` behaves at the limit
/// (§4.6).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum AdmissionAction {
    /// Fail the command synchronously with `Rejected`.
    #[default]
    Reject,
    /// Suspend the admitting task until a slot frees up.
    Block,
    /// Enqueue in a bounded FIFO delay queue.
    Delay,
}

/// Cluster-wide configuration, analogous to the teacher's `ClientOptions`.
#[derive(Clone, Debug, TypedBuilder)]
pub struct ClientPolicy {
    /// Admission policy at `async_max_commands`.
    #[builder(default = AdmissionAction::Reject)]
    pub async_max_command_action: AdmissionAction,

    /// Global in-flight command limit.
    #[builder(default = ClientPolicy::DEFAULT_MAX_COMMANDS)]
    pub async_max_commands: u32,

    /// Delay-queue bound under `Delay` (0 = unbounded).
    #[builder(default = 0)]
    pub async_max_commands_in_queue: u32,

    /// Connections to pre-warm per node.
    #[builder(default = 1)]
    pub async_min_conns_per_node: u32,

    /// Per-node hard cap on pooled + checked-out connections.
    #[builder(default = 100)]
    pub async_max_conns_per_node: u32,

    /// Slab slot size; rounded up to an 8 KiB multiple by [`crate::buffer::BufferPool`].
    #[builder(default = 128 * 1024)]
    pub async_buffer_size: usize,

    /// Connection validity horizon: a pooled connection older than this is discarded.
    #[builder(default = Duration::from_secs(55 * 60))]
    pub max_socket_idle: Duration,
}

impl ClientPolicy {
    /// `asyncMaxCommands` default changed historically between 100 and 200 (§9's
    /// open question); this crate adopts 100, per the spec's explicit resolution.
    pub const DEFAULT_MAX_COMMANDS: u32 = 100;
}

impl Default for ClientPolicy {
    fn default() -> Self {
        ClientPolicy::builder().build()
    }
}

/// Replica selection policy for a key-addressed command (§3).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ReplicaPolicy {
    #[default]
    Master,
    MasterProles,
    Random,
    Sequence,
    PreferRack,
}

/// Per-command deadlines and retry budget (§6's per-command option row).
#[derive(Clone, Debug, TypedBuilder)]
pub struct CommandPolicy {
    #[builder(default = Duration::from_secs(30))]
    pub total_timeout: Duration,

    #[builder(default = Duration::from_secs(30))]
    pub socket_timeout: Duration,

    #[builder(default = 2)]
    pub max_retries: u32,

    #[builder(default = Duration::from_millis(0))]
    pub sleep_between_retries: Duration,

    /// Budget given to [`crate::cmap::recover::ConnectionRecover`] to drain a
    /// timed-out socket before it is closed unconditionally.
    #[builder(default = Duration::from_secs(3))]
    pub timeout_delay: Duration,

    #[builder(default)]
    pub replica_policy: ReplicaPolicy,
}

impl Default for CommandPolicy {
    fn default() -> Self {
        CommandPolicy::builder().build()
    }
}

/// Policy for multi-key batch commands; composes a [`CommandPolicy`] rather than
/// inheriting from it (§9's flattening note).
#[derive(Clone, Debug, TypedBuilder)]
pub struct BatchPolicy {
    #[builder(default)]
    pub base: CommandPolicy,

    /// Whether a row-level error aborts the whole batch or is reported per-record.
    #[builder(default = false)]
    pub fail_on_cluster_change: bool,
}

impl Default for BatchPolicy {
    fn default() -> Self {
        BatchPolicy::builder().build()
    }
}

/// Policy for a cluster-wide partition scan (§4.9, §4.10).
#[derive(Clone, Debug, TypedBuilder)]
pub struct ScanPolicy {
    #[builder(default)]
    pub base: CommandPolicy,

    /// Retry rounds allowed before `isClusterComplete` gives up on stragglers.
    #[builder(default = 5)]
    pub max_retry_rounds: u32,

    #[builder(default = 0)]
    pub records_per_second: u32,
}

impl Default for ScanPolicy {
    fn default() -> Self {
        ScanPolicy::builder().build()
    }
}

/// Policy for a secondary-index query; shares the scan's retry/round semantics.
#[derive(Clone, Debug, TypedBuilder)]
pub struct QueryPolicy {
    #[builder(default)]
    pub base: CommandPolicy,

    #[builder(default = 5)]
    pub max_retry_rounds: u32,
}

impl Default for QueryPolicy {
    fn default() -> Self {
        QueryPolicy::builder().build()
    }
}
