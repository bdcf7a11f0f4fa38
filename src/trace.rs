//! Structured logging call sites (§4.13), gated behind the `tracing-unstable`
//! feature the way the teacher gates its CMAP/SDAM event emitters: no behavior
//! anywhere in the crate depends on whether this feature is compiled in, so these
//! are plain functions rather than a trait callers have to thread through.

#[cfg(feature = "tracing-unstable")]
pub(crate) fn pool_checkout(node: &str, connection_id: u64) {
    tracing::trace!(node, connection_id, "connection checked out of pool");
}
#[cfg(not(feature = "tracing-unstable"))]
pub(crate) fn pool_checkout(_node: &str, _connection_id: u64) {}

#[cfg(feature = "tracing-unstable")]
pub(crate) fn pool_checkin(node: &str, connection_id: u64, recovered: bool) {
    tracing::trace!(node, connection_id, recovered, "connection checked in");
}
#[cfg(not(feature = "tracing-unstable"))]
pub(crate) fn pool_checkin(_node: &str, _connection_id: u64, _recovered: bool) {}

#[cfg(feature = "tracing-unstable")]
pub(crate) fn pool_create(node: &str, connection_id: u64) {
    tracing::debug!(node, connection_id, "opened new connection");
}
#[cfg(not(feature = "tracing-unstable"))]
pub(crate) fn pool_create(_node: &str, _connection_id: u64) {}

#[cfg(feature = "tracing-unstable")]
pub(crate) fn pool_close(node: &str, connection_id: u64) {
    tracing::debug!(node, connection_id, "closed connection");
}
#[cfg(not(feature = "tracing-unstable"))]
pub(crate) fn pool_close(_node: &str, _connection_id: u64) {}

#[cfg(feature = "tracing-unstable")]
pub(crate) fn admission_reject(in_flight: u32, limit: u32) {
    tracing::debug!(in_flight, limit, "admission rejected command");
}
#[cfg(not(feature = "tracing-unstable"))]
pub(crate) fn admission_reject(_in_flight: u32, _limit: u32) {}

#[cfg(feature = "tracing-unstable")]
pub(crate) fn admission_delay_queued(queue_len: usize) {
    tracing::trace!(queue_len, "admission queued command under DELAY");
}
#[cfg(not(feature = "tracing-unstable"))]
pub(crate) fn admission_delay_queued(_queue_len: usize) {}

#[cfg(feature = "tracing-unstable")]
pub(crate) fn command_retry(attempt: u32, node: &str) {
    tracing::debug!(attempt, node, "retrying command");
}
#[cfg(not(feature = "tracing-unstable"))]
pub(crate) fn command_retry(_attempt: u32, _node: &str) {}

#[cfg(feature = "tracing-unstable")]
pub(crate) fn command_timeout(attempt: u32) {
    tracing::debug!(attempt, "command timed out");
}
#[cfg(not(feature = "tracing-unstable"))]
pub(crate) fn command_timeout(_attempt: u32) {}

#[cfg(feature = "tracing-unstable")]
pub(crate) fn command_in_doubt(attempt: u32) {
    tracing::warn!(attempt, "write left in doubt");
}
#[cfg(not(feature = "tracing-unstable"))]
pub(crate) fn command_in_doubt(_attempt: u32) {}

#[cfg(feature = "tracing-unstable")]
pub(crate) fn txn_state(previous: &str, next: &str) {
    tracing::debug!(previous, next, "transaction state transition");
}
#[cfg(not(feature = "tracing-unstable"))]
pub(crate) fn txn_state(_previous: &str, _next: &str) {}
