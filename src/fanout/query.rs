//! Secondary-index query fan-out: shares [`super::scan::execute_scan`]'s
//! partition-tracker/retry-round machinery (`QueryPolicy`'s doc comment notes it
//! "shares the scan's retry/round semantics") but is driven over the caller-supplied
//! partition subset a query predicate narrows to, rather than the whole map.

use std::sync::Arc;

use crate::cluster::Cluster;
use crate::command::Record;
use crate::error::Result;
use crate::options::{QueryPolicy, ScanPolicy};

use super::scan::{execute_scan, ScanBodyBuilder};

/// Runs a secondary-index query over `partition_ids` (the subset the index narrowed
/// the scan to; the full map for an unfiltered query). Identical retry/completion
/// semantics to [`execute_scan`] — a query is a scan whose `build_body` closure
/// happens to encode index predicates rather than "give me everything."
pub async fn execute_query(
    cluster: Arc<Cluster>,
    namespace: impl Into<String>,
    partition_ids: Vec<u32>,
    build_body: impl ScanBodyBuilder + 'static,
    policy: QueryPolicy,
) -> (Vec<Record>, Result<bool>) {
    let scan_policy = ScanPolicy::builder()
        .base(policy.base)
        .max_retry_rounds(policy.max_retry_rounds)
        .build();
    execute_scan(cluster, namespace, partition_ids, build_body, scan_policy).await
}
