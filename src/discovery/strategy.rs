//! Query scheduling strategies for the scan cycle.

/// Decides when discovered peers are queried for their services.
///
/// Two built-in strategies with different latency/battery tradeoffs share
/// the same registration and dedup machinery: [`BatchQueryStrategy`]
/// finishes a full scan pass before querying anyone, while
/// [`IncrementalQueryStrategy`] interrupts the scan to query each newly
/// seen peer immediately.
pub trait DiscoveryStrategy: Send + Sync + 'static {
    /// Name for logging.
    fn name(&self) -> &'static str;

    /// Query a peer as soon as it is first seen, interrupting the scan,
    /// instead of waiting for the scan pass to finish.
    fn query_on_sight(&self) -> bool;

    /// Restart the underlying scan once outstanding query results have
    /// arrived.
    fn resume_scan_after_query(&self) -> bool;
}

/// Full scan pass first, then one service query per discovered peer.
///
/// Slower to the first result, but steadier on the radio and usually the
/// better choice when many peers are in range.
#[derive(Debug, Default, Clone, Copy)]
pub struct BatchQueryStrategy;

impl DiscoveryStrategy for BatchQueryStrategy {
    fn name(&self) -> &'static str {
        "batch"
    }

    fn query_on_sight(&self) -> bool {
        false
    }

    fn resume_scan_after_query(&self) -> bool {
        false
    }
}

/// Interrupt the scan to query each newly seen peer immediately.
///
/// Cuts the time from scan start to the first service result; a per-peer
/// "already queried this generation" set keeps callback storms from
/// re-querying the same peer. The scan resumes once results arrive.
#[derive(Debug, Default, Clone, Copy)]
pub struct IncrementalQueryStrategy;

impl DiscoveryStrategy for IncrementalQueryStrategy {
    fn name(&self) -> &'static str {
        "incremental"
    }

    fn query_on_sight(&self) -> bool {
        true
    }

    fn resume_scan_after_query(&self) -> bool {
        true
    }
}
