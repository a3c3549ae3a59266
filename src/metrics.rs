//! Metrics instrumentation for tailscale-dns.
//!
//! All metrics are prefixed with `tailscale_dns.`

use metrics::{counter, gauge, histogram};
use std::time::Instant;

/// Record a DNS query.
pub fn record_query(record_type: &str, result: QueryResult, duration: std::time::Duration) {
    let result_str = match result {
        QueryResult::Answered => "answered",
        QueryResult::Deferred => "deferred",
    };

    counter!("tailscale_dns.query.count", "type" => record_type.to_string(), "result" => result_str)
        .increment(1);
    histogram!("tailscale_dns.query.duration.seconds", "type" => record_type.to_string())
        .record(duration.as_secs_f64());
}

/// Query result type for metrics.
#[derive(Debug, Clone, Copy)]
pub enum QueryResult {
    /// Answered from the record table.
    Answered,
    /// Handed to the next handler (name or address family absent).
    Deferred,
}

/// Record the outcome of one membership refresh.
pub fn record_refresh(outcome: RefreshOutcome) {
    let outcome_str = match outcome {
        RefreshOutcome::Success => "success",
        RefreshOutcome::Failed => "failed",
    };

    counter!("tailscale_dns.refresh.count", "outcome" => outcome_str).increment(1);
}

/// Refresh outcomes.
#[derive(Debug, Clone, Copy)]
pub enum RefreshOutcome {
    /// A new table was installed.
    Success,
    /// The snapshot could not be read; the previous table stays.
    Failed,
}

/// Record the number of names served.
pub fn record_table_size(records: usize) {
    gauge!("tailscale_dns.records.count").set(records as f64);
}

/// Record a reconciliation pass.
pub fn record_reconcile(outcome: ReconcileOutcome) {
    let outcome_str = match outcome {
        ReconcileOutcome::Verified => "verified",
        ReconcileOutcome::Repaired => "repaired",
        ReconcileOutcome::Failed => "failed",
    };

    counter!("tailscale_dns.split_dns.reconcile.count", "outcome" => outcome_str).increment(1);
}

/// Reconciliation outcomes.
#[derive(Debug, Clone, Copy)]
pub enum ReconcileOutcome {
    /// Every target domain already listed this node.
    Verified,
    /// Drift was found and patched.
    Repaired,
    /// A remote or status call failed.
    Failed,
}

/// Record a PATCH sent to the split-DNS registry.
pub fn record_split_dns_patch(domains: usize) {
    counter!("tailscale_dns.split_dns.patch.count").increment(1);
    histogram!("tailscale_dns.split_dns.patch.domains").record(domains as f64);
}

/// Record a supervised process exit.
pub fn record_process_exit(name: &str, expected: bool) {
    let kind = if expected { "expected" } else { "crash" };
    counter!("tailscale_dns.process.exit.count", "name" => name.to_string(), "kind" => kind)
        .increment(1);
}

/// Record how many supervised processes are running.
pub fn record_running_processes(count: usize) {
    gauge!("tailscale_dns.process.running").set(count as f64);
}

/// Helper for timing operations.
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Start a new timer.
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed duration since timer start.
    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}
