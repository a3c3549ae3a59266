//! Split-DNS reconciliation for this node's address.
//!
//! ```text
//!             initialize
//! Uninitialized ─────────▶ Verified ◀──┐
//!                    │         │ verify │
//!                    └──────▶ Drifted ──┘
//!
//! any ── cleanup ──▶ Disabled
//! ```
//!
//! `verify` runs at most once per check window no matter how often it is
//! ticked. Registry writes are partial: only domains whose nameserver list
//! actually changes are sent, so repeated calls issue no `PATCH` at all.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::api::{SplitDnsApi, SplitDnsMap, SplitDnsPatch};
use crate::error::{Error, Result};
use crate::metrics::{self, ReconcileOutcome};
use crate::status::StatusSource;

/// Minimum spacing between two remote verifications.
pub const CHECK_WINDOW: Duration = Duration::from_secs(5 * 60);

/// Reconciler phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Feature off, or cleaned up.
    Disabled,
    /// Enabled but `initialize` has not succeeded yet.
    Uninitialized,
    /// Last check found every target domain listing this node.
    Verified,
    /// Last check found a domain missing this node and repaired it.
    Drifted,
}

/// Result of one `verify` tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// Feature off or already cleaned up.
    Disabled,
    /// `initialize` has not run yet.
    NotInitialized,
    /// Inside the check window; nothing was read.
    Throttled,
    /// Registry already correct.
    Verified,
    /// Registry was patched.
    Repaired,
    /// A status or remote call failed; retried on a later tick.
    Failed,
}

/// Read-only view of the reconciler for status queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileStatus {
    /// Whether split DNS is managed at all.
    pub enabled: bool,
    /// Current phase.
    pub phase: Phase,
    /// Target domains.
    pub domains: Vec<String>,
    /// Last address read for this node.
    pub own_ip: Option<IpAddr>,
    /// Address confirmed present in the registry.
    pub last_verified_ip: Option<IpAddr>,
}

#[derive(Debug)]
struct ReconcileState {
    phase: Phase,
    own_ip: Option<IpAddr>,
    last_verified_ip: Option<IpAddr>,
    last_check: Option<Instant>,
}

struct Backend {
    source: Arc<dyn StatusSource>,
    api: Arc<dyn SplitDnsApi>,
}

/// Keeps this node registered as a split-DNS nameserver.
pub struct Reconciler {
    domains: Vec<String>,
    backend: Option<Backend>,
    check_window: Duration,
    state: Mutex<ReconcileState>,
}

impl Reconciler {
    /// Reconciler for the given target domains.
    pub fn new(
        domains: Vec<String>,
        source: Arc<dyn StatusSource>,
        api: Arc<dyn SplitDnsApi>,
    ) -> Self {
        Self {
            domains,
            backend: Some(Backend { source, api }),
            check_window: CHECK_WINDOW,
            state: Mutex::new(ReconcileState {
                phase: Phase::Uninitialized,
                own_ip: None,
                last_verified_ip: None,
                last_check: None,
            }),
        }
    }

    /// Reconciler for a node with split DNS turned off. Every operation is a no-op.
    pub fn disabled() -> Self {
        Self {
            domains: Vec::new(),
            backend: None,
            check_window: CHECK_WINDOW,
            state: Mutex::new(ReconcileState {
                phase: Phase::Disabled,
                own_ip: None,
                last_verified_ip: None,
                last_check: None,
            }),
        }
    }

    /// Override the check window.
    pub fn with_check_window(mut self, window: Duration) -> Self {
        self.check_window = window;
        self
    }

    /// Whether split DNS is managed.
    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    /// Register this node for every target domain.
    ///
    /// Fails when the node has no address or the registry cannot be updated;
    /// callers treat that as fatal.
    pub async fn initialize(&self) -> Result<()> {
        let Some(backend) = self.backend.as_ref() else {
            info!("Split DNS is disabled");
            return Ok(());
        };

        let mut state = self.state.lock().await;
        if state.phase == Phase::Disabled {
            return Ok(());
        }

        info!(domains = ?self.domains, "Initializing split DNS");
        let ip = own_address(backend.source.as_ref()).await?;
        state.own_ip = Some(ip);

        let current = backend.api.get().await?;
        let updates = addition_patch(&current, &self.domains, ip, None);
        let repaired = self.apply(backend, updates).await?;

        state.phase = if repaired { Phase::Drifted } else { Phase::Verified };
        state.last_verified_ip = Some(ip);
        state.last_check = Some(Instant::now());

        info!(ip = %ip, repaired, "Split DNS initialization completed");
        Ok(())
    }

    /// Throttled check that every target domain still lists this node.
    ///
    /// Never fails: errors are logged and the tick is abandoned without
    /// recording a successful check, so a later tick retries.
    pub async fn verify(&self) -> VerifyOutcome {
        let Some(backend) = self.backend.as_ref() else {
            return VerifyOutcome::Disabled;
        };

        let mut state = self.state.lock().await;
        match state.phase {
            Phase::Disabled => return VerifyOutcome::Disabled,
            Phase::Uninitialized => return VerifyOutcome::NotInitialized,
            Phase::Verified | Phase::Drifted => {}
        }

        if let Some(last) = state.last_check {
            if last.elapsed() < self.check_window {
                return VerifyOutcome::Throttled;
            }
        }

        let ip = match own_address(backend.source.as_ref()).await {
            Ok(ip) => ip,
            Err(e) => {
                error!("Failed to get own IP for split DNS verification: {}", e);
                metrics::record_reconcile(ReconcileOutcome::Failed);
                return VerifyOutcome::Failed;
            }
        };

        let stale = state.last_verified_ip.filter(|prev| *prev != ip);
        if let Some(prev) = stale {
            info!(from = %prev, to = %ip, "Detected IP change, re-registering split DNS");
        }
        state.own_ip = Some(ip);

        let result = async {
            let current = backend.api.get().await?;
            let updates = addition_patch(&current, &self.domains, ip, stale);
            self.apply(backend, updates).await
        }
        .await;

        match result {
            Ok(repaired) => {
                state.last_verified_ip = Some(ip);
                state.last_check = Some(Instant::now());
                if repaired {
                    warn!(ip = %ip, "Split DNS drift repaired");
                    state.phase = Phase::Drifted;
                    metrics::record_reconcile(ReconcileOutcome::Repaired);
                    VerifyOutcome::Repaired
                } else {
                    debug!(ip = %ip, "Split DNS verification successful");
                    state.phase = Phase::Verified;
                    metrics::record_reconcile(ReconcileOutcome::Verified);
                    VerifyOutcome::Verified
                }
            }
            Err(e) => {
                error!("Failed to verify split DNS: {}", e);
                metrics::record_reconcile(ReconcileOutcome::Failed);
                VerifyOutcome::Failed
            }
        }
    }

    /// Remove this node's known addresses from every target domain.
    ///
    /// Both the last registered address and the last observed one are
    /// removed, since a failed verify can leave them different. Runs once on
    /// shutdown; the reconciler ends up `Disabled` either way.
    pub async fn cleanup(&self) -> Result<()> {
        let Some(backend) = self.backend.as_ref() else {
            return Ok(());
        };

        let mut state = self.state.lock().await;
        if state.phase == Phase::Disabled {
            return Ok(());
        }
        state.phase = Phase::Disabled;

        let mut ips: Vec<IpAddr> = state.last_verified_ip.into_iter().collect();
        if let Some(ip) = state.own_ip.filter(|ip| !ips.contains(ip)) {
            ips.push(ip);
        }
        if ips.is_empty() {
            match own_address(backend.source.as_ref()).await {
                Ok(ip) => ips.push(ip),
                Err(e) => {
                    warn!("No known address to remove from split DNS: {}", e);
                    return Ok(());
                }
            }
        }

        info!(ips = ?ips, domains = ?self.domains, "Cleaning up split DNS");
        let current = backend.api.get().await?;
        let updates = removal_patch(&current, &self.domains, &ips);
        self.apply(backend, updates).await?;

        info!("Split DNS cleanup completed");
        Ok(())
    }

    /// Snapshot of the reconciler's last known values.
    pub async fn status(&self) -> ReconcileStatus {
        let state = self.state.lock().await;
        ReconcileStatus {
            enabled: self.is_enabled(),
            phase: state.phase,
            domains: self.domains.clone(),
            own_ip: state.own_ip,
            last_verified_ip: state.last_verified_ip,
        }
    }

    /// Send `updates` if non-empty. Returns whether anything was written.
    async fn apply(&self, backend: &Backend, updates: SplitDnsPatch) -> Result<bool> {
        if updates.is_empty() {
            return Ok(false);
        }
        info!(domains = ?updates.keys().collect::<Vec<_>>(), "Updating split DNS");
        backend.api.patch(&updates).await?;
        metrics::record_split_dns_patch(updates.len());
        Ok(true)
    }
}

async fn own_address(source: &dyn StatusSource) -> Result<IpAddr> {
    let snapshot = source.status().await?;
    snapshot
        .self_node
        .first_ipv4()
        .map(IpAddr::V4)
        .ok_or(Error::NoIpv4Address)
}

fn is_addr(server: &str, ip: IpAddr) -> bool {
    server
        .trim()
        .parse::<IpAddr>()
        .map(|parsed| parsed == ip)
        .unwrap_or(false)
}

/// Updates adding `ip` to every domain missing it, dropping `stale` on the way.
pub fn addition_patch(
    current: &SplitDnsMap,
    domains: &[String],
    ip: IpAddr,
    stale: Option<IpAddr>,
) -> SplitDnsPatch {
    let mut updates = SplitDnsPatch::new();
    for domain in domains {
        let servers = current.get(domain).cloned().unwrap_or_default();
        let mut next: Vec<String> = servers
            .iter()
            .filter(|s| stale.map_or(true, |old| !is_addr(s, old)))
            .cloned()
            .collect();
        if !next.iter().any(|s| is_addr(s, ip)) {
            next.push(ip.to_string());
        }
        if next != servers {
            updates.insert(domain.clone(), Some(next));
        }
    }
    updates
}

/// Updates removing `ips` from every domain listing any of them; emptied domains are cleared.
pub fn removal_patch(current: &SplitDnsMap, domains: &[String], ips: &[IpAddr]) -> SplitDnsPatch {
    let listed = |s: &str| ips.iter().any(|ip| is_addr(s, *ip));

    let mut updates = SplitDnsPatch::new();
    for domain in domains {
        let Some(servers) = current.get(domain) else {
            continue;
        };
        if !servers.iter().any(|s| listed(s)) {
            continue;
        }
        let next: Vec<String> = servers.iter().filter(|s| !listed(s)).cloned().collect();
        let value = if next.is_empty() { None } else { Some(next) };
        updates.insert(domain.clone(), value);
    }
    updates
}
