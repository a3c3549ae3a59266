//! Periodic membership refresh.
//!
//! Each tick reads a snapshot, builds a complete record table and swaps it
//! into the cache, then gives the reconciler its (throttled) verification
//! turn. A failed read keeps the previous table.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::metrics::{self, RefreshOutcome};
use crate::reconciler::Reconciler;
use crate::records::build_records;
use crate::state::RecordCache;
use crate::status::StatusSource;

/// Refresh task driving the record cache and split-DNS verification.
pub struct RefreshLoop {
    source: Arc<dyn StatusSource>,
    cache: RecordCache,
    domains: Vec<String>,
    interval: Duration,
    reconciler: Arc<Reconciler>,
}

impl RefreshLoop {
    /// Create a refresh loop over `domains`.
    pub fn new(
        source: Arc<dyn StatusSource>,
        cache: RecordCache,
        domains: Vec<String>,
        interval: Duration,
        reconciler: Arc<Reconciler>,
    ) -> Self {
        Self {
            source,
            cache,
            domains,
            interval,
            reconciler,
        }
    }

    /// Read one snapshot and install the resulting table.
    ///
    /// On error the cache is left untouched.
    pub async fn refresh_once(&self) -> Result<usize> {
        let snapshot = self.source.status().await?;
        let table = build_records(&snapshot, &self.domains);
        let records = table.len();
        self.cache.replace(table);
        Ok(records)
    }

    /// Tick until the token is cancelled. The first tick fires immediately.
    pub async fn run(self, token: CancellationToken) -> Result<()> {
        info!(
            interval_secs = self.interval.as_secs(),
            domains = ?self.domains,
            "Starting record refresh loop"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("Record refresh loop stopped");
                    return Ok(());
                }
                _ = ticker.tick() => {}
            }

            // Dropping an in-flight tick releases the reconciler lock for cleanup.
            tokio::select! {
                _ = token.cancelled() => {
                    info!("Record refresh loop stopped mid-tick");
                    return Ok(());
                }
                _ = self.tick() => {}
            }
        }
    }

    async fn tick(&self) {
        match self.refresh_once().await {
            Ok(records) => {
                debug!(records, "Refreshed record table");
                metrics::record_refresh(RefreshOutcome::Success);
            }
            Err(e) => {
                warn!("Failed to refresh records, keeping previous table: {}", e);
                metrics::record_refresh(RefreshOutcome::Failed);
            }
        }

        self.reconciler.verify().await;
    }
}
