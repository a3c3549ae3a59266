//! Tailscale DNS - name resolution for tailnet nodes plus split-DNS upkeep.
//!
//! This crate keeps an in-memory name table built from live Tailscale
//! membership, answers A/AAAA queries for it, keeps the tailnet's split-DNS
//! configuration pointing at this node, and supervises the `tailscaled` and
//! DNS responder daemons it depends on.
//!
//! ## Features
//!
//! - Periodic, atomic record table refresh from `tailscale status`
//! - `tag:subdomain-*` tags add `host.<sub>.<domain>` names
//! - Throttled split-DNS verification with drift repair
//! - Ordered daemon startup, crash propagation and graceful-then-forced shutdown
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          tailscale-dns                           │
//! │                                                                  │
//! │  ┌──────────────┐  tick  ┌──────────────┐    ┌──────────────┐    │
//! │  │ RefreshLoop  │───────▶│ RecordCache  │───▶│ Hickory DNS  │◀───┼── responder
//! │  │ (status src) │        │ (swap table) │    │ listener     │    │   (coredns)
//! │  └──────┬───────┘        └──────────────┘    └──────────────┘    │
//! │         │ verify                                                 │
//! │         ▼                                                        │
//! │  ┌──────────────┐  GET/PATCH  ┌───────────────────┐              │
//! │  │ Reconciler   │────────────▶│ split-DNS API     │              │
//! │  └──────────────┘             └───────────────────┘              │
//! │                                                                  │
//! │  ┌──────────────┐  spawn/monitor/SIGTERM/SIGKILL                 │
//! │  │ Supervisor   │──────────────▶ tailscaled, coredns             │
//! │  └──────────────┘                                                │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tailscale_dns::{CliStatusSource, DnsServer, Reconciler, RecordCache, RefreshLoop};
//! use tokio_util::sync::CancellationToken;
//!
//! let token = CancellationToken::new();
//! let cache = RecordCache::new();
//! let source = Arc::new(CliStatusSource::from_config(&config.tailscale));
//! let refresh = RefreshLoop::new(
//!     source,
//!     cache.clone(),
//!     config.dns.domains.clone(),
//!     config.dns.refresh_interval(),
//!     Arc::new(Reconciler::disabled()),
//! );
//! tokio::spawn(refresh.run(token.clone()));
//! DnsServer::new(config.dns, cache).run(token).await?;
//! ```

#![warn(missing_docs)]

pub mod api;
pub mod authority;
pub mod config;
pub mod corefile;
pub mod error;
pub mod metrics;
pub mod reconciler;
pub mod records;
pub mod refresh;
pub mod server;
pub mod state;
pub mod status;
pub mod supervisor;
pub mod telemetry;

// Re-export main types
pub use api::{SplitDnsApi, SplitDnsClient};
pub use config::{Config, DnsConfig, TelemetryConfig};
pub use error::{Error, Result};
pub use reconciler::{Phase, ReconcileStatus, Reconciler};
pub use records::{Record, RecordTable};
pub use refresh::RefreshLoop;
pub use server::DnsServer;
pub use state::RecordCache;
pub use status::{CliStatusSource, Node, Snapshot, StatusSource};
pub use supervisor::{ShutdownReport, Supervisor};
