//! Error types for tailscale-dns.

use std::process::ExitStatus;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while resolving, reconciling, or supervising.
#[derive(Debug, Error)]
pub enum Error {
    /// IO error (process spawn, socket, file).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client error talking to the split-DNS registry.
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// DNS protocol error.
    #[error("DNS protocol error: {0}")]
    Proto(#[from] hickory_proto::ProtoError),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The membership status could not be read.
    #[error("Status error: {0}")]
    Status(String),

    /// The status snapshot carried no self node.
    #[error("no self node found in Tailscale status")]
    NoSelfNode,

    /// The self node has no IPv4 address.
    #[error("no IPv4 address found for self node")]
    NoIpv4Address,

    /// The registry answered with a non-success status.
    #[error("API error ({status}): {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly empty.
        body: String,
    },

    /// The tailnet (account identifier) could not be determined.
    #[error("could not determine tailnet: {0}")]
    Tailnet(String),

    /// A supervised process could not be started.
    #[error("failed to start {name}: {source}")]
    Process {
        /// Process name.
        name: String,
        /// Underlying spawn error.
        source: std::io::Error,
    },

    /// A synchronous command exited unsuccessfully.
    #[error("{command} failed with {status}")]
    CommandFailed {
        /// Short command description.
        command: String,
        /// Exit status.
        status: ExitStatus,
    },

    /// A bounded wait elapsed.
    #[error("timeout waiting for {0}")]
    Timeout(String),

    /// The shared cancellation token fired while waiting.
    #[error("operation cancelled by shutdown")]
    Cancelled,
}
