//! Membership snapshots from the local Tailscale agent.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::trace;

use crate::config::TailscaleConfig;
use crate::error::{Error, Result};

/// Upper bound for a single status call.
const STATUS_TIMEOUT: Duration = Duration::from_secs(10);

/// One node of the overlay network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    /// Host name as reported by the agent.
    pub hostname: String,
    /// MagicDNS name (e.g., "host.tail1234.ts.net."), empty when unknown.
    pub dns_name: String,
    /// ACL tags (e.g., "tag:subdomain-archive").
    pub tags: BTreeSet<String>,
    /// Overlay addresses in agent order.
    pub addresses: Vec<IpAddr>,
}

impl Node {
    /// First IPv4 address of this node.
    pub fn first_ipv4(&self) -> Option<Ipv4Addr> {
        self.addresses.iter().find_map(|ip| match ip {
            IpAddr::V4(v4) => Some(*v4),
            IpAddr::V6(_) => None,
        })
    }
}

/// Point-in-time read of self + peer membership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// This node.
    pub self_node: Node,
    /// Every peer, ordered by node key.
    pub peers: Vec<Node>,
}

impl Snapshot {
    /// Self node followed by all peers.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        std::iter::once(&self.self_node).chain(self.peers.iter())
    }
}

/// Source of membership snapshots.
#[async_trait]
pub trait StatusSource: Send + Sync {
    /// Read the current self node and peer list.
    async fn status(&self) -> Result<Snapshot>;
}

#[derive(Debug, Deserialize)]
struct StatusDocument {
    #[serde(rename = "Self", default)]
    self_node: Option<PeerDocument>,
    #[serde(rename = "Peer", default)]
    peers: Option<BTreeMap<String, PeerDocument>>,
}

#[derive(Debug, Deserialize)]
struct PeerDocument {
    #[serde(rename = "HostName", default)]
    host_name: String,
    #[serde(rename = "DNSName", default)]
    dns_name: String,
    #[serde(rename = "Tags", default)]
    tags: Option<Vec<String>>,
    #[serde(rename = "TailscaleIPs", default)]
    tailscale_ips: Option<Vec<IpAddr>>,
}

impl From<PeerDocument> for Node {
    fn from(doc: PeerDocument) -> Self {
        Node {
            hostname: doc.host_name,
            dns_name: doc.dns_name,
            tags: doc.tags.unwrap_or_default().into_iter().collect(),
            addresses: doc.tailscale_ips.unwrap_or_default(),
        }
    }
}

/// Decode the agent's JSON status document.
pub fn parse_status(json: &[u8]) -> Result<Snapshot> {
    let doc: StatusDocument = serde_json::from_slice(json)?;
    let self_node: Node = doc.self_node.ok_or(Error::NoSelfNode)?.into();
    let peers = doc
        .peers
        .unwrap_or_default()
        .into_values()
        .map(Node::from)
        .collect();

    Ok(Snapshot { self_node, peers })
}

/// Reads snapshots by running `tailscale status --json` against the agent socket.
#[derive(Debug, Clone)]
pub struct CliStatusSource {
    cli_bin: PathBuf,
    socket_path: PathBuf,
}

impl CliStatusSource {
    /// Create a source for the given CLI binary and control socket.
    pub fn new(cli_bin: impl Into<PathBuf>, socket_path: impl Into<PathBuf>) -> Self {
        Self {
            cli_bin: cli_bin.into(),
            socket_path: socket_path.into(),
        }
    }

    /// Create a source from the agent configuration.
    pub fn from_config(config: &TailscaleConfig) -> Self {
        Self::new(&config.cli_bin, &config.socket_path)
    }
}

#[async_trait]
impl StatusSource for CliStatusSource {
    async fn status(&self) -> Result<Snapshot> {
        let mut cmd = Command::new(&self.cli_bin);
        cmd.arg(format!("--socket={}", self.socket_path.display()))
            .args(["status", "--json"])
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = tokio::time::timeout(STATUS_TIMEOUT, cmd.output())
            .await
            .map_err(|_| Error::Timeout("tailscale status".to_string()))??;

        if !output.status.success() {
            return Err(Error::Status(format!(
                "tailscale status exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let snapshot = parse_status(&output.stdout)?;
        trace!(peers = snapshot.peers.len(), "read tailscale status");
        Ok(snapshot)
    }
}
