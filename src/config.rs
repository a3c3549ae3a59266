//! Configuration types for tailscale-dns.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Record table and local answer listener configuration.
    pub dns: DnsConfig,

    /// Tailscale agent and credentials.
    pub tailscale: TailscaleConfig,

    /// Split-DNS registration.
    #[serde(default)]
    pub split_dns: SplitDnsConfig,

    /// DNS responder daemon.
    #[serde(default)]
    pub responder: ResponderConfig,

    /// Telemetry configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Record table and answer listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsConfig {
    /// Domains served from the record table (e.g., "corp.example").
    pub domains: Vec<String>,

    /// Address for the local answer listener (UDP and TCP).
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// TTL for answers in seconds.
    #[serde(default = "default_ttl")]
    pub ttl: u32,

    /// Seconds between membership refreshes.
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
}

impl DnsConfig {
    /// Refresh interval as a `Duration`.
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }
}

/// Tailscale agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TailscaleConfig {
    /// Hostname this node registers with.
    pub hostname: String,

    /// OAuth client ID.
    pub client_id: String,

    /// OAuth client secret, also used as the auth key.
    pub client_secret: String,

    /// Explicit tailnet name; derived from live status when absent.
    #[serde(default)]
    pub tailnet: Option<String>,

    /// Register as an ephemeral node.
    #[serde(default = "default_true")]
    pub ephemeral: bool,

    /// Tags advertised on authentication.
    #[serde(default = "default_advertise_tags")]
    pub advertise_tags: Vec<String>,

    /// Agent daemon binary.
    #[serde(default = "default_daemon_bin")]
    pub daemon_bin: PathBuf,

    /// Agent CLI binary.
    #[serde(default = "default_cli_bin")]
    pub cli_bin: PathBuf,

    /// Agent state directory.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Agent control socket.
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,

    /// Agent tun mode.
    #[serde(default = "default_tun")]
    pub tun: String,
}

/// Split-DNS registration configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitDnsConfig {
    /// Whether this node registers itself as a split-DNS nameserver.
    #[serde(default)]
    pub enabled: bool,

    /// Domains to register for. Empty means all of `dns.domains`.
    #[serde(default)]
    pub domains: Vec<String>,

    /// Registry API base URL.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
}

impl Default for SplitDnsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            domains: Vec::new(),
            api_base_url: default_api_base_url(),
        }
    }
}

/// DNS responder daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponderConfig {
    /// Responder binary.
    #[serde(default = "default_responder_bin")]
    pub bin: PathBuf,

    /// Where the generated directive file is written.
    #[serde(default = "default_responder_config_path")]
    pub config_path: PathBuf,

    /// Optional hosts file consulted before the record table.
    #[serde(default)]
    pub hosts_file: Option<PathBuf>,

    /// Upstream for everything outside the configured domains.
    #[serde(default = "default_forward_to")]
    pub forward_to: String,

    /// Extra directive text appended verbatim.
    #[serde(default)]
    pub additional_config: Option<String>,

    /// File of extra directives appended after `additional_config`. Blank
    /// and `#` comment lines are dropped; a missing file is ignored.
    #[serde(default)]
    pub additional_config_file: Option<PathBuf>,
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            bin: default_responder_bin(),
            config_path: default_responder_config_path(),
            hosts_file: None,
            forward_to: default_forward_to(),
            additional_config: None,
            additional_config_file: None,
        }
    }
}

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level filter (e.g., "info", "tailscale_dns=debug,warn").
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Prometheus metrics exporter address.
    #[serde(default)]
    pub prometheus_addr: Option<SocketAddr>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            prometheus_addr: None,
        }
    }
}

impl Config {
    /// Normalize domains and check every required value.
    pub fn validate(&mut self) -> Result<()> {
        if self.tailscale.client_id.trim().is_empty()
            || self.tailscale.client_secret.trim().is_empty()
        {
            return Err(Error::Config(
                "tailscale.client_id and tailscale.client_secret are required".to_string(),
            ));
        }

        if self.tailscale.hostname.trim().is_empty() {
            return Err(Error::Config("tailscale.hostname is required".to_string()));
        }

        self.dns.domains = normalize_domains(&self.dns.domains)?;
        if self.dns.domains.is_empty() {
            return Err(Error::Config("at least one domain is required".to_string()));
        }

        self.split_dns.domains = normalize_domains(&self.split_dns.domains)?;

        if self.dns.refresh_interval_secs == 0 {
            return Err(Error::Config(
                "dns.refresh_interval_secs must be positive".to_string(),
            ));
        }

        if let Some(ref hosts) = self.responder.hosts_file {
            if !hosts.exists() {
                return Err(Error::Config(format!(
                    "hosts file does not exist: {}",
                    hosts.display()
                )));
            }
        }

        Ok(())
    }

    /// Domains registered in split DNS.
    pub fn split_dns_domains(&self) -> &[String] {
        if self.split_dns.domains.is_empty() {
            &self.dns.domains
        } else {
            &self.split_dns.domains
        }
    }
}

/// Validate and normalize a single domain.
///
/// Surrounding whitespace and one trailing dot are removed and the result is
/// lower-cased. A domain needs at least two non-empty labels.
pub fn normalize_domain(domain: &str) -> Result<String> {
    let trimmed = domain.trim();
    let trimmed = trimmed.strip_suffix('.').unwrap_or(trimmed);

    if trimmed.is_empty() {
        return Err(Error::Config("domain cannot be empty".to_string()));
    }

    let labels: Vec<&str> = trimmed.split('.').collect();
    if labels.len() < 2 {
        return Err(Error::Config(format!(
            "domain must have at least two labels: {trimmed}"
        )));
    }
    if labels.iter().any(|label| label.is_empty()) {
        return Err(Error::Config(format!("domain has an empty label: {trimmed}")));
    }

    Ok(trimmed.to_ascii_lowercase())
}

fn normalize_domains(domains: &[String]) -> Result<Vec<String>> {
    let mut out: Vec<String> = Vec::with_capacity(domains.len());
    for domain in domains {
        if domain.trim().is_empty() {
            continue;
        }
        let normalized = normalize_domain(domain)?;
        if !out.contains(&normalized) {
            out.push(normalized);
        }
    }
    Ok(out)
}

/// Parse a comma-separated domain list, skipping empty items.
pub fn parse_domains(list: &str) -> Result<Vec<String>> {
    let items: Vec<String> = list.split(',').map(str::to_string).collect();
    let domains = normalize_domains(&items)?;
    if domains.is_empty() {
        return Err(Error::Config("no valid domains provided".to_string()));
    }
    Ok(domains)
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 5380))
}

fn default_ttl() -> u32 {
    60
}

fn default_refresh_interval() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_advertise_tags() -> Vec<String> {
    vec!["tag:ts-dns".to_string()]
}

fn default_daemon_bin() -> PathBuf {
    PathBuf::from("tailscaled")
}

fn default_cli_bin() -> PathBuf {
    PathBuf::from("tailscale")
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("/state")
}

fn default_socket_path() -> PathBuf {
    PathBuf::from("/run/tailscale/tailscaled.sock")
}

fn default_tun() -> String {
    "userspace-networking".to_string()
}

fn default_api_base_url() -> String {
    "https://api.tailscale.com".to_string()
}

fn default_responder_bin() -> PathBuf {
    PathBuf::from("coredns")
}

fn default_responder_config_path() -> PathBuf {
    PathBuf::from("/Corefile")
}

fn default_forward_to() -> String {
    "/etc/resolv.conf".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn test_config() -> Config {
        Config {
            dns: DnsConfig {
                domains: vec!["corp.example".to_string()],
                listen_addr: default_listen_addr(),
                ttl: default_ttl(),
                refresh_interval_secs: default_refresh_interval(),
            },
            tailscale: TailscaleConfig {
                hostname: "dns-1".to_string(),
                client_id: "client-id".to_string(),
                client_secret: "tskey-client-secret".to_string(),
                tailnet: None,
                ephemeral: true,
                advertise_tags: default_advertise_tags(),
                daemon_bin: default_daemon_bin(),
                cli_bin: default_cli_bin(),
                state_dir: default_state_dir(),
                socket_path: default_socket_path(),
                tun: default_tun(),
            },
            split_dns: SplitDnsConfig::default(),
            responder: ResponderConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }

    #[test]
    fn test_normalize_domain() {
        assert_eq!(normalize_domain("example.com").unwrap(), "example.com");
        assert_eq!(normalize_domain("  Sub.Example.COM  ").unwrap(), "sub.example.com");
        assert_eq!(normalize_domain("a.b.c.example.com").unwrap(), "a.b.c.example.com");
        assert_eq!(normalize_domain("example.com.").unwrap(), "example.com");
    }

    #[test]
    fn test_normalize_domain_rejects_invalid() {
        assert!(normalize_domain("").is_err());
        assert!(normalize_domain("localhost").is_err());
        assert!(normalize_domain("example..com").is_err());
    }

    #[test]
    fn test_parse_domains() {
        assert_eq!(
            parse_domains("example.com, test.org , demo.net").unwrap(),
            vec!["example.com", "test.org", "demo.net"]
        );
        assert_eq!(
            parse_domains("example.com,,test.org").unwrap(),
            vec!["example.com", "test.org"]
        );
        assert!(parse_domains("").is_err());
        assert!(parse_domains(",,,").is_err());
        assert!(parse_domains("example.com,invalid,test.org").is_err());
    }

    #[test]
    fn test_validate_requires_credentials() {
        let mut config = test_config();
        config.tailscale.client_secret = String::new();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_requires_domains() {
        let mut config = test_config();
        config.dns.domains = vec![" ".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_refresh_interval() {
        let mut config = test_config();
        config.dns.refresh_interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_missing_hosts_file() {
        let mut config = test_config();
        config.responder.hosts_file = Some(PathBuf::from("/nonexistent/custom_hosts"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_normalizes_domains() {
        let mut config = test_config();
        config.dns.domains = vec!["Corp.Example.".to_string(), "corp.example".to_string()];
        config.validate().unwrap();
        assert_eq!(config.dns.domains, vec!["corp.example"]);
    }

    #[test]
    fn test_split_dns_domains_default_to_dns_domains() {
        let mut config = test_config();
        assert_eq!(config.split_dns_domains(), &["corp.example".to_string()]);

        config.split_dns.domains = vec!["other.example".to_string()];
        assert_eq!(config.split_dns_domains(), &["other.example".to_string()]);
    }

    #[test]
    fn test_deserialize_applies_defaults() {
        let json = r#"{
            "dns": { "domains": ["corp.example"] },
            "tailscale": { "hostname": "dns-1", "client_id": "id", "client_secret": "secret" }
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.dns.ttl, 60);
        assert_eq!(config.dns.refresh_interval(), Duration::from_secs(30));
        assert!(config.tailscale.ephemeral);
        assert_eq!(config.tailscale.advertise_tags, vec!["tag:ts-dns"]);
        assert!(!config.split_dns.enabled);
        assert_eq!(config.responder.forward_to, "/etc/resolv.conf");
    }
}
