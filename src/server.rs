//! Local answer listener setup and lifecycle management.

use hickory_server::authority::{AuthorityObject, Catalog};
use hickory_server::ServerFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, UdpSocket};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::authority::TailnetAuthority;
use crate::config::DnsConfig;
use crate::error::Result;
use crate::state::RecordCache;

/// Poll interval while waiting for the first table.
const READY_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// TCP idle timeout.
const TCP_TIMEOUT: Duration = Duration::from_secs(30);

/// Build a catalog with one authority per configured domain.
pub fn build_catalog(config: &DnsConfig, cache: &RecordCache) -> Result<Catalog> {
    let mut catalog = Catalog::new();
    for domain in &config.domains {
        let authority = TailnetAuthority::new(domain, config.ttl, cache.clone())?;
        let origin = authority.origin().clone();
        let authority: Arc<dyn AuthorityObject> = Arc::new(authority);
        catalog.upsert(origin, vec![authority]);
    }
    Ok(catalog)
}

/// DNS listener answering from the record cache.
pub struct DnsServer {
    config: DnsConfig,
    cache: RecordCache,
}

impl DnsServer {
    /// Create a new server for the given configuration and cache.
    pub fn new(config: DnsConfig, cache: RecordCache) -> Self {
        Self { config, cache }
    }

    /// Get a reference to the record cache.
    pub fn cache(&self) -> &RecordCache {
        &self.cache
    }

    /// Run until the token is cancelled.
    pub async fn run(self, token: CancellationToken) -> Result<()> {
        info!(
            listen_addr = %self.config.listen_addr,
            domains = ?self.config.domains,
            "Starting DNS listener"
        );

        // Wait for the first refresh before answering anything
        info!("Waiting for initial record table...");
        loop {
            if token.is_cancelled() {
                info!("Shutdown requested before record table was ready");
                return Ok(());
            }

            if self.cache.is_ready() {
                info!(records = self.cache.len(), "Initial record table ready");
                break;
            }

            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(READY_POLL_INTERVAL) => {}
            }
        }

        let catalog = build_catalog(&self.config, &self.cache)?;
        let mut server = ServerFuture::new(catalog);

        let udp_socket = UdpSocket::bind(self.config.listen_addr).await?;
        info!(addr = %self.config.listen_addr, "DNS UDP listening");
        server.register_socket(udp_socket);

        let tcp_listener = TcpListener::bind(self.config.listen_addr).await?;
        info!(addr = %self.config.listen_addr, "DNS TCP listening");
        server.register_listener(tcp_listener, TCP_TIMEOUT);

        tokio::select! {
            _ = token.cancelled() => {
                info!("DNS listener shutdown requested");
            }
            result = server.block_until_done() => {
                if let Err(e) = result {
                    error!("DNS listener error: {}", e);
                }
            }
        }

        info!("DNS listener stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> DnsConfig {
        DnsConfig {
            domains: vec!["corp.example".to_string(), "ts.internal".to_string()],
            listen_addr: "127.0.0.1:0".parse().unwrap(),
            ttl: 60,
            refresh_interval_secs: 30,
        }
    }

    #[test]
    fn test_server_creation() {
        let server = DnsServer::new(test_config(), RecordCache::new());
        assert!(!server.cache().is_ready());
    }

    #[test]
    fn test_build_catalog_registers_every_domain() {
        let catalog = build_catalog(&test_config(), &RecordCache::new()).unwrap();
        for domain in ["corp.example.", "ts.internal."] {
            let name = hickory_proto::rr::Name::from_ascii(domain).unwrap().into();
            assert!(catalog.contains(&name), "missing {domain}");
        }
    }

    #[tokio::test]
    async fn test_run_returns_when_cancelled_before_ready() {
        let server = DnsServer::new(test_config(), RecordCache::new());
        let token = CancellationToken::new();
        token.cancel();
        server.run(token).await.unwrap();
    }
}
