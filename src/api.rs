//! Client for the Tailscale split-DNS API.
//!
//! Only the pieces this node needs are modeled: the OAuth client-credentials
//! exchange and `GET`/`PATCH` on `/api/v2/tailnet/{tailnet}/dns/split-dns`.

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::{Client as HttpClient, Response, StatusCode};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::error::{Error, Result};

/// Default request timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Tokens are refreshed this long before they expire.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Domain -> nameserver addresses, as held by the registry.
pub type SplitDnsMap = BTreeMap<String, Vec<String>>;

/// Partial update: `None` clears the domain's nameservers.
pub type SplitDnsPatch = BTreeMap<String, Option<Vec<String>>>;

/// Remote split-DNS registry operations.
#[async_trait]
pub trait SplitDnsApi: Send + Sync {
    /// Read the full split-DNS configuration.
    async fn get(&self) -> Result<SplitDnsMap>;

    /// Apply a partial update; domains absent from `updates` are untouched.
    async fn patch(&self, updates: &SplitDnsPatch) -> Result<()>;
}

/// OAuth client credentials.
#[derive(Debug, Clone)]
pub struct Credentials {
    /// OAuth client ID.
    pub client_id: String,
    /// OAuth client secret.
    pub client_secret: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// reqwest-backed split-DNS client for one tailnet.
pub struct SplitDnsClient {
    http: HttpClient,
    base_url: String,
    tailnet: String,
    credentials: Credentials,
    token: Mutex<Option<CachedToken>>,
}

impl SplitDnsClient {
    /// Create a client against `base_url` (e.g., "https://api.tailscale.com").
    pub fn new(
        base_url: impl Into<String>,
        tailnet: impl Into<String>,
        credentials: Credentials,
    ) -> Result<Self> {
        let http = HttpClient::builder().timeout(DEFAULT_TIMEOUT).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            tailnet: tailnet.into(),
            credentials,
            token: Mutex::new(None),
        })
    }

    /// Tailnet this client operates on.
    pub fn tailnet(&self) -> &str {
        &self.tailnet
    }

    fn split_dns_url(&self) -> String {
        format!(
            "{}/api/v2/tailnet/{}/dns/split-dns",
            self.base_url, self.tailnet
        )
    }

    /// Short-lived OAuth access token, cached until shortly before expiry.
    async fn access_token(&self) -> Result<String> {
        let cached = self
            .token
            .lock()
            .as_ref()
            .filter(|token| Instant::now() < token.expires_at)
            .map(|token| token.value.clone());
        if let Some(token) = cached {
            return Ok(token);
        }

        let url = format!("{}/api/v2/oauth/token", self.base_url);
        debug!(url = %url, "requesting OAuth token");

        let response = self
            .http
            .post(&url)
            .form(&[
                ("client_id", self.credentials.client_id.as_str()),
                ("client_secret", self.credentials.client_secret.as_str()),
            ])
            .send()
            .await?;
        let response = check_status(response).await?;
        let token: TokenResponse = response.json().await?;

        let lifetime = Duration::from_secs(token.expires_in.unwrap_or(0))
            .saturating_sub(TOKEN_EXPIRY_MARGIN);
        *self.token.lock() = Some(CachedToken {
            value: token.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });

        Ok(token.access_token)
    }
}

#[async_trait]
impl SplitDnsApi for SplitDnsClient {
    async fn get(&self) -> Result<SplitDnsMap> {
        let token = self.access_token().await?;
        let url = self.split_dns_url();
        debug!(url = %url, "GET split DNS");

        let response = self.http.get(&url).bearer_auth(token).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            // Nothing configured yet
            return Ok(SplitDnsMap::new());
        }

        let response = check_status(response).await?;
        let raw: BTreeMap<String, Option<Vec<String>>> = response.json().await?;
        Ok(raw
            .into_iter()
            .map(|(domain, servers)| (domain, servers.unwrap_or_default()))
            .collect())
    }

    async fn patch(&self, updates: &SplitDnsPatch) -> Result<()> {
        let token = self.access_token().await?;
        let url = self.split_dns_url();
        debug!(url = %url, domains = updates.len(), "PATCH split DNS");

        let response = self
            .http
            .patch(&url)
            .bearer_auth(token)
            .json(updates)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }
}

async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(Error::Api {
        status: status.as_u16(),
        body,
    })
}

/// Extract the tailnet from a MagicDNS name ("host.tail1234.ts.net." -> "tail1234").
pub fn tailnet_from_dns_name(dns_name: &str) -> Option<String> {
    let name = dns_name.trim_end_matches('.');
    let rest = name.strip_suffix(".ts.net")?;
    let (_, tailnet) = rest.rsplit_once('.')?;
    if tailnet.is_empty() {
        return None;
    }
    Some(tailnet.to_string())
}

/// Decide which tailnet to talk to.
///
/// An explicit name wins; otherwise the tailnet is read off the live self
/// node's DNS name; otherwise this fails.
pub fn resolve_tailnet(explicit: Option<&str>, self_dns_name: Option<&str>) -> Result<String> {
    if let Some(name) = explicit.map(str::trim).filter(|n| !n.is_empty()) {
        return Ok(name.to_string());
    }

    if let Some(dns_name) = self_dns_name {
        if let Some(tailnet) = tailnet_from_dns_name(dns_name) {
            return Ok(tailnet);
        }
        return Err(Error::Tailnet(format!(
            "could not extract tailnet from DNS name: {dns_name}"
        )));
    }

    Err(Error::Tailnet(
        "no explicit tailnet configured and no live status available".to_string(),
    ))
}
