//! Shared test infrastructure for integration tests.

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use hickory_proto::op::{Message, MessageType, OpCode, Query};
use hickory_proto::rr::{DNSClass, Name, RData, RecordType};
use hickory_proto::serialize::binary::{BinDecodable, BinDecoder, BinEncoder};
use hickory_server::authority::{Catalog, MessageRequest, MessageResponse};
use hickory_server::proto::rr::Record;
use hickory_server::proto::xfer::Protocol;
use hickory_server::server::{Request, RequestHandler, ResponseHandler, ResponseInfo};

use tailscale_dns::api::{SplitDnsApi, SplitDnsMap, SplitDnsPatch};
use tailscale_dns::config::{
    Config, DnsConfig, ResponderConfig, SplitDnsConfig, TailscaleConfig, TelemetryConfig,
};
use tailscale_dns::error::{Error, Result};
use tailscale_dns::status::{Node, Snapshot, StatusSource};

// --- Constants ---

pub const DOMAIN: &str = "corp.example";
pub const OTHER_DOMAIN: &str = "ts.internal";

// --- TestResponseHandler ---

/// Captures the serialized DNS response for inspection in tests.
#[derive(Clone)]
pub struct TestResponseHandler {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl TestResponseHandler {
    pub fn new() -> Self {
        Self {
            buf: Arc::new(Mutex::new(Vec::with_capacity(512))),
        }
    }

    /// Parse the captured wire bytes into a `Message`.
    pub fn into_message(self) -> Message {
        let buf = self.buf.lock().unwrap();
        assert!(!buf.is_empty(), "no response was captured");
        Message::from_vec(&buf).expect("failed to parse captured DNS response")
    }
}

#[async_trait]
impl ResponseHandler for TestResponseHandler {
    async fn send_response<'a>(
        &mut self,
        response: MessageResponse<
            '_,
            'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
        >,
    ) -> io::Result<ResponseInfo> {
        let mut buf = self.buf.lock().unwrap();
        buf.clear();
        let mut encoder = BinEncoder::new(&mut *buf);
        encoder.set_max_size(u16::MAX);
        let info = response
            .destructive_emit(&mut encoder)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        Ok(info)
    }
}

// --- Snapshot builders ---

pub fn node(hostname: &str, tags: &[&str], addresses: &[&str]) -> Node {
    Node {
        hostname: hostname.to_string(),
        dns_name: format!("{}.tail1234.ts.net.", hostname.to_ascii_lowercase()),
        tags: tags.iter().map(|t| t.to_string()).collect::<BTreeSet<_>>(),
        addresses: addresses.iter().map(|a| a.parse().unwrap()).collect(),
    }
}

pub fn snapshot(self_node: Node, peers: Vec<Node>) -> Snapshot {
    Snapshot { self_node, peers }
}

/// Self node `dns-1` at `self_ip`, plus `db1` (archive subdomain) and `web`.
pub fn sample_snapshot(self_ip: &str) -> Snapshot {
    snapshot(
        node("dns-1", &[], &[self_ip, "fd7a:115c:a1e0::1"]),
        vec![
            node("db1", &["tag:subdomain-archive"], &["10.1.2.3", "fd00::1"]),
            node("web", &[], &["100.64.0.3"]),
        ],
    )
}

// --- FakeStatusSource ---

/// Status source returning a settable snapshot, or an error when cleared.
pub struct FakeStatusSource {
    snapshot: Mutex<Option<Snapshot>>,
    calls: AtomicUsize,
}

impl FakeStatusSource {
    pub fn new(snapshot: Snapshot) -> Arc<Self> {
        Arc::new(Self {
            snapshot: Mutex::new(Some(snapshot)),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn set(&self, snapshot: Snapshot) {
        *self.snapshot.lock().unwrap() = Some(snapshot);
    }

    /// Make every following call fail.
    pub fn fail(&self) {
        *self.snapshot.lock().unwrap() = None;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StatusSource for FakeStatusSource {
    async fn status(&self) -> Result<Snapshot> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.snapshot
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| Error::Status("agent unavailable".to_string()))
    }
}

// --- MockSplitDnsApi ---

/// In-memory split-DNS registry that records every call.
pub struct MockSplitDnsApi {
    registry: Mutex<SplitDnsMap>,
    gets: AtomicUsize,
    patches: Mutex<Vec<SplitDnsPatch>>,
    failing: AtomicBool,
    delay: Mutex<Duration>,
}

impl MockSplitDnsApi {
    pub fn new() -> Arc<Self> {
        Self::with_registry(SplitDnsMap::new())
    }

    pub fn with_registry(registry: SplitDnsMap) -> Arc<Self> {
        Arc::new(Self {
            registry: Mutex::new(registry),
            gets: AtomicUsize::new(0),
            patches: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
            delay: Mutex::new(Duration::ZERO),
        })
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Make every call take `delay` before answering.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn registry(&self) -> SplitDnsMap {
        self.registry.lock().unwrap().clone()
    }

    pub fn servers(&self, domain: &str) -> Option<Vec<String>> {
        self.registry.lock().unwrap().get(domain).cloned()
    }

    /// Drop `server` from `domain` behind the reconciler's back.
    pub fn remove_server(&self, domain: &str, server: &str) {
        if let Some(list) = self.registry.lock().unwrap().get_mut(domain) {
            list.retain(|s| s != server);
        }
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn patches(&self) -> Vec<SplitDnsPatch> {
        self.patches.lock().unwrap().clone()
    }

    async fn respond(&self) -> Result<()> {
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Api {
                status: 500,
                body: "internal error".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl SplitDnsApi for MockSplitDnsApi {
    async fn get(&self) -> Result<SplitDnsMap> {
        self.respond().await?;
        self.gets.fetch_add(1, Ordering::SeqCst);
        Ok(self.registry())
    }

    async fn patch(&self, updates: &SplitDnsPatch) -> Result<()> {
        self.respond().await?;
        self.patches.lock().unwrap().push(updates.clone());
        let mut registry = self.registry.lock().unwrap();
        for (domain, servers) in updates {
            match servers {
                Some(list) => {
                    registry.insert(domain.clone(), list.clone());
                }
                None => {
                    registry.remove(domain);
                }
            }
        }
        Ok(())
    }
}

pub fn registry(entries: &[(&str, &[&str])]) -> SplitDnsMap {
    entries
        .iter()
        .map(|(d, s)| (d.to_string(), s.iter().map(|x| x.to_string()).collect()))
        .collect()
}

pub fn domains(list: &[&str]) -> Vec<String> {
    list.iter().map(|d| d.to_string()).collect()
}

// --- Config builders ---

pub fn test_dns_config() -> DnsConfig {
    DnsConfig {
        domains: domains(&[DOMAIN, OTHER_DOMAIN]),
        listen_addr: "127.0.0.1:0".parse().unwrap(),
        ttl: 60,
        refresh_interval_secs: 30,
    }
}

/// Full config whose agent paths live under `dir`.
pub fn test_config(dir: &Path) -> Config {
    Config {
        dns: test_dns_config(),
        tailscale: TailscaleConfig {
            hostname: "dns-1".to_string(),
            client_id: "client-id".to_string(),
            client_secret: "tskey-secret".to_string(),
            tailnet: None,
            ephemeral: true,
            advertise_tags: vec!["tag:ts-dns".to_string()],
            daemon_bin: PathBuf::from("/nonexistent/tailscaled"),
            cli_bin: PathBuf::from("/nonexistent/tailscale"),
            state_dir: dir.join("state"),
            socket_path: dir.join("run").join("tailscaled.sock"),
            tun: "userspace-networking".to_string(),
        },
        split_dns: SplitDnsConfig::default(),
        responder: ResponderConfig {
            bin: PathBuf::from("/nonexistent/coredns"),
            config_path: dir.join("Corefile"),
            ..ResponderConfig::default()
        },
        telemetry: TelemetryConfig::default(),
    }
}

/// Write an executable shell script into `dir`.
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

// --- Query/Request construction ---

/// Build wire-format bytes for a DNS query.
pub fn build_query_bytes(name: &str, record_type: RecordType, id: u16) -> Vec<u8> {
    let mut msg = Message::new();
    msg.set_id(id);
    msg.set_message_type(MessageType::Query);
    msg.set_op_code(OpCode::Query);
    msg.set_recursion_desired(true);
    let mut query = Query::new();
    query.set_name(Name::from_ascii(name).unwrap());
    query.set_query_type(record_type);
    query.set_query_class(DNSClass::IN);
    msg.add_query(query);
    msg.to_vec().unwrap()
}

/// Build a full `Request` from a local client.
pub fn build_request(name: &str, record_type: RecordType, id: u16) -> Request {
    let bytes = build_query_bytes(name, record_type, id);
    let mut decoder = BinDecoder::new(&bytes);
    let msg = MessageRequest::read(&mut decoder).expect("failed to parse MessageRequest");
    let src: SocketAddr = "127.0.0.1:12345".parse().unwrap();
    Request::new(msg, src, Protocol::Udp)
}

/// Execute a query through the catalog and return the parsed response.
pub async fn execute_query(
    catalog: &Catalog,
    name: &str,
    record_type: RecordType,
    id: u16,
) -> Message {
    let request = build_request(name, record_type, id);
    let handler = TestResponseHandler::new();
    catalog.handle_request(&request, handler.clone()).await;
    handler.into_message()
}

// --- Response helpers ---

pub fn extract_a_ips(msg: &Message) -> Vec<Ipv4Addr> {
    msg.answers()
        .iter()
        .filter_map(|r| match r.data() {
            RData::A(a) => Some(Ipv4Addr::from(*a)),
            _ => None,
        })
        .collect()
}

pub fn extract_aaaa_ips(msg: &Message) -> Vec<Ipv6Addr> {
    msg.answers()
        .iter()
        .filter_map(|r| match r.data() {
            RData::AAAA(aaaa) => Some(Ipv6Addr::from(*aaaa)),
            _ => None,
        })
        .collect()
}

pub fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}
