//! Record table construction from membership snapshots.
//!
//! Every node yields `<host>.<domain>.` for each configured domain, plus
//! `<host>.<sub>.<domain>.` for every `tag:subdomain-<suffix>` tag, where the
//! suffix has its hyphens turned into dots.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::status::{Node, Snapshot};

/// Tag prefix that derives an extra subdomain.
pub const SUBDOMAIN_TAG_PREFIX: &str = "tag:subdomain-";

/// Addresses answered for one FQDN.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Record {
    /// First IPv4 address of the node.
    pub ipv4: Option<Ipv4Addr>,
    /// First IPv6 address of the node.
    pub ipv6: Option<Ipv6Addr>,
}

impl Record {
    /// Pick the first IPv4 and first IPv6 address, in order.
    pub fn from_addresses(addresses: &[IpAddr]) -> Self {
        let mut record = Record::default();
        for ip in addresses {
            match ip {
                IpAddr::V4(v4) if record.ipv4.is_none() => record.ipv4 = Some(*v4),
                IpAddr::V6(v6) if record.ipv6.is_none() => record.ipv6 = Some(*v6),
                _ => {}
            }
        }
        record
    }
}

/// FQDN (lower-case, trailing dot) -> record.
pub type RecordTable = HashMap<String, Record>;

/// Subdomain label derived from a node tag, if the tag carries one.
pub fn subdomain_from_tag(tag: &str) -> Option<String> {
    let suffix = tag.strip_prefix(SUBDOMAIN_TAG_PREFIX)?;
    if suffix.is_empty() {
        return None;
    }
    Some(suffix.replace('-', "."))
}

/// Build a complete record table for the snapshot.
///
/// `domains` are expected normalized (no trailing dot, lower-case).
pub fn build_records(snapshot: &Snapshot, domains: &[String]) -> RecordTable {
    let mut table = RecordTable::new();
    for node in snapshot.nodes() {
        insert_node(&mut table, node, domains);
    }
    table
}

fn insert_node(table: &mut RecordTable, node: &Node, domains: &[String]) {
    let host = node.hostname.to_ascii_lowercase();
    if host.is_empty() {
        return;
    }

    let record = Record::from_addresses(&node.addresses);
    let subdomains: Vec<String> = node
        .tags
        .iter()
        .filter_map(|tag| subdomain_from_tag(tag))
        .collect();

    for domain in domains {
        table.insert(format!("{host}.{domain}."), record);
        for sub in &subdomains {
            table.insert(format!("{host}.{sub}.{domain}."), record);
        }
    }
}
