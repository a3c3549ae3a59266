//! Catalog-level tests: queries go through Hickory's `Catalog` into the
//! per-domain authorities backed by a record cache built from a snapshot.

mod common;

use common::*;
use hickory_proto::op::ResponseCode;
use hickory_proto::rr::RecordType;
use std::net::{Ipv4Addr, Ipv6Addr};
use tailscale_dns::records::build_records;
use tailscale_dns::server::build_catalog;
use tailscale_dns::RecordCache;

fn sample_cache() -> RecordCache {
    let cache = RecordCache::new();
    let config = test_dns_config();
    cache.replace(build_records(&sample_snapshot("100.64.0.1"), &config.domains));
    cache
}

#[tokio::test]
async fn a_query_returns_ipv4() {
    let catalog = build_catalog(&test_dns_config(), &sample_cache()).unwrap();
    let msg = execute_query(&catalog, "db1.corp.example.", RecordType::A, 1).await;

    assert_eq!(msg.response_code(), ResponseCode::NoError);
    assert_eq!(extract_a_ips(&msg), vec![Ipv4Addr::new(10, 1, 2, 3)]);
}

#[tokio::test]
async fn aaaa_query_returns_ipv6() {
    let catalog = build_catalog(&test_dns_config(), &sample_cache()).unwrap();
    let msg = execute_query(&catalog, "db1.corp.example.", RecordType::AAAA, 2).await;

    assert_eq!(msg.response_code(), ResponseCode::NoError);
    assert_eq!(
        extract_aaaa_ips(&msg),
        vec!["fd00::1".parse::<Ipv6Addr>().unwrap()]
    );
}

#[tokio::test]
async fn tag_subdomain_is_served() {
    let catalog = build_catalog(&test_dns_config(), &sample_cache()).unwrap();
    let msg = execute_query(&catalog, "db1.archive.corp.example.", RecordType::A, 3).await;

    assert_eq!(extract_a_ips(&msg), vec![Ipv4Addr::new(10, 1, 2, 3)]);
}

#[tokio::test]
async fn second_domain_is_served() {
    let catalog = build_catalog(&test_dns_config(), &sample_cache()).unwrap();
    let msg = execute_query(&catalog, "web.ts.internal.", RecordType::A, 4).await;

    assert_eq!(extract_a_ips(&msg), vec![Ipv4Addr::new(100, 64, 0, 3)]);
}

#[tokio::test]
async fn self_node_is_served() {
    let catalog = build_catalog(&test_dns_config(), &sample_cache()).unwrap();
    let msg = execute_query(&catalog, "dns-1.corp.example.", RecordType::A, 5).await;

    assert_eq!(extract_a_ips(&msg), vec![Ipv4Addr::new(100, 64, 0, 1)]);
}

#[tokio::test]
async fn query_is_case_insensitive() {
    let catalog = build_catalog(&test_dns_config(), &sample_cache()).unwrap();
    let msg = execute_query(&catalog, "DB1.Corp.Example.", RecordType::A, 6).await;

    assert_eq!(extract_a_ips(&msg), vec![Ipv4Addr::new(10, 1, 2, 3)]);
}

#[tokio::test]
async fn unknown_name_has_no_answer() {
    let catalog = build_catalog(&test_dns_config(), &sample_cache()).unwrap();
    let msg = execute_query(&catalog, "nope.corp.example.", RecordType::A, 7).await;

    assert!(msg.answers().is_empty());
}

#[tokio::test]
async fn missing_family_has_no_answer() {
    let catalog = build_catalog(&test_dns_config(), &sample_cache()).unwrap();
    // web has no IPv6 address
    let msg = execute_query(&catalog, "web.corp.example.", RecordType::AAAA, 8).await;

    assert!(extract_aaaa_ips(&msg).is_empty());
}

#[tokio::test]
async fn catalog_sees_replaced_table() {
    let cache = sample_cache();
    let catalog = build_catalog(&test_dns_config(), &cache).unwrap();

    let moved = snapshot(
        node("dns-1", &[], &["100.64.0.1"]),
        vec![node("db1", &[], &["10.9.9.9"])],
    );
    cache.replace(build_records(&moved, &test_dns_config().domains));

    let msg = execute_query(&catalog, "db1.corp.example.", RecordType::A, 9).await;
    assert_eq!(extract_a_ips(&msg), vec![Ipv4Addr::new(10, 9, 9, 9)]);

    // Subdomain tag removed along with the old table
    let msg = execute_query(&catalog, "db1.archive.corp.example.", RecordType::A, 10).await;
    assert!(msg.answers().is_empty());
}
