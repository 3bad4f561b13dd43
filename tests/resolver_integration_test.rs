// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) 2026 Aleksandr Ptakhin

use lala_fetcher::services::resolver::{ResolverCache, SystemLookup};
use lala_fetcher::services::stats::{MemoryStats, DNS_LOOKUP};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

fn system_cache() -> (ResolverCache, Arc<MemoryStats>) {
    let stats = Arc::new(MemoryStats::new());
    (ResolverCache::new(Arc::new(SystemLookup), stats.clone()), stats)
}

#[tokio::test]
async fn test_system_lookup_of_localhost() {
    let (cache, stats) = system_cache();

    // Loopback is private: usable only when mocking
    let public = cache.resolve("localhost", 80, false).await.unwrap();
    assert!(public.is_empty());

    let mocked = cache.resolve("localhost", 80, true).await.unwrap();
    assert!(
        mocked.contains(&IpAddr::V4(Ipv4Addr::LOCALHOST)),
        "localhost should resolve to 127.0.0.1, got {:?}",
        mocked
    );

    assert_eq!(cache.len(), 1);
    assert_eq!(stats.latency_count(DNS_LOOKUP), 1);
}

#[tokio::test]
async fn test_system_lookup_of_ip_literal() {
    let (cache, _stats) = system_cache();

    let addresses = cache.resolve("127.0.0.1", 8080, true).await.unwrap();
    assert_eq!(addresses, vec![IpAddr::V4(Ipv4Addr::LOCALHOST)]);

    let raw = cache.cached("127.0.0.1", 8080).unwrap();
    assert_eq!(raw.len(), 1);
}
