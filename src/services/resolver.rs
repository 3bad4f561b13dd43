// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) 2026 Aleksandr Ptakhin

//! DNS pre-resolution with a session-lifetime cache.
//!
//! Resolving before the HTTP request lets DNS failures be counted and logged
//! apart from connect failures. Entries never expire on their own; long
//! running sessions should call [`ResolverCache::clear`] now and then.

use crate::models::error::ResolveError;
use crate::models::fetch::{FetchTarget, DEFAULT_PORT};
use crate::services::stats::{self, StatsSink, DNS_LOOKUP};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

/// Raw answer of one lookup, shared between everyone who asked for it
pub type Addresses = Arc<[IpAddr]>;

type PendingLookup = Shared<BoxFuture<'static, Result<Addresses, ResolveError>>>;

/// Name resolution backend
pub trait Lookup: Send + Sync {
    fn lookup(&self, host: String, port: u16) -> BoxFuture<'static, Result<Vec<IpAddr>, ResolveError>>;
}

/// Resolves through the operating system (getaddrinfo)
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemLookup;

impl Lookup for SystemLookup {
    fn lookup(&self, host: String, port: u16) -> BoxFuture<'static, Result<Vec<IpAddr>, ResolveError>> {
        async move {
            let answer = tokio::net::lookup_host((host.as_str(), port))
                .await
                .map_err(|e| ResolveError::LookupFailed {
                    host: host.clone(),
                    port,
                    reason: e.to_string(),
                })?;

            // getaddrinfo repeats addresses once per socket type
            let mut addresses: Vec<IpAddr> = Vec::new();
            for ip in answer.map(|addr| addr.ip()) {
                if !addresses.contains(&ip) {
                    addresses.push(ip);
                }
            }
            Ok(addresses)
        }
        .boxed()
    }
}

enum Slot {
    Ready(Addresses),
    InFlight {
        generation: u64,
        lookup: PendingLookup,
    },
}

/// Cache of DNS answers keyed by (host, port).
///
/// Concurrent misses on the same key share one in-flight lookup. Failed
/// lookups are not cached, so the next attempt asks again.
pub struct ResolverCache {
    lookup: Arc<dyn Lookup>,
    stats: Arc<dyn StatsSink>,
    slots: Mutex<HashMap<(String, u16), Slot>>,
    generation: AtomicU64,
}

impl ResolverCache {
    pub fn new(lookup: Arc<dyn Lookup>, stats: Arc<dyn StatsSink>) -> Self {
        Self {
            lookup,
            stats,
            slots: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    /// Usable addresses for a fetch target.
    /// Private addresses are kept only when the target is mocked.
    pub async fn resolve_target(&self, target: &FetchTarget) -> Result<Vec<IpAddr>, ResolveError> {
        self.resolve(&target.host, target.port, target.mocked).await
    }

    /// Usable IPv4 addresses for `host:port`.
    ///
    /// An empty list is not an error: the transport will fail to connect and
    /// that failure is classified like any other.
    pub async fn resolve(
        &self,
        host: &str,
        port: u16,
        accept_private: bool,
    ) -> Result<Vec<IpAddr>, ResolveError> {
        let raw = self.resolve_raw(host, port).await?;
        Ok(filter_addresses(host, &raw, accept_private))
    }

    /// Unfiltered cached answer, without triggering a lookup
    pub fn cached(&self, host: &str, port: u16) -> Option<Addresses> {
        match self.lock().get(&(host.to_ascii_lowercase(), port)) {
            Some(Slot::Ready(addresses)) => Some(addresses.clone()),
            _ => None,
        }
    }

    /// Number of completed entries
    pub fn len(&self) -> usize {
        self.lock()
            .values()
            .filter(|slot| matches!(slot, Slot::Ready(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget every answer. Lookups already in flight finish but are not stored.
    pub fn clear(&self) {
        let mut slots = self.lock();
        info!(entries = slots.len(), "clearing DNS cache");
        slots.clear();
    }

    pub(crate) async fn resolve_raw(&self, host: &str, port: u16) -> Result<Addresses, ResolveError> {
        let key = (host.to_ascii_lowercase(), port);

        let (generation, pending) = {
            let mut slots = self.lock();
            match slots.get(&key) {
                Some(Slot::Ready(addresses)) => return Ok(addresses.clone()),
                Some(Slot::InFlight { generation, lookup }) => {
                    debug!(host, port, "joining in-flight DNS lookup");
                    (*generation, lookup.clone())
                }
                None => {
                    let generation = self.generation.fetch_add(1, Ordering::Relaxed);
                    let lookup = self.start_lookup(key.0.clone(), port);
                    slots.insert(
                        key.clone(),
                        Slot::InFlight {
                            generation,
                            lookup: lookup.clone(),
                        },
                    );
                    (generation, lookup)
                }
            }
        };

        let result = pending.await;
        self.settle(&key, generation, &result);
        result
    }

    /// Any completed answer for `host`, whatever the port
    fn cached_for_host(&self, host: &str) -> Option<Addresses> {
        let host = host.to_ascii_lowercase();
        self.lock().iter().find_map(|((cached_host, _), slot)| match slot {
            Slot::Ready(addresses) if *cached_host == host => Some(addresses.clone()),
            _ => None,
        })
    }

    fn start_lookup(&self, host: String, port: u16) -> PendingLookup {
        let lookup = self.lookup.lookup(host, port);
        let stats = self.stats.clone();
        async move {
            let _timer = stats::scope(stats.as_ref(), DNS_LOOKUP);
            lookup.await.map(Addresses::from)
        }
        .boxed()
        .shared()
    }

    /// Replace the in-flight marker with the outcome, if the marker is still ours
    fn settle(&self, key: &(String, u16), generation: u64, result: &Result<Addresses, ResolveError>) {
        let mut slots = self.lock();
        let ours = matches!(
            slots.get(key),
            Some(Slot::InFlight { generation: current, .. }) if *current == generation
        );
        if !ours {
            return;
        }
        match result {
            Ok(addresses) => {
                slots.insert(key.clone(), Slot::Ready(addresses.clone()));
            }
            Err(_) => {
                slots.remove(key);
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<(String, u16), Slot>> {
        self.slots.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Drop addresses the crawler must not connect to.
///
/// Private ranges are dropped unless `accept_private` (mock mode targets a
/// local fixture). Anything with a colon is dropped as well: the crawler runs
/// IPv4-only.
pub fn filter_addresses(host: &str, raw: &[IpAddr], accept_private: bool) -> Vec<IpAddr> {
    let mut usable = Vec::with_capacity(raw.len());
    for ip in raw {
        if !accept_private && is_private(ip) {
            info!("host {} has private ip of {}, ignoring", host, ip);
            continue;
        }
        if ip.to_string().contains(':') {
            info!("host {} has ipv6 result of {}, ignoring", host, ip);
            continue;
        }
        usable.push(*ip);
    }

    if usable.is_empty() {
        info!("host {} has no addresses", host);
    }
    usable
}

/// Addresses that are not globally reachable
pub fn is_private(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_private_v4(v4),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => is_private_v4(&v4),
            None => is_private_v6(v6),
        },
    }
}

fn is_private_v4(ip: &Ipv4Addr) -> bool {
    let [a, b, c, d] = ip.octets();
    ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_documentation()
        || ip.is_broadcast()
        // 0.0.0.0/8 "this network"
        || a == 0
        // 192.0.0.0/29 IETF protocol assignments
        || (a == 192 && b == 0 && c == 0 && d < 8)
        // 198.18.0.0/15 benchmarking
        || (a == 198 && (b & 0xfe) == 18)
        // 240.0.0.0/4 reserved
        || a >= 240
}

fn is_private_v6(ip: &Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        // fc00::/7 unique local
        || (first & 0xfe00) == 0xfc00
        // fe80::/10 link local
        || (first & 0xffc0) == 0xfe80
        // 2001:db8::/32 documentation
        || (first == 0x2001 && ip.segments()[1] == 0x0db8)
}

/// Lets the HTTP client resolve through the cache, so hosts reached by
/// redirect are cached and filtered the same way as the first hop.
pub(crate) struct TransportResolver {
    cache: Arc<ResolverCache>,
    accept_private: bool,
}

impl TransportResolver {
    pub(crate) fn new(cache: Arc<ResolverCache>, accept_private: bool) -> Self {
        Self {
            cache,
            accept_private,
        }
    }
}

async fn transport_addrs(
    cache: &ResolverCache,
    host: &str,
    accept_private: bool,
) -> Result<Vec<SocketAddr>, ResolveError> {
    let raw = match cache.cached_for_host(host) {
        Some(raw) => raw,
        None => cache.resolve_raw(host, DEFAULT_PORT).await?,
    };
    // Port 0 is replaced with the URL's port by the connector
    Ok(filter_addresses(host, &raw, accept_private)
        .into_iter()
        .map(|ip| SocketAddr::new(ip, 0))
        .collect())
}

impl reqwest::dns::Resolve for TransportResolver {
    fn resolve(&self, name: reqwest::dns::Name) -> reqwest::dns::Resolving {
        let cache = self.cache.clone();
        let accept_private = self.accept_private;
        Box::pin(async move {
            match transport_addrs(&cache, name.as_str(), accept_private).await {
                Ok(addrs) => Ok(Box::new(addrs.into_iter()) as reqwest::dns::Addrs),
                Err(e) => Err(Box::new(e) as Box<dyn std::error::Error + Send + Sync>),
            }
        })
    }
}
