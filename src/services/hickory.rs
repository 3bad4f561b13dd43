// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) 2026 Aleksandr Ptakhin

//! DNS through explicitly configured nameservers, via hickory-resolver.
//!
//! Used instead of [`SystemLookup`](crate::services::resolver::SystemLookup)
//! when `Fetcher.Nameservers` is set. Besides address lookups it answers
//! arbitrary record-type queries for the crawler's site checks.

use crate::models::error::ResolveError;
use crate::services::resolver::Lookup;
use futures::future::{BoxFuture, FutureExt};
use hickory_resolver::config::{NameServerConfigGroup, ResolverConfig, ResolverOpts};
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::TokioResolver;
use std::net::IpAddr;
use std::time::Duration;
use tracing::debug;

pub use hickory_resolver::proto::rr::RecordType;

pub const DNS_PORT: u16 = 53;
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct HickoryLookup {
    resolver: TokioResolver,
}

impl HickoryLookup {
    /// Resolver that asks only `nameservers`, over UDP with TCP fallback
    pub fn with_nameservers(nameservers: &[IpAddr], port: u16, timeout: Duration) -> Self {
        let group = NameServerConfigGroup::from_ips_clear(nameservers, port, true);
        let config = ResolverConfig::from_parts(None, Vec::new(), group);

        let mut opts = ResolverOpts::default();
        opts.timeout = timeout;
        opts.attempts = 1;

        let resolver = TokioResolver::builder_with_config(config, TokioConnectionProvider::default())
            .with_options(opts)
            .build();
        Self { resolver }
    }

    /// Records of `record_type` for `host`, rendered as text.
    ///
    /// Any resolution error, NXDOMAIN included, gives an empty answer.
    pub async fn query(&self, host: &str, record_type: RecordType) -> Vec<String> {
        match self.resolver.lookup(host, record_type).await {
            Ok(answer) => answer.iter().map(ToString::to_string).collect(),
            Err(e) => {
                debug!("{} query for {} failed: {}", record_type, host, e);
                Vec::new()
            }
        }
    }
}

impl Lookup for HickoryLookup {
    fn lookup(&self, host: String, port: u16) -> BoxFuture<'static, Result<Vec<IpAddr>, ResolveError>> {
        let resolver = self.resolver.clone();
        async move {
            let answer = resolver
                .lookup_ip(host.as_str())
                .await
                .map_err(|e| ResolveError::LookupFailed {
                    host: host.clone(),
                    port,
                    reason: e.to_string(),
                })?;

            let mut addresses: Vec<IpAddr> = Vec::new();
            for ip in answer.iter() {
                if !addresses.contains(&ip) {
                    addresses.push(ip);
                }
            }
            Ok(addresses)
        }
        .boxed()
    }
}
