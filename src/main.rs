// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) 2026 Aleksandr Ptakhin

use anyhow::{Context, Result};
use clap::Parser;
use futures::stream::{self, StreamExt};
use lala_fetcher::models::config::Config;
use lala_fetcher::models::fetch::FetchLimits;
use lala_fetcher::services::fetcher::FetchEngine;
use lala_fetcher::services::hickory::{HickoryLookup, DEFAULT_QUERY_TIMEOUT, DNS_PORT};
use lala_fetcher::services::logging::{init_tracing, redact_url};
use lala_fetcher::services::policy::apply_url_policies;
use lala_fetcher::services::resolver::{Lookup, ResolverCache, SystemLookup};
use lala_fetcher::services::stats::MemoryStats;
use lala_fetcher::VERSION;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use url::Url;

/// Fetch URLs the way the crawler does and report what happened
#[derive(Debug, Parser)]
#[command(name = "lala-fetcher", version = VERSION)]
struct Args {
    /// JSON config file; environment variables are used when absent
    #[arg(long)]
    config: Option<PathBuf>,

    /// Fetches in flight at once
    #[arg(long, default_value_t = 8)]
    concurrency: usize,

    #[arg(required = true)]
    urls: Vec<Url>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("info");
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::from_json_file(path)?,
        None => Config::from_env().context("Failed to load configuration from environment")?,
    };
    let limits = FetchLimits::from_config(&config.crawl)?;

    info!("lala-fetcher v{} fetching {} URLs", VERSION, args.urls.len());
    if let Some(test_host) = config.testing.test_host() {
        warn!("mock mode: every fetch goes to {}", test_host);
    }

    let stats = Arc::new(MemoryStats::new());
    let lookup: Arc<dyn Lookup> = if config.fetcher.nameservers.is_empty() {
        Arc::new(SystemLookup)
    } else {
        info!("resolving through {:?}", config.fetcher.nameservers);
        Arc::new(HickoryLookup::with_nameservers(
            &config.fetcher.nameservers,
            DNS_PORT,
            DEFAULT_QUERY_TIMEOUT,
        ))
    };
    let resolver = Arc::new(ResolverCache::new(lookup, stats.clone()));
    let engine = FetchEngine::new(resolver, stats.clone());

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted, cancelling fetches in flight");
                cancel.cancel();
            }
        }
    });

    let lines: Vec<String> = stream::iter(&args.urls)
        .map(|url| fetch_line(&engine, &config, &limits, &cancel, url))
        .buffer_unordered(args.concurrency.max(1))
        .collect()
        .await;

    for line in lines {
        println!("{}", line);
    }
    println!("{}", serde_json::to_string_pretty(&stats.snapshot())?);

    Ok(())
}

async fn fetch_line(
    engine: &FetchEngine,
    config: &Config,
    limits: &FetchLimits,
    cancel: &CancellationToken,
    url: &Url,
) -> String {
    let shown = redact_url(url);
    let policy = match apply_url_policies(url, config) {
        Ok(policy) => policy,
        Err(e) => return format!("{} policy-error {}", shown, e),
    };

    match engine.fetch_cancellable(url, &policy, limits, cancel).await {
        None => format!("{} cancelled", shown),
        Some(Ok(success)) => format!(
            "{} {} {} bytes truncation={} attempts={} first-byte={:.3}s last-byte={:.3}s",
            shown,
            success.response.status.as_u16(),
            success.body.len(),
            success.truncation,
            success.attempts.len(),
            success.t_first_byte.as_secs_f64(),
            success.t_last_byte.as_secs_f64(),
        ),
        Some(Err(failure)) => format!(
            "{} failed {} attempts={} {}",
            shown,
            failure.class,
            failure.attempts.len(),
            failure.message
        ),
    }
}
