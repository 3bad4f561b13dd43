// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) 2026 Aleksandr Ptakhin

//! Telemetry side channel.
//!
//! The fetch core only emits named counters and latencies; aggregation and
//! export belong to whatever implements [`StatsSink`].

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub const FETCH_URLS: &str = "fetch URLs";
pub const FETCH_BYTES: &str = "fetch bytes";
pub const FETCHING: &str = "fetcher fetching";
pub const DNS_LOOKUP: &str = "fetcher DNS lookup";
pub const RETRY_SLEEP: &str = "fetcher retry sleep";

/// Counter for responses with the given status code
pub fn http_code_counter(status: u16) -> String {
    format!("fetch http code={}", status)
}

/// Receiver of named counters and latency samples
pub trait StatsSink: Send + Sync {
    fn sum(&self, name: &str, value: u64);
    fn record_latency(&self, name: &str, elapsed: Duration);
}

/// Records the time between creation and drop under `name`
pub struct LatencyScope<'a> {
    sink: &'a dyn StatsSink,
    name: &'static str,
    started: Instant,
}

pub fn scope<'a>(sink: &'a dyn StatsSink, name: &'static str) -> LatencyScope<'a> {
    LatencyScope {
        sink,
        name,
        started: Instant::now(),
    }
}

impl Drop for LatencyScope<'_> {
    fn drop(&mut self) {
        self.sink.record_latency(self.name, self.started.elapsed());
    }
}

/// Sink that drops everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullStats;

impl StatsSink for NullStats {
    fn sum(&self, _name: &str, _value: u64) {}
    fn record_latency(&self, _name: &str, _elapsed: Duration) {}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LatencySummary {
    pub count: u64,
    pub total_secs: f64,
    pub max_secs: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub counters: BTreeMap<String, u64>,
    pub latencies: BTreeMap<String, LatencySummary>,
}

/// In-process sink, for the CLI and for tests
#[derive(Debug, Default)]
pub struct MemoryStats {
    inner: Mutex<StatsSnapshot>,
}

impl MemoryStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.lock().counters.get(name).copied().unwrap_or(0)
    }

    /// Number of latency samples recorded under `name`
    pub fn latency_count(&self, name: &str) -> u64 {
        self.lock()
            .latencies
            .get(name)
            .map(|summary| summary.count)
            .unwrap_or(0)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StatsSnapshot> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl StatsSink for MemoryStats {
    fn sum(&self, name: &str, value: u64) {
        *self.lock().counters.entry(name.to_string()).or_insert(0) += value;
    }

    fn record_latency(&self, name: &str, elapsed: Duration) {
        let secs = elapsed.as_secs_f64();
        let mut inner = self.lock();
        let summary = inner.latencies.entry(name.to_string()).or_default();
        summary.count += 1;
        summary.total_secs += secs;
        if secs > summary.max_secs {
            summary.max_secs = secs;
        }
    }
}
