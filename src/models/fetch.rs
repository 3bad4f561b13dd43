// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) 2026 Aleksandr Ptakhin

use crate::models::config::CrawlConfig;
use crate::models::error::ErrorClass;
use anyhow::{anyhow, Result};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use reqwest::{StatusCode, Version};
use std::time::Duration;
use thiserror::Error;
use url::{Host, Url};

/// Port used for the resolver cache key when the URL does not carry one
pub const DEFAULT_PORT: u16 = 80;

/// Per-request overrides computed from crawler config and the URL
#[derive(Debug, Clone, Default)]
pub struct FetchPolicy {
    /// Headers sent with every attempt (identity headers, `Host` when mocking)
    pub headers: HeaderMap,
    /// Requested proxy; fetches with a proxy fail fast
    pub proxy: Option<String>,
    /// Substitute URL actually fetched in mock mode
    pub mock_url: Option<Url>,
    /// Substitute robots.txt location in mock mode, used by the robots checker
    pub mock_robots: Option<Url>,
}

/// Where one fetch goes on the wire versus what it claims to fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTarget {
    /// URL the caller asked for; used for logging and headers
    pub url: Url,
    /// URL the request is sent to (the mock URL when mocking)
    pub request_url: Url,
    /// Host to resolve, without IPv6 brackets
    pub host: String,
    pub port: u16,
    /// Request goes to the mock host; private addresses are acceptable
    pub mocked: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("URL {0} has no host to fetch from")]
pub struct MissingHost(pub String);

impl FetchTarget {
    pub fn new(url: &Url, policy: &FetchPolicy) -> Result<Self, MissingHost> {
        let request_url = policy.mock_url.clone().unwrap_or_else(|| url.clone());

        let host = match request_url.host() {
            Some(Host::Domain(domain)) => domain.to_string(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => addr.to_string(),
            None => return Err(MissingHost(request_url.to_string())),
        };
        let port = request_url.port().unwrap_or(DEFAULT_PORT);

        Ok(Self {
            url: url.clone(),
            request_url,
            host,
            port,
            mocked: policy.mock_url.is_some(),
        })
    }
}

/// Limits applied to one logical fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchLimits {
    /// Wall-clock limit for the request and body of a single attempt
    pub page_timeout: Duration,
    /// Fixed pause between attempts
    pub retry_timeout: Duration,
    pub max_sub_tries: u32,
    /// Body bytes kept; anything beyond is cut off
    pub max_page_size: usize,
    pub max_redirects: usize,
    pub follow_redirects: bool,
    /// Emit success counters; off for auxiliary fetches like robots.txt
    pub record_stats: bool,
}

impl FetchLimits {
    pub fn from_config(crawl: &CrawlConfig) -> Result<Self> {
        if crawl.max_sub_tries == 0 {
            return Err(anyhow!("MaxSubTries must be at least 1"));
        }

        let page_timeout = Duration::try_from_secs_f64(crawl.page_timeout).map_err(|e| {
            anyhow!(
                "PageTimeout must be a non-negative number of seconds, got {}: {}",
                crawl.page_timeout,
                e
            )
        })?;
        let retry_timeout = Duration::try_from_secs_f64(crawl.retry_timeout).map_err(|e| {
            anyhow!(
                "RetryTimeout must be a non-negative number of seconds, got {}: {}",
                crawl.retry_timeout,
                e
            )
        })?;

        Ok(Self {
            page_timeout,
            retry_timeout,
            max_sub_tries: crawl.max_sub_tries,
            max_page_size: crawl.max_page_size,
            max_redirects: crawl.max_redirects,
            follow_redirects: crawl.follow_redirects,
            record_stats: true,
        })
    }

    /// Redirect limit handed to the HTTP client; `None` means redirects are returned as-is
    pub fn redirect_limit(&self) -> Option<usize> {
        self.follow_redirects.then_some(self.max_redirects)
    }
}

/// Why a body is shorter than what the server had to send
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Truncation {
    #[default]
    None,
    /// Hit `max_page_size`
    LengthLimit,
    /// Hit the page timeout
    TimeLimit,
    /// Connection dropped mid-body
    Disconnect,
}

impl std::fmt::Display for Truncation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Truncation::None => write!(f, "none"),
            Truncation::LengthLimit => write!(f, "length-limit"),
            Truncation::TimeLimit => write!(f, "time-limit"),
            Truncation::Disconnect => write!(f, "disconnect"),
        }
    }
}

/// Status line and headers of a received response
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub version: Version,
    pub headers: HeaderMap,
    /// Final URL after redirects
    pub url: Url,
}

impl ResponseHead {
    /// Size of the status line and headers as they would appear on the wire
    pub fn raw_len(&self) -> usize {
        let status_line = format!(
            "{:?} {} {}\r\n",
            self.version,
            self.status.as_u16(),
            self.status.canonical_reason().unwrap_or("")
        );
        let fields: usize = self
            .headers
            .iter()
            .map(|(name, value)| name.as_str().len() + 2 + value.as_bytes().len() + 2)
            .sum();
        status_line.len() + fields + 2
    }
}

/// What happened in one attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// A response was read; 5xx statuses are retried
    Status(u16),
    Failed(ErrorClass),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptRecord {
    /// 1-based attempt number
    pub number: u32,
    pub elapsed: Duration,
    pub truncation: Truncation,
    /// Body bytes received before the attempt ended
    pub body_bytes: usize,
    /// What a failed attempt had received of the body before it ended.
    /// Empty when the body was handed over as a response.
    pub partial_body: Bytes,
    pub outcome: AttemptOutcome,
}

/// A usable response
#[derive(Debug, Clone)]
pub struct FetchSuccess {
    pub response: ResponseHead,
    pub body: Bytes,
    /// Headers the request carried on the wire, `Host` included
    pub request_headers: HeaderMap,
    pub t_first_byte: Duration,
    pub t_last_byte: Duration,
    pub truncation: Truncation,
    pub fetched_at: DateTime<Utc>,
    pub attempts: Vec<AttemptRecord>,
}

/// A fetch that produced no usable response
#[derive(Debug, Clone, Error)]
#[error("{class}: {message}")]
pub struct FetchFailure {
    pub class: ErrorClass,
    /// Operator-facing diagnostic, never empty
    pub message: String,
    pub attempts: Vec<AttemptRecord>,
}

impl FetchFailure {
    /// Best-effort body captured by the last attempt, if it got any
    pub fn partial_body(&self) -> Option<&Bytes> {
        self.attempts
            .last()
            .map(|attempt| &attempt.partial_body)
            .filter(|body| !body.is_empty())
    }
}

/// Exactly one of a response or an error
pub type FetchResult = std::result::Result<FetchSuccess, FetchFailure>;
