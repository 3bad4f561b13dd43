// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) 2026 Aleksandr Ptakhin

//! Fetching with bounded retries.
//!
//! Assumes robots.txt has already been checked. A fetch either returns a
//! response whose body has been fully read (so network errors that only show
//! up while streaming are already shaken out), or a classified failure with a
//! diagnostic string good enough for logging.

use crate::models::error::{ErrorClass, RequestFault, ResolveError};
use crate::models::fetch::{
    AttemptOutcome, AttemptRecord, FetchFailure, FetchLimits, FetchPolicy, FetchResult,
    FetchSuccess, FetchTarget, MissingHost, ResponseHead, Truncation,
};
use crate::services::error_log::ErrorLog;
use crate::services::logging::redact_url;
use crate::services::policy::host_header;
use crate::services::resolver::{ResolverCache, TransportResolver};
use crate::services::stats::{
    self, http_code_counter, StatsSink, FETCHING, FETCH_BYTES, FETCH_URLS, RETRY_SLEEP,
};
use bytes::BytesMut;
use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, HOST};
use reqwest::redirect;
use std::collections::HashMap;
use std::error::Error as StdError;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, Instrument};
use url::Url;
use uuid::Uuid;

/// Why one attempt failed, before classification
#[derive(Debug, Error)]
enum AttemptError {
    #[error(transparent)]
    Target(#[from] MissingHost),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("no complete response within {0:?}")]
    TimedOut(Duration),
}

/// Map any attempt failure to its class
fn classify(err: &AttemptError) -> ErrorClass {
    match err {
        AttemptError::Target(_) => ErrorClass::InvalidRequest(RequestFault::Url),
        AttemptError::Resolve(_) => ErrorClass::NameResolution,
        AttemptError::TimedOut(_) => ErrorClass::Timeout,
        AttemptError::Http(e) => classify_http(e),
    }
}

fn classify_http(err: &reqwest::Error) -> ErrorClass {
    if err.is_timeout() {
        return ErrorClass::Timeout;
    }
    // Hosts first seen through a redirect are resolved inside the client
    if causes(err).any(|cause| cause.is::<ResolveError>()) {
        return ErrorClass::NameResolution;
    }
    if is_certificate_rejection(err) {
        return ErrorClass::Certificate;
    }

    if err.is_redirect() {
        ErrorClass::InvalidRequest(RequestFault::Redirect)
    } else if err.is_builder() {
        ErrorClass::InvalidRequest(RequestFault::Builder)
    } else if err.is_connect() || err.is_request() || err.is_body() || err.is_decode() {
        ErrorClass::Transport
    } else {
        ErrorClass::Unclassified
    }
}

/// OpenSSL and rustls wording for a peer certificate that failed verification
const CERTIFICATE_REJECTIONS: [&str; 2] = ["certificate verify failed", "invalid peer certificate"];

fn is_certificate_rejection(err: &(dyn StdError + 'static)) -> bool {
    causes(err).any(|cause| {
        let text = cause.to_string().to_ascii_lowercase();
        CERTIFICATE_REJECTIONS.iter().any(|needle| text.contains(needle))
    })
}

fn causes<'a>(
    err: &'a (dyn StdError + 'static),
) -> impl Iterator<Item = &'a (dyn StdError + 'static)> {
    std::iter::successors(Some(err), |&cause| cause.source())
}

/// "outer: inner: root cause", skipping repeats
fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut parts: Vec<String> = Vec::new();
    for cause in causes(err) {
        let text = cause.to_string();
        if !text.is_empty() && parts.last() != Some(&text) {
            parts.push(text);
        }
    }
    parts.join(": ")
}

/// Per-attempt working state
struct FetchAttempt {
    number: u32,
    started: Instant,
    body: BytesMut,
    /// Kept body bytes; survives handing `body` over to the transfer
    body_bytes: usize,
    t_first_byte: Option<Duration>,
    t_last_byte: Option<Duration>,
    truncation: Truncation,
}

impl FetchAttempt {
    fn new(number: u32) -> Self {
        Self {
            number,
            started: Instant::now(),
            body: BytesMut::new(),
            body_bytes: 0,
            t_first_byte: None,
            t_last_byte: None,
            truncation: Truncation::None,
        }
    }

    /// Close the attempt. Body bytes not handed over to a transfer are
    /// kept as the partial body.
    fn record(&mut self, outcome: AttemptOutcome) -> AttemptRecord {
        AttemptRecord {
            number: self.number,
            elapsed: self.started.elapsed(),
            truncation: self.truncation,
            body_bytes: self.body_bytes,
            partial_body: self.body.split().freeze(),
            outcome,
        }
    }
}

/// A response read to the end (or to the size limit)
struct Transfer {
    head: ResponseHead,
    body: bytes::Bytes,
    request_headers: HeaderMap,
    t_first_byte: Duration,
    t_last_byte: Duration,
    truncation: Truncation,
}

struct Fault {
    class: ErrorClass,
    message: String,
}

enum State {
    Attempting,
    Evaluate(Transfer),
    Backoff(Fault),
    Exhausted(Fault),
}

/// Fetches URLs for a crawl session.
///
/// Shares one resolver cache across every concurrent fetch, and one HTTP
/// connection pool per (redirect limit, private addresses allowed) pair.
/// Private addresses are allowed for mocked targets only.
pub struct FetchEngine {
    resolver: Arc<ResolverCache>,
    stats: Arc<dyn StatsSink>,
    errors: ErrorLog,
    clients: Mutex<HashMap<ClientKey, reqwest::Client>>,
}

/// Redirect limit and whether the transport may connect to private addresses
type ClientKey = (Option<usize>, bool);

impl FetchEngine {
    pub fn new(resolver: Arc<ResolverCache>, stats: Arc<dyn StatsSink>) -> Self {
        Self {
            resolver,
            stats,
            errors: ErrorLog::default(),
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn resolver(&self) -> &Arc<ResolverCache> {
        &self.resolver
    }

    pub fn errors(&self) -> &ErrorLog {
        &self.errors
    }

    /// Fetch `url` with retries. Dropping the returned future cancels the
    /// fetch and releases any open connection.
    pub async fn fetch(&self, url: &Url, policy: &FetchPolicy, limits: &FetchLimits) -> FetchResult {
        let span = info_span!("fetch", url = %redact_url(url), fetch_id = %Uuid::now_v7());
        self.run(url, policy, limits).instrument(span).await
    }

    /// Like [`fetch`](Self::fetch), returning `None` once `cancel` fires.
    /// A cancelled fetch is neither retried nor counted as a failure.
    pub async fn fetch_cancellable(
        &self,
        url: &Url,
        policy: &FetchPolicy,
        limits: &FetchLimits,
        cancel: &CancellationToken,
    ) -> Option<FetchResult> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(url = %redact_url(url), "fetch cancelled by caller");
                None
            }
            result = self.fetch(url, policy, limits) => Some(result),
        }
    }

    async fn run(&self, url: &Url, policy: &FetchPolicy, limits: &FetchLimits) -> FetchResult {
        if let Some(proxy) = &policy.proxy {
            return Err(FetchFailure {
                class: ErrorClass::InvalidRequest(RequestFault::Proxy),
                message: format!(
                    "proxy {} requested for {}, proxies are not implemented",
                    proxy,
                    redact_url(url)
                ),
                attempts: Vec::new(),
            });
        }

        let target = FetchTarget::new(url, policy);
        let max_tries = limits.max_sub_tries.max(1) as usize;
        let mut attempts: Vec<AttemptRecord> = Vec::new();
        let mut addresses: Vec<IpAddr> = Vec::new();
        let mut state = State::Attempting;

        loop {
            state = match state {
                State::Attempting => {
                    let mut attempt = FetchAttempt::new(attempts.len() as u32 + 1);
                    let result = self
                        .attempt(&target, policy, limits, &mut addresses, &mut attempt)
                        .await;
                    match result {
                        Ok(transfer) => {
                            let status = transfer.head.status.as_u16();
                            attempts.push(attempt.record(AttemptOutcome::Status(status)));
                            State::Evaluate(transfer)
                        }
                        Err(err) => {
                            let fault = self.fault(url, &err);
                            attempts.push(attempt.record(AttemptOutcome::Failed(fault.class)));
                            State::Backoff(fault)
                        }
                    }
                }
                State::Evaluate(transfer) => {
                    let status = transfer.head.status.as_u16();
                    if status < 500 {
                        return Ok(self.succeed(url, transfer, attempts, addresses.is_empty(), limits));
                    }
                    info!("will retry a {} for {}", status, redact_url(url));
                    State::Backoff(Fault {
                        class: ErrorClass::ServerError { status },
                        message: format!("server answered {} for {}", transfer.head.status, redact_url(url)),
                    })
                }
                State::Backoff(fault) if attempts.len() >= max_tries => State::Exhausted(fault),
                State::Backoff(_) => {
                    // Every failure slows down the same way; no growth, no jitter.
                    // Recorded only once slept through, so a cancelled fetch leaves no sample.
                    let started = Instant::now();
                    tokio::time::sleep(limits.retry_timeout).await;
                    self.stats.record_latency(RETRY_SLEEP, started.elapsed());
                    State::Attempting
                }
                State::Exhausted(fault) => return Err(self.exhausted(fault, attempts)),
            };
        }
    }

    async fn attempt(
        &self,
        target: &Result<FetchTarget, MissingHost>,
        policy: &FetchPolicy,
        limits: &FetchLimits,
        addresses: &mut Vec<IpAddr>,
        attempt: &mut FetchAttempt,
    ) -> Result<Transfer, AttemptError> {
        let target = target.as_ref().map_err(Clone::clone)?;

        if addresses.is_empty() {
            *addresses = self.resolver.resolve_target(target).await?;
        }

        let client = self.client_for(limits, target.mocked)?;
        let request = client
            .get(target.request_url.clone())
            .headers(outgoing_headers(policy))
            .build()?;
        let request_headers = transmitted_headers(request.headers(), &target.request_url);

        let received = {
            let _timer = stats::scope(self.stats.as_ref(), FETCHING);
            tokio::time::timeout(
                limits.page_timeout,
                receive(&client, request, limits.max_page_size, attempt),
            )
            .await
        };

        match received {
            Ok(Ok(head)) => Ok(Transfer {
                head,
                body: attempt.body.split().freeze(),
                request_headers,
                t_first_byte: attempt.t_first_byte.unwrap_or_default(),
                t_last_byte: attempt.t_last_byte.unwrap_or_default(),
                truncation: attempt.truncation,
            }),
            Ok(Err(e)) => {
                if attempt.t_first_byte.is_some() {
                    attempt.truncation = Truncation::Disconnect;
                }
                Err(e.into())
            }
            Err(_elapsed) => {
                attempt.truncation = Truncation::TimeLimit;
                Err(AttemptError::TimedOut(limits.page_timeout))
            }
        }
    }

    fn fault(&self, url: &Url, err: &AttemptError) -> Fault {
        let class = classify(err);
        let mut message = error_chain(err);
        if message.is_empty() {
            message = class.to_string();
        }
        self.errors
            .record(class, &redact_url(url), &message, &format!("{:?}", err));
        Fault { class, message }
    }

    fn succeed(
        &self,
        url: &Url,
        transfer: Transfer,
        attempts: Vec<AttemptRecord>,
        no_addresses: bool,
        limits: &FetchLimits,
    ) -> FetchSuccess {
        if no_addresses {
            info!(
                "surprised that no-ip-address fetch of {} succeeded",
                url.host_str().unwrap_or_default()
            );
        }

        if limits.record_stats {
            let status = transfer.head.status.as_u16();
            let bytes = transfer.body.len() + transfer.head.raw_len();
            self.stats.sum(FETCH_URLS, 1);
            self.stats.sum(&http_code_counter(status), 1);
            self.stats.sum(FETCH_BYTES, bytes as u64);
        }

        FetchSuccess {
            response: transfer.head,
            body: transfer.body,
            request_headers: transfer.request_headers,
            t_first_byte: transfer.t_first_byte,
            t_last_byte: transfer.t_last_byte,
            truncation: transfer.truncation,
            fetched_at: Utc::now(),
            attempts,
        }
    }

    fn exhausted(&self, fault: Fault, attempts: Vec<AttemptRecord>) -> FetchFailure {
        debug!(
            "we failed after {} attempts, the last failure is {}: {}",
            attempts.len(),
            fault.class,
            fault.message
        );
        self.stats.sum(&fault.class.counter_name(), 1);
        FetchFailure {
            class: fault.class,
            message: fault.message,
            attempts,
        }
    }

    fn client_for(
        &self,
        limits: &FetchLimits,
        accept_private: bool,
    ) -> Result<reqwest::Client, reqwest::Error> {
        let key = (limits.redirect_limit(), accept_private);
        let mut clients = self.clients.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }

        let redirect_policy = match key.0 {
            Some(max) => redirect::Policy::limited(max),
            None => redirect::Policy::none(),
        };
        let client = reqwest::Client::builder()
            .redirect(redirect_policy)
            .no_proxy()
            .dns_resolver(Arc::new(TransportResolver::new(
                self.resolver.clone(),
                accept_private,
            )))
            .build()?;

        clients.insert(key, client.clone());
        Ok(client)
    }
}

/// Policy headers plus an explicit `Accept`, so the client's own defaults
/// never fill anything in.
fn outgoing_headers(policy: &FetchPolicy) -> HeaderMap {
    let mut headers = policy.headers.clone();
    if !headers.contains_key(ACCEPT) {
        headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
    }
    headers
}

/// The header set as it goes on the wire. HTTP/1 connections add `Host`
/// from the request URL unless one was given; it is not pinned on the
/// request itself so redirects to other hosts still get the right one.
fn transmitted_headers(sent: &HeaderMap, request_url: &Url) -> HeaderMap {
    let mut headers = sent.clone();
    if !headers.contains_key(HOST) {
        if let Some(host) = host_header(request_url) {
            headers.insert(HOST, host);
        }
    }
    headers
}

/// Send the request and read the body, stopping at `max_page_size`.
/// Dropping the response early closes the connection instead of draining it.
async fn receive(
    client: &reqwest::Client,
    request: reqwest::Request,
    max_page_size: usize,
    attempt: &mut FetchAttempt,
) -> Result<ResponseHead, reqwest::Error> {
    let mut response = client.execute(request).await?;
    attempt.t_first_byte = Some(attempt.started.elapsed());

    let head = ResponseHead {
        status: response.status(),
        version: response.version(),
        headers: response.headers().clone(),
        url: response.url().clone(),
    };

    while let Some(chunk) = response.chunk().await? {
        let room = max_page_size.saturating_sub(attempt.body.len());
        if chunk.len() > room {
            attempt.body.extend_from_slice(&chunk[..room]);
            attempt.body_bytes = attempt.body.len();
            attempt.truncation = Truncation::LengthLimit;
            debug!(url = %head.url, max_page_size, "body truncated at size limit");
            break;
        }
        attempt.body.extend_from_slice(&chunk);
        attempt.body_bytes = attempt.body.len();
    }

    attempt.t_last_byte = Some(attempt.started.elapsed());
    Ok(head)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder_error() -> reqwest::Error {
        reqwest::Client::new()
            .get("not a url")
            .build()
            .unwrap_err()
    }

    #[test]
    fn test_classify_missing_host() {
        let err = AttemptError::from(MissingHost("mailto:someone@example.com".to_string()));
        assert_eq!(classify(&err), ErrorClass::InvalidRequest(RequestFault::Url));
    }

    #[test]
    fn test_classify_dns_failure() {
        let err = AttemptError::from(ResolveError::LookupFailed {
            host: "missing.example".to_string(),
            port: 80,
            reason: "no such host".to_string(),
        });
        assert_eq!(classify(&err), ErrorClass::NameResolution);
        assert_eq!(
            error_chain(&err),
            "DNS lookup for missing.example:80 failed: no such host"
        );
    }

    #[test]
    fn test_classify_timeout() {
        let err = AttemptError::TimedOut(Duration::from_secs(3));
        assert_eq!(classify(&err), ErrorClass::Timeout);
        assert_eq!(error_chain(&err), "no complete response within 3s");
    }

    #[test]
    fn test_classify_builder_error() {
        let err = AttemptError::from(builder_error());
        assert_eq!(
            classify(&err),
            ErrorClass::InvalidRequest(RequestFault::Builder)
        );
        assert!(error_chain(&err).starts_with("builder error"));
    }

    #[test]
    fn test_error_chain_skips_repeats() {
        #[derive(Debug, Error)]
        #[error("outer")]
        struct Outer(#[source] Inner);

        #[derive(Debug, Error)]
        #[error("outer")]
        struct Inner(#[source] Root);

        #[derive(Debug, Error)]
        #[error("root cause")]
        struct Root;

        assert_eq!(error_chain(&Outer(Inner(Root))), "outer: root cause");
    }

    #[test]
    fn test_attempt_record_reports_partial_body() {
        let mut attempt = FetchAttempt::new(2);
        attempt.body.extend_from_slice(b"partial");
        attempt.body_bytes = attempt.body.len();
        attempt.truncation = Truncation::Disconnect;

        let record = attempt.record(AttemptOutcome::Failed(ErrorClass::Transport));

        assert_eq!(record.number, 2);
        assert_eq!(record.body_bytes, 7);
        assert_eq!(record.truncation, Truncation::Disconnect);
        assert_eq!(record.outcome, AttemptOutcome::Failed(ErrorClass::Transport));
        assert_eq!(&record.partial_body[..], b"partial");
    }

    #[test]
    fn test_attempt_record_after_transfer_has_no_partial_body() {
        let mut attempt = FetchAttempt::new(1);
        attempt.body.extend_from_slice(b"complete page");
        attempt.body_bytes = attempt.body.len();
        let handed_over = attempt.body.split().freeze();

        let record = attempt.record(AttemptOutcome::Status(200));

        assert_eq!(&handed_over[..], b"complete page");
        assert_eq!(record.body_bytes, 13);
        assert!(record.partial_body.is_empty());
    }

    #[test]
    fn test_certificate_rejection_needs_verify_failure() {
        #[derive(Debug, Error)]
        #[error("error trying to connect")]
        struct Connect(#[source] Tls);

        #[derive(Debug, Error)]
        #[error("{0}")]
        struct Tls(&'static str);

        let rejected = Connect(Tls(
            "error:0A000086:SSL routines:tls_post_process_server_certificate:certificate verify failed",
        ));
        assert!(is_certificate_rejection(&rejected));

        let handshake = Connect(Tls(
            "error:0A000126:SSL routines:tls_post_process_server_certificate:unexpected eof while reading",
        ));
        assert!(!is_certificate_rejection(&handshake));

        let rustls = Connect(Tls("invalid peer certificate: UnknownIssuer"));
        assert!(is_certificate_rejection(&rustls));
    }

    #[test]
    fn test_outgoing_headers_make_accept_explicit() {
        let headers = outgoing_headers(&FetchPolicy::default());
        assert_eq!(headers[ACCEPT], "*/*");

        let mut policy = FetchPolicy::default();
        policy
            .headers
            .insert(ACCEPT, HeaderValue::from_static("text/html"));
        assert_eq!(outgoing_headers(&policy)[ACCEPT], "text/html");
    }

    #[test]
    fn test_transmitted_headers_add_host_like_the_connection() {
        let sent = outgoing_headers(&FetchPolicy::default());

        let default_port = Url::parse("http://example.com/page").unwrap();
        assert_eq!(transmitted_headers(&sent, &default_port)[HOST], "example.com");

        let explicit_port = Url::parse("http://127.0.0.1:8080/").unwrap();
        assert_eq!(
            transmitted_headers(&sent, &explicit_port)[HOST],
            "127.0.0.1:8080"
        );

        let mut overridden = sent.clone();
        overridden.insert(HOST, HeaderValue::from_static("example.com"));
        let recorded = transmitted_headers(&overridden, &explicit_port);
        assert_eq!(recorded[HOST], "example.com");
        assert_eq!(recorded.len(), 2);
    }
}
