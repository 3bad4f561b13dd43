// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) 2026 Aleksandr Ptakhin

use thiserror::Error;

/// Closed taxonomy of fetch failures.
///
/// Every failed attempt maps to exactly one class; the class of the final
/// attempt is what the caller sees. Caller cancellation is not a class: a
/// cancelled fetch produces no result at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Page timeout elapsed before headers and body were read
    Timeout,
    /// Connection refused/reset, malformed response, disconnect mid-body
    Transport,
    /// DNS lookup failed
    NameResolution,
    /// TLS certificate validation failed
    Certificate,
    /// The target or a redirect could not be turned into a request
    InvalidRequest(RequestFault),
    /// Anything the classifier does not recognise
    Unclassified,
    /// Every attempt ended with a 5xx status; carries the last one
    ServerError { status: u16 },
}

/// Why a request could not be built or followed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestFault {
    /// Target URL has no usable host
    Url,
    /// The HTTP client refused to build the request
    Builder,
    /// Redirect limit exceeded or redirect target unusable
    Redirect,
    /// A proxy was requested; proxies are not supported
    Proxy,
}

impl ErrorClass {
    /// Telemetry counter bumped when a fetch ends in this class
    pub fn counter_name(&self) -> String {
        match self {
            ErrorClass::Timeout => "fetch timeout".to_string(),
            ErrorClass::Transport => "fetch ClientError".to_string(),
            ErrorClass::NameResolution => "fetch DNS error".to_string(),
            ErrorClass::Certificate => "fetch SSL error".to_string(),
            ErrorClass::InvalidRequest(fault) => format!("fetch other error - {}", fault),
            ErrorClass::Unclassified => "fetch surprising error".to_string(),
            ErrorClass::ServerError { .. } => "fetch server error".to_string(),
        }
    }

    /// Stable key for per-class bookkeeping (log caps)
    pub fn key(&self) -> &'static str {
        match self {
            ErrorClass::Timeout => "timeout",
            ErrorClass::Transport => "transport",
            ErrorClass::NameResolution => "name_resolution",
            ErrorClass::Certificate => "certificate",
            ErrorClass::InvalidRequest(_) => "invalid_request",
            ErrorClass::Unclassified => "unclassified",
            ErrorClass::ServerError { .. } => "server_error",
        }
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorClass::Timeout => write!(f, "Timeout"),
            ErrorClass::Transport => write!(f, "TransportError"),
            ErrorClass::NameResolution => write!(f, "NameResolutionError"),
            ErrorClass::Certificate => write!(f, "CertificateError"),
            ErrorClass::InvalidRequest(fault) => write!(f, "InvalidRequestError({})", fault),
            ErrorClass::Unclassified => write!(f, "UnclassifiedError"),
            ErrorClass::ServerError { status } => write!(f, "ServerError5xx({})", status),
        }
    }
}

impl std::fmt::Display for RequestFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestFault::Url => write!(f, "InvalidURL"),
            RequestFault::Builder => write!(f, "InvalidRequest"),
            RequestFault::Redirect => write!(f, "TooManyRedirects"),
            RequestFault::Proxy => write!(f, "ProxyUnsupported"),
        }
    }
}

/// DNS resolution failure, shared by every fetch waiting on the same lookup
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("DNS lookup for {host}:{port} failed: {reason}")]
    LookupFailed {
        host: String,
        port: u16,
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_names_match_dashboards() {
        assert_eq!(ErrorClass::Timeout.counter_name(), "fetch timeout");
        assert_eq!(ErrorClass::Transport.counter_name(), "fetch ClientError");
        assert_eq!(ErrorClass::NameResolution.counter_name(), "fetch DNS error");
        assert_eq!(ErrorClass::Certificate.counter_name(), "fetch SSL error");
        assert_eq!(
            ErrorClass::InvalidRequest(RequestFault::Redirect).counter_name(),
            "fetch other error - TooManyRedirects"
        );
        assert_eq!(
            ErrorClass::Unclassified.counter_name(),
            "fetch surprising error"
        );
    }

    #[test]
    fn test_server_error_display_carries_status() {
        let class = ErrorClass::ServerError { status: 503 };
        assert_eq!(class.to_string(), "ServerError5xx(503)");
        assert_eq!(class.key(), "server_error");
    }

    #[test]
    fn test_resolve_error_message() {
        let err = ResolveError::LookupFailed {
            host: "example.invalid".to_string(),
            port: 80,
            reason: "no such host".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "DNS lookup for example.invalid:80 failed: no such host"
        );
    }
}
