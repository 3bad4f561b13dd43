// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) 2026 Aleksandr Ptakhin

use crate::models::config::Config;
use crate::models::fetch::FetchPolicy;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_ENCODING, HOST, USER_AGENT};
use tracing::warn;
use url::{Position, Url};

const UPGRADE_INSECURE_REQUESTS: &str = "upgrade-insecure-requests";

/// Compute the per-request overrides for `url`.
///
/// In mock mode (`Testing.TestHostmapAll`) the request is sent to the test
/// host while the `Host` header keeps naming the original one.
pub fn apply_url_policies(url: &Url, config: &Config) -> Result<FetchPolicy, url::ParseError> {
    let mut policy = FetchPolicy {
        headers: identity_headers(config),
        ..Default::default()
    };

    if let Some(test_host) = config.testing.test_host() {
        if let Some(host) = host_header(url) {
            policy.headers.insert(HOST, host);
        }
        policy.mock_url = Some(mock_url(url, test_host)?);
        policy.mock_robots = Some(Url::parse(&format!(
            "{}://{}/robots.txt",
            url.scheme(),
            test_host
        ))?);
    }

    Ok(policy)
}

fn identity_headers(config: &Config) -> HeaderMap {
    let identity = &config.identity;
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("*/*"));

    match HeaderValue::from_str(&identity.user_agent) {
        Ok(value) => {
            headers.insert(USER_AGENT, value);
        }
        Err(e) => warn!("user agent {:?} is not a valid header: {}", identity.user_agent, e),
    }
    if identity.prevent_compression {
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));
    }
    if identity.upgrade_insecure_requests {
        headers.insert(UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));
    }

    headers
}

/// `host[:port]` of a URL, as the server expects it in `Host`.
/// The port is left out when it is the scheme's default.
pub(crate) fn host_header(url: &Url) -> Option<HeaderValue> {
    let host = url.host_str()?;
    let value = match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };
    HeaderValue::from_str(&value).ok()
}

/// `url` with its authority replaced by `test_host`
fn mock_url(url: &Url, test_host: &str) -> Result<Url, url::ParseError> {
    Url::parse(&format!(
        "{}://{}{}",
        url.scheme(),
        test_host,
        &url[Position::BeforePath..]
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::config::TestingConfig;

    fn mock_config(test_host: &str) -> Config {
        Config {
            testing: TestingConfig {
                test_hostmap_all: Some(test_host.to_string()),
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_plain_policy_has_identity_headers_only() {
        let mut config = Config::default();
        config.identity.user_agent = "LalaSearchBot/0.1".to_string();
        let url = Url::parse("https://example.com/page").unwrap();

        let policy = apply_url_policies(&url, &config).unwrap();

        assert_eq!(policy.headers[USER_AGENT], "LalaSearchBot/0.1");
        assert_eq!(policy.headers[ACCEPT], "*/*");
        assert_eq!(policy.headers.len(), 2);
        assert!(policy.headers.get(HOST).is_none());
        assert!(policy.headers.get(ACCEPT_ENCODING).is_none());
        assert!(policy.mock_url.is_none());
        assert!(policy.mock_robots.is_none());
        assert!(policy.proxy.is_none());
    }

    #[test]
    fn test_compression_and_upgrade_preferences() {
        let mut config = Config::default();
        config.identity.prevent_compression = true;
        config.identity.upgrade_insecure_requests = true;
        let url = Url::parse("http://example.com/").unwrap();

        let policy = apply_url_policies(&url, &config).unwrap();

        assert_eq!(policy.headers[ACCEPT_ENCODING], "identity");
        assert_eq!(policy.headers[UPGRADE_INSECURE_REQUESTS], "1");
    }

    #[test]
    fn test_mock_mode_rewrites_target_keeps_host() {
        let config = mock_config("fixture.local");
        let url = Url::parse("https://example.com/page?q=1").unwrap();

        let policy = apply_url_policies(&url, &config).unwrap();

        assert_eq!(policy.headers[HOST], "example.com");
        assert_eq!(
            policy.mock_url.unwrap().as_str(),
            "https://fixture.local/page?q=1"
        );
        assert_eq!(
            policy.mock_robots.unwrap().as_str(),
            "https://fixture.local/robots.txt"
        );
    }

    #[test]
    fn test_mock_mode_with_ports() {
        let config = mock_config("127.0.0.1:8080");
        let url = Url::parse("http://example.com:8000/a/b").unwrap();

        let policy = apply_url_policies(&url, &config).unwrap();

        assert_eq!(policy.headers[HOST], "example.com:8000");
        assert_eq!(
            policy.mock_url.unwrap().as_str(),
            "http://127.0.0.1:8080/a/b"
        );
    }

    #[test]
    fn test_hostmap_n_disables_mocking() {
        let config = mock_config("n");
        let url = Url::parse("http://example.com/").unwrap();

        let policy = apply_url_policies(&url, &config).unwrap();

        assert!(policy.mock_url.is_none());
        assert!(policy.headers.get(HOST).is_none());
    }
}
