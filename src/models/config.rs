// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) 2026 Aleksandr Ptakhin

//! Crawler configuration consumed by the fetch core.
//!
//! The JSON layout mirrors the crawler's config file sections
//! (`Crawl`, `Fetcher`, `Testing`, `Identity`), so an existing config can be
//! fed in as-is.

use crate::models::fetch::FetchLimits;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::Path;
use std::str::FromStr;

pub const DEFAULT_PAGE_TIMEOUT_SECS: f64 = 30.0;
pub const DEFAULT_RETRY_TIMEOUT_SECS: f64 = 5.0;
pub const DEFAULT_MAX_SUB_TRIES: u32 = 3;
pub const DEFAULT_MAX_PAGE_SIZE: usize = 4 * 1024 * 1024;
pub const DEFAULT_MAX_REDIRECTS: usize = 10;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Config {
    #[serde(default)]
    pub crawl: CrawlConfig,
    #[serde(default)]
    pub fetcher: FetcherConfig,
    #[serde(default)]
    pub testing: TestingConfig,
    #[serde(default)]
    pub identity: CrawlerIdentity,
}

/// `Crawl` section: per-fetch limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct CrawlConfig {
    /// Wall-clock limit for one attempt, in seconds
    pub page_timeout: f64,
    /// Fixed pause between attempts, in seconds
    pub retry_timeout: f64,
    pub max_sub_tries: u32,
    pub max_page_size: usize,
    pub max_redirects: usize,
    pub follow_redirects: bool,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            page_timeout: DEFAULT_PAGE_TIMEOUT_SECS,
            retry_timeout: DEFAULT_RETRY_TIMEOUT_SECS,
            max_sub_tries: DEFAULT_MAX_SUB_TRIES,
            max_page_size: DEFAULT_MAX_PAGE_SIZE,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            follow_redirects: true,
        }
    }
}

/// `Fetcher` section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct FetcherConfig {
    /// Nameservers to query instead of the system resolver
    pub nameservers: Vec<IpAddr>,
}

/// `Testing` section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct TestingConfig {
    /// Send every fetch to this `host[:port]` instead of the real one
    pub test_hostmap_all: Option<String>,
}

impl TestingConfig {
    /// The mock host, if mock mode is on.
    /// An empty value or `n` counts as off, as in the YAML configs.
    pub fn test_host(&self) -> Option<&str> {
        match self.test_hostmap_all.as_deref().map(str::trim) {
            None | Some("") | Some("n") => None,
            Some(host) => Some(host),
        }
    }
}

/// Crawler-wide request identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct CrawlerIdentity {
    pub user_agent: String,
    /// Ask servers for an uncompressed body (`Accept-Encoding: identity`)
    pub prevent_compression: bool,
    /// Send `Upgrade-Insecure-Requests: 1`
    pub upgrade_insecure_requests: bool,
}

impl Default for CrawlerIdentity {
    fn default() -> Self {
        Self {
            user_agent: format!("lala-fetcher/{}", crate::VERSION),
            prevent_compression: false,
            upgrade_insecure_requests: false,
        }
    }
}

impl Config {
    /// Load configuration from environment variables, falling back to defaults
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Load configuration from a JSON file
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Build a config from an arbitrary variable source
    pub fn from_vars<F>(var: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = CrawlConfig::default();
        let crawl = CrawlConfig {
            page_timeout: parse_var(&var, "CRAWL_PAGE_TIMEOUT", defaults.page_timeout)?,
            retry_timeout: parse_var(&var, "CRAWL_RETRY_TIMEOUT", defaults.retry_timeout)?,
            max_sub_tries: parse_var(&var, "CRAWL_MAX_SUB_TRIES", defaults.max_sub_tries)?,
            max_page_size: parse_var(&var, "CRAWL_MAX_PAGE_SIZE", defaults.max_page_size)?,
            max_redirects: parse_var(&var, "CRAWL_MAX_REDIRECTS", defaults.max_redirects)?,
            follow_redirects: parse_var(&var, "CRAWL_FOLLOW_REDIRECTS", defaults.follow_redirects)?,
        };

        let fetcher = FetcherConfig {
            nameservers: match var("FETCHER_NAMESERVERS") {
                Some(raw) => parse_list(&raw, "FETCHER_NAMESERVERS")?,
                None => Vec::new(),
            },
        };

        let testing = TestingConfig {
            test_hostmap_all: var("TESTING_TEST_HOSTMAP_ALL"),
        };

        let mut identity = CrawlerIdentity::default();
        if let Some(user_agent) = var("USER_AGENT") {
            identity.user_agent = user_agent;
        }
        identity.prevent_compression = parse_var(&var, "PREVENT_COMPRESSION", false)?;
        identity.upgrade_insecure_requests = parse_var(&var, "UPGRADE_INSECURE_REQUESTS", false)?;

        let config = Self {
            crawl,
            fetcher,
            testing,
            identity,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values the fetch engine cannot run with
    pub fn validate(&self) -> Result<()> {
        FetchLimits::from_config(&self.crawl)?;

        if self.identity.user_agent.is_empty()
            || reqwest::header::HeaderValue::from_str(&self.identity.user_agent).is_err()
        {
            return Err(anyhow!(
                "UserAgent must be a non-empty header value, got: {:?}",
                self.identity.user_agent
            ));
        }

        if let Some(host) = self.testing.test_host() {
            url::Url::parse(&format!("http://{}/", host))
                .map_err(|e| anyhow!("TestHostmapAll {:?} is not a valid host: {}", host, e))?;
        }

        Ok(())
    }
}

fn parse_var<F, T>(var: &F, name: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("{} must be a valid value, got {:?}: {}", name, raw, e)),
        None => Ok(default),
    }
}

/// Comma separated values; blanks are skipped
fn parse_list<T>(raw: &str, name: &str) -> Result<Vec<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| {
            item.parse()
                .map_err(|e| anyhow!("{} must be a comma separated list, got {:?}: {}", name, item, e))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults_when_no_vars_set() {
        let config = Config::from_vars(vars(&[])).unwrap();
        assert_eq!(config.crawl, CrawlConfig::default());
        assert!(config.testing.test_host().is_none());
        assert!(config.identity.user_agent.starts_with("lala-fetcher/"));
    }

    #[test]
    fn test_env_overrides() {
        let config = Config::from_vars(vars(&[
            ("CRAWL_PAGE_TIMEOUT", "2.5"),
            ("CRAWL_RETRY_TIMEOUT", "0.01"),
            ("CRAWL_MAX_SUB_TRIES", "5"),
            ("TESTING_TEST_HOSTMAP_ALL", "fixture.local:8080"),
            ("USER_AGENT", "LalaSearchBot/0.1"),
            ("PREVENT_COMPRESSION", "true"),
        ]))
        .unwrap();

        assert_eq!(config.crawl.page_timeout, 2.5);
        assert_eq!(config.crawl.retry_timeout, 0.01);
        assert_eq!(config.crawl.max_sub_tries, 5);
        assert_eq!(config.testing.test_host(), Some("fixture.local:8080"));
        assert_eq!(config.identity.user_agent, "LalaSearchBot/0.1");
        assert!(config.identity.prevent_compression);
        assert!(!config.identity.upgrade_insecure_requests);
    }

    #[test]
    fn test_unparsable_var_is_an_error() {
        let err = Config::from_vars(vars(&[("CRAWL_MAX_SUB_TRIES", "many")])).unwrap_err();
        assert!(err.to_string().contains("CRAWL_MAX_SUB_TRIES"));
    }

    #[test]
    fn test_zero_sub_tries_rejected() {
        let result = Config::from_vars(vars(&[("CRAWL_MAX_SUB_TRIES", "0")]));
        assert!(result.is_err());
    }

    #[test]
    fn test_negative_timeout_rejected() {
        let result = Config::from_vars(vars(&[("CRAWL_RETRY_TIMEOUT", "-1")]));
        assert!(result.is_err());
    }

    #[test]
    fn test_nameservers_from_env() {
        let config = Config::from_vars(vars(&[(
            "FETCHER_NAMESERVERS",
            "8.8.8.8, 2001:4860:4860::8888,",
        )]))
        .unwrap();
        assert_eq!(
            config.fetcher.nameservers,
            vec![
                "8.8.8.8".parse::<IpAddr>().unwrap(),
                "2001:4860:4860::8888".parse::<IpAddr>().unwrap()
            ]
        );

        let err = Config::from_vars(vars(&[("FETCHER_NAMESERVERS", "dns.example")])).unwrap_err();
        assert!(err.to_string().contains("FETCHER_NAMESERVERS"));
    }

    #[test]
    fn test_hostmap_n_means_disabled() {
        let testing = TestingConfig {
            test_hostmap_all: Some("n".to_string()),
        };
        assert!(testing.test_host().is_none());

        let testing = TestingConfig {
            test_hostmap_all: Some(String::new()),
        };
        assert!(testing.test_host().is_none());
    }

    #[test]
    fn test_json_uses_crawler_section_names() {
        let raw = r#"{
            "Crawl": {"PageTimeout": 10.0, "RetryTimeout": 0.5, "MaxSubTries": 2},
            "Fetcher": {"Nameservers": ["1.1.1.1"]},
            "Testing": {"TestHostmapAll": "localhost:8080"},
            "Identity": {"UserAgent": "TestBot/1.0", "UpgradeInsecureRequests": true}
        }"#;
        let config: Config = serde_json::from_str(raw).unwrap();
        config.validate().unwrap();

        assert_eq!(config.crawl.page_timeout, 10.0);
        assert_eq!(config.crawl.max_sub_tries, 2);
        assert_eq!(config.fetcher.nameservers, vec![IpAddr::from([1, 1, 1, 1])]);
        // Unspecified keys keep their defaults
        assert_eq!(config.crawl.max_page_size, DEFAULT_MAX_PAGE_SIZE);
        assert_eq!(config.testing.test_host(), Some("localhost:8080"));
        assert!(config.identity.upgrade_insecure_requests);
        assert!(!config.identity.prevent_compression);
    }

    #[test]
    fn test_invalid_user_agent_rejected() {
        let mut config = Config::default();
        config.identity.user_agent = "bad\nagent".to_string();
        assert!(config.validate().is_err());
    }
}
