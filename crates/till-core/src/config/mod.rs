//! Sync engine configuration.
//!
//! `SyncConfig` carries the remote endpoint plus the processor and
//! reconciliation tunables. Clients build it from the environment
//! (`SyncConfig::from_env`) and adjust it with the builder methods.

use std::time::Duration;

use crate::error::{Error, Result};
use crate::util::{is_http_url, normalize_text_option};

pub const ENV_REMOTE_URL: &str = "TILL_REMOTE_URL";
pub const ENV_REMOTE_KEY: &str = "TILL_REMOTE_KEY";
pub const ENV_SYNC_INTERVAL_SECS: &str = "TILL_SYNC_INTERVAL_SECS";
pub const ENV_SYNC_TIMEOUT_SECS: &str = "TILL_SYNC_TIMEOUT_SECS";
pub const ENV_SYNC_PAGE_SIZE: &str = "TILL_SYNC_PAGE_SIZE";

const DEFAULT_INTERVAL_SECS: u64 = 5;
const DEFAULT_MAX_RETRIES: u32 = 5;
const DEFAULT_PUSH_TIMEOUT_SECS: u64 = 30;
const DEFAULT_PAGE_SIZE: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Base URL of the remote REST endpoint
    pub remote_url: Option<String>,
    /// API key sent as `apikey` and bearer token
    pub remote_key: Option<String>,
    /// Processor tick interval
    pub interval: Duration,
    /// Consecutive failures before an entry is dead-lettered
    pub max_retries: u32,
    /// Upper bound on a single remote push
    pub push_timeout: Duration,
    /// Rows per remote page during reconciliation
    pub page_size: usize,
    /// Initial connectivity state
    pub start_online: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            remote_url: None,
            remote_key: None,
            interval: Duration::from_secs(DEFAULT_INTERVAL_SECS),
            max_retries: DEFAULT_MAX_RETRIES,
            push_timeout: Duration::from_secs(DEFAULT_PUSH_TIMEOUT_SECS),
            page_size: DEFAULT_PAGE_SIZE,
            start_online: true,
        }
    }
}

impl SyncConfig {
    /// Read configuration from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(url) = normalize_text_option(lookup(ENV_REMOTE_URL)) {
            config = config.with_remote_url(url)?;
        }
        config.remote_key = normalize_text_option(lookup(ENV_REMOTE_KEY));

        if let Some(secs) = parse_positive(&lookup, ENV_SYNC_INTERVAL_SECS)? {
            config.interval = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_positive(&lookup, ENV_SYNC_TIMEOUT_SECS)? {
            config.push_timeout = Duration::from_secs(secs);
        }
        if let Some(size) = parse_positive(&lookup, ENV_SYNC_PAGE_SIZE)? {
            config.page_size = usize::try_from(size).unwrap_or(DEFAULT_PAGE_SIZE);
        }

        Ok(config)
    }

    /// Set the remote URL; must be http(s). Trailing slashes are dropped.
    pub fn with_remote_url(mut self, url: impl Into<String>) -> Result<Self> {
        let url = url.into();
        let trimmed = url.trim();
        if !is_http_url(trimmed) {
            return Err(Error::InvalidInput(format!(
                "remote URL must include http:// or https://: {trimmed}"
            )));
        }
        self.remote_url = Some(trimmed.trim_end_matches('/').to_string());
        Ok(self)
    }

    #[must_use]
    pub fn with_remote_key(mut self, key: impl Into<String>) -> Self {
        self.remote_key = normalize_text_option(Some(key.into()));
        self
    }

    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[must_use]
    pub const fn with_push_timeout(mut self, timeout: Duration) -> Self {
        self.push_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    #[must_use]
    pub const fn with_start_online(mut self, online: bool) -> Self {
        self.start_online = online;
        self
    }

    /// Whether a remote endpoint is configured.
    pub const fn is_configured(&self) -> bool {
        self.remote_url.is_some()
    }
}

fn parse_positive(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<u64>> {
    let Some(raw) = normalize_text_option(lookup(key)) else {
        return Ok(None);
    };
    match raw.parse::<u64>() {
        Ok(value) if value > 0 => Ok(Some(value)),
        _ => Err(Error::InvalidInput(format!(
            "{key} must be a positive integer, got '{raw}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_processor_contract() {
        let config = SyncConfig::default();
        assert_eq!(config.interval, Duration::from_secs(5));
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.push_timeout, Duration::from_secs(30));
        assert_eq!(config.page_size, 1000);
        assert!(config.start_online);
        assert!(!config.is_configured());
    }

    #[test]
    fn reads_values_from_lookup() {
        let config = SyncConfig::from_lookup(lookup(&[
            (ENV_REMOTE_URL, " https://pos.example.com/rest/v1/ "),
            (ENV_REMOTE_KEY, "anon-key"),
            (ENV_SYNC_INTERVAL_SECS, "10"),
            (ENV_SYNC_TIMEOUT_SECS, "3"),
            (ENV_SYNC_PAGE_SIZE, "250"),
        ]))
        .unwrap();

        assert_eq!(
            config.remote_url.as_deref(),
            Some("https://pos.example.com/rest/v1")
        );
        assert_eq!(config.remote_key.as_deref(), Some("anon-key"));
        assert_eq!(config.interval, Duration::from_secs(10));
        assert_eq!(config.push_timeout, Duration::from_secs(3));
        assert_eq!(config.page_size, 250);
        assert!(config.is_configured());
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let config =
            SyncConfig::from_lookup(lookup(&[(ENV_REMOTE_URL, "  "), (ENV_REMOTE_KEY, "")]))
                .unwrap();
        assert_eq!(config, SyncConfig::default());
    }

    #[test]
    fn rejects_non_http_url_and_bad_numbers() {
        assert!(SyncConfig::from_lookup(lookup(&[(ENV_REMOTE_URL, "ftp://x")])).is_err());
        assert!(SyncConfig::from_lookup(lookup(&[(ENV_SYNC_INTERVAL_SECS, "0")])).is_err());
        assert!(SyncConfig::from_lookup(lookup(&[(ENV_SYNC_PAGE_SIZE, "many")])).is_err());
    }
}
