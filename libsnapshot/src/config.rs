//! Backend and polling configuration.
//!
//! Environment variables:
//! - `DIGITAL_OCEAN_API_TOKEN`: API token for the DigitalOcean account. Required.
//! - `DIGITAL_OCEAN_API_URL`: API base URL. Defaults to `https://api.digitalocean.com/v2`.
//! - `DIGITAL_OCEAN_TIMEOUT_SECS`: per-request timeout. Defaults to `30`.
//! - `DIGITAL_OCEAN_PAGE_SIZE`: snapshots per listing page, `1..=200`. Defaults to `200`.
//! - `DIGITAL_OCEAN_PENDING_GRACE_SECS`: how long a freshly created snapshot may be
//!   missing from the API before its creation counts as failed. Defaults to `300`.
//! - `SNAPSHOT_POLL_INTERVAL_SECS`: first delay between status checks. Defaults to `2`.
//! - `SNAPSHOT_POLL_MAX_INTERVAL_SECS`: backoff ceiling. Defaults to `60`.
//! - `SNAPSHOT_POLL_MAX_ATTEMPTS`: status checks before giving up. Unlimited when unset.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Result, SnapshotError};
use crate::poll::PollPolicy;

pub const DEFAULT_API_URL: &str = "https://api.digitalocean.com/v2";
const MAX_PAGE_SIZE: u32 = 200;

/// Settings for [`DigitalOceanBackend`](crate::backend::digitalocean::DigitalOceanBackend).
#[derive(Clone)]
pub struct DigitalOceanConfig {
    pub api_token: String,
    pub api_url: String,
    pub request_timeout: Duration,
    pub page_size: u32,
    pub pending_grace: Duration,
}

// Keep the token out of logs.
impl fmt::Debug for DigitalOceanConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DigitalOceanConfig")
            .field("api_token", &"<redacted>")
            .field("api_url", &self.api_url)
            .field("request_timeout", &self.request_timeout)
            .field("page_size", &self.page_size)
            .field("pending_grace", &self.pending_grace)
            .finish()
    }
}

impl DigitalOceanConfig {
    /// Config with the given token and defaults for everything else.
    pub fn new(api_token: impl Into<String>) -> Self {
        Self {
            api_token: api_token.into(),
            api_url: DEFAULT_API_URL.to_owned(),
            request_timeout: Duration::from_secs(30),
            page_size: MAX_PAGE_SIZE,
            pending_grace: Duration::from_secs(300),
        }
    }

    /// Read the config from the process environment.
    ///
    /// A missing token is a startup error for this backend.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let api_token = lookup("DIGITAL_OCEAN_API_TOKEN")
            .map(|token| token.trim().to_owned())
            .filter(|token| !token.is_empty())
            .ok_or_else(|| SnapshotError::Config("DIGITAL_OCEAN_API_TOKEN is not set".into()))?;

        let mut config = Self::new(api_token);
        if let Some(url) = lookup("DIGITAL_OCEAN_API_URL").filter(|url| !url.trim().is_empty()) {
            config.api_url = url.trim().trim_end_matches('/').to_owned();
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "DIGITAL_OCEAN_TIMEOUT_SECS")? {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(size) = parse_var::<u32>(&lookup, "DIGITAL_OCEAN_PAGE_SIZE")? {
            config.page_size = size.clamp(1, MAX_PAGE_SIZE);
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "DIGITAL_OCEAN_PENDING_GRACE_SECS")? {
            config.pending_grace = Duration::from_secs(secs);
        }
        Ok(config)
    }
}

impl PollPolicy {
    /// Read the poll policy from the process environment, starting from
    /// [`PollPolicy::default`].
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut policy = Self::default();
        if let Some(secs) = parse_var::<u64>(&lookup, "SNAPSHOT_POLL_INTERVAL_SECS")? {
            policy.interval = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "SNAPSHOT_POLL_MAX_INTERVAL_SECS")? {
            policy.max_interval = Duration::from_secs(secs);
        }
        if let Some(attempts) = parse_var::<u32>(&lookup, "SNAPSHOT_POLL_MAX_ATTEMPTS")? {
            policy.max_attempts = Some(attempts);
        }
        Ok(policy)
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| SnapshotError::Config(format!("{key}={raw:?}: {e}"))),
    }
}
