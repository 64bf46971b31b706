//! Remote client configuration.

use taxosync_core::defaults;
use taxosync_core::{Error, Result};

use crate::retry::RateLimitPolicy;

/// Connection settings for the remote taxonomy store.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// Management API base URL (no trailing slash needed).
    pub base_url: String,
    /// Bearer token sent on every call.
    pub access_token: String,
    /// Organization owning the taxonomy.
    pub organization_id: String,
    /// Space and environment whose locale table is used.
    pub space_id: String,
    pub environment_id: String,
    /// Page size for list calls.
    pub page_limit: usize,
    /// Request timeout in seconds.
    pub timeout_seconds: u64,
    pub rate_limit: RateLimitPolicy,
}

impl RemoteConfig {
    pub fn new(
        access_token: impl Into<String>,
        organization_id: impl Into<String>,
        space_id: impl Into<String>,
        environment_id: impl Into<String>,
    ) -> Self {
        Self {
            base_url: defaults::API_BASE_URL.to_string(),
            access_token: access_token.into(),
            organization_id: organization_id.into(),
            space_id: space_id.into(),
            environment_id: environment_id.into(),
            page_limit: defaults::PAGE_LIMIT,
            timeout_seconds: defaults::REQUEST_TIMEOUT_SECS,
            rate_limit: RateLimitPolicy::default(),
        }
    }

    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `CONTENTFUL_ACCESS_TOKEN` | required |
    /// | `CONTENTFUL_ORGANIZATION_ID` | required |
    /// | `CONTENTFUL_SPACE_ID` | required |
    /// | `CONTENTFUL_ENVIRONMENT_ID` | required |
    /// | `CONTENTFUL_BASE_URL` | `https://api.contentful.com` |
    /// | `TAXOSYNC_MAX_RATE_LIMIT_RETRIES` | 20 |
    /// | `TAXOSYNC_RATE_LIMIT_SLEEP_MS` | 1100 |
    /// | `TAXOSYNC_PAGE_LIMIT` | 1000 |
    /// | `TAXOSYNC_REQUEST_TIMEOUT_SECS` | 60 |
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`RemoteConfig::from_env`], reading from an arbitrary source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| Error::Config(format!("{} is not set", key)))
        };
        let parsed = |key: &str| -> Option<u64> { lookup(key).and_then(|v| v.trim().parse().ok()) };

        let mut config = Self::new(
            required("CONTENTFUL_ACCESS_TOKEN")?,
            required("CONTENTFUL_ORGANIZATION_ID")?,
            required("CONTENTFUL_SPACE_ID")?,
            required("CONTENTFUL_ENVIRONMENT_ID")?,
        );
        if let Some(url) = lookup("CONTENTFUL_BASE_URL").filter(|v| !v.trim().is_empty()) {
            config.base_url = url;
        }
        if let Some(retries) = parsed("TAXOSYNC_MAX_RATE_LIMIT_RETRIES") {
            config.rate_limit.max_retries = retries as u32;
        }
        if let Some(sleep_ms) = parsed("TAXOSYNC_RATE_LIMIT_SLEEP_MS") {
            config.rate_limit.sleep_ms = sleep_ms;
        }
        if let Some(limit) = parsed("TAXOSYNC_PAGE_LIMIT") {
            config.page_limit = (limit as usize).clamp(1, defaults::PAGE_LIMIT);
        }
        if let Some(timeout) = parsed("TAXOSYNC_REQUEST_TIMEOUT_SECS") {
            config.timeout_seconds = timeout;
        }
        Ok(config)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_rate_limit(mut self, rate_limit: RateLimitPolicy) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    pub fn with_page_limit(mut self, page_limit: usize) -> Self {
        self.page_limit = page_limit.max(1);
        self
    }
}
