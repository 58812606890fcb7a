//! Workflow configuration.
//!
//! Everything a run needs is held in one [`VeoConfig`] value that is passed
//! into the workflow at construction time. Environment variables are only
//! consulted by [`VeoConfigBuilder::build`] as fallbacks.

use crate::error::{Result, VeoFlowError};
use std::time::Duration;

/// Default API base URL (LiteLLM proxy in front of the Gemini API).
pub const DEFAULT_BASE_URL: &str = "https://api.thucchien.ai/v1beta";

/// Key used when neither the builder nor the environment provides one.
pub const DEFAULT_API_KEY: &str = "sk-1234";

/// Default model resource.
pub const DEFAULT_MODEL: &str = "veo-3.1-generate-preview";

/// Env var overriding the base URL.
pub const BASE_URL_ENV: &str = "LITELLM_BASE_URL";
/// Env var overriding the API key.
pub const API_KEY_ENV: &str = "LITELLM_API_KEY";
/// Env var overriding the model.
pub const MODEL_ENV: &str = "VEO_MODEL";

/// Absolute prefix of artifact URIs issued by the upstream Gemini API.
pub const GEMINI_FILES_PREFIX: &str = "https://generativelanguage.googleapis.com/";

/// Polling schedule and deadline.
#[derive(Debug, Clone, PartialEq)]
pub struct PollPolicy {
    /// Wait after the first pending status.
    pub initial_interval: Duration,
    /// Growth factor applied after every unsuccessful tick.
    pub factor: f64,
    /// Upper bound for a single wait.
    pub max_interval: Duration,
    /// Overall budget measured from submission.
    pub timeout: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(10),
            factor: 1.2,
            max_interval: Duration::from_secs(30),
            timeout: Duration::from_secs(600), // 10 minutes for video
        }
    }
}

impl PollPolicy {
    /// Rejects policies whose waits would shrink, vanish or overflow.
    pub fn validate(&self) -> Result<()> {
        if !self.factor.is_finite() || self.factor < 1.0 {
            return Err(VeoFlowError::InvalidRequest(format!(
                "poll factor must be a finite number >= 1, got {}",
                self.factor
            )));
        }
        if self.initial_interval.is_zero() {
            return Err(VeoFlowError::InvalidRequest(
                "initial poll interval must be greater than zero".into(),
            ));
        }
        if self.initial_interval > self.max_interval {
            return Err(VeoFlowError::InvalidRequest(
                "initial poll interval must not exceed the max interval".into(),
            ));
        }
        Ok(())
    }
}

/// How artifact URIs are turned into download URLs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadRoute {
    /// Download through the proxy's download endpoint.
    ///
    /// URIs starting with `upstream_prefix` have it stripped, and the
    /// remaining path is joined onto the base URL with its trailing
    /// `api_segment` replaced by `download_segment`.
    Proxy {
        /// Absolute prefix of upstream artifact URIs.
        upstream_prefix: String,
        /// Trailing path segment of the API base URL.
        api_segment: String,
        /// Segment that replaces `api_segment` for downloads.
        download_segment: String,
    },
    /// Use the artifact URI as returned.
    Direct,
}

impl Default for DownloadRoute {
    fn default() -> Self {
        Self::Proxy {
            upstream_prefix: GEMINI_FILES_PREFIX.to_string(),
            api_segment: "/v1beta".to_string(),
            download_segment: "/download".to_string(),
        }
    }
}

/// Resolved configuration for one workflow.
#[derive(Debug, Clone)]
pub struct VeoConfig {
    /// API base URL without trailing slash.
    pub base_url: String,
    /// Value of the `x-goog-api-key` header.
    pub api_key: String,
    /// Model resource name.
    pub model: String,
    /// Polling schedule.
    pub poll: PollPolicy,
    /// Download URI translation.
    pub download_route: DownloadRoute,
    /// Per-request timeout for submit and status calls.
    pub request_timeout: Duration,
}

impl VeoConfig {
    /// Creates a new `VeoConfigBuilder`.
    pub fn builder() -> VeoConfigBuilder {
        VeoConfigBuilder::new()
    }

    /// Builds a config from environment variables and defaults only.
    pub fn from_env() -> Result<Self> {
        VeoConfigBuilder::new().build()
    }

    /// URL of the long-running creation call.
    pub fn submit_url(&self) -> String {
        format!("{}/models/{}:predictLongRunning", self.base_url, self.model)
    }
}

/// Builder for [`VeoConfig`].
#[derive(Debug, Clone, Default)]
pub struct VeoConfigBuilder {
    base_url: Option<String>,
    api_key: Option<String>,
    model: Option<String>,
    poll: PollPolicy,
    download_route: DownloadRoute,
    request_timeout: Option<Duration>,
}

impl VeoConfigBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the base URL. Falls back to `LITELLM_BASE_URL`.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Sets the API key. Falls back to `LITELLM_API_KEY`.
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Sets the model. Falls back to `VEO_MODEL`.
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Replaces the whole polling policy.
    pub fn poll_policy(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    /// Sets the maximum time to wait for generation.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.poll.timeout = timeout;
        self
    }

    /// Sets the download URI translation.
    pub fn download_route(mut self, route: DownloadRoute) -> Self {
        self.download_route = route;
        self
    }

    /// Sets the per-request timeout for submit and status calls.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Builds the config, resolving env fallbacks and validating values.
    pub fn build(self) -> Result<VeoConfig> {
        let base_url = self
            .base_url
            .or_else(|| env_non_empty(BASE_URL_ENV))
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let base_url = base_url.trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(VeoFlowError::InvalidRequest(format!(
                "base URL must be http(s): {base_url}"
            )));
        }

        let api_key = match self.api_key.or_else(|| env_non_empty(API_KEY_ENV)) {
            Some(key) => key,
            None => {
                tracing::warn!("{API_KEY_ENV} not set, using the built-in placeholder key");
                DEFAULT_API_KEY.to_string()
            }
        };
        if api_key.trim().is_empty() {
            return Err(VeoFlowError::Auth("API key is empty".into()));
        }

        let model = self
            .model
            .or_else(|| env_non_empty(MODEL_ENV))
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let poll = self.poll;
        poll.validate()?;

        Ok(VeoConfig {
            base_url,
            api_key,
            model,
            poll,
            download_route: self.download_route,
            request_timeout: self.request_timeout.unwrap_or(Duration::from_secs(120)),
        })
    }
}

fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
