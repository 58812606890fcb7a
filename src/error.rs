//! Error types for the generation workflow.

use std::path::PathBuf;
use std::time::Duration;

use serde_json::Value;

/// Structured error object returned by the provider inside an operation.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderErrorDetail {
    /// Numeric error code, when present.
    pub code: Option<i64>,
    /// Human readable message, when present.
    pub message: Option<String>,
    /// Symbolic status (e.g. `INVALID_ARGUMENT`), when present.
    pub status: Option<String>,
    /// The full error payload as returned.
    pub raw: Value,
}

impl ProviderErrorDetail {
    /// Builds a detail from the raw `error` value of an operation.
    pub fn from_value(raw: Value) -> Self {
        let code = raw.get("code").and_then(Value::as_i64);
        let message = raw
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| raw.as_str().map(str::to_string));
        let status = raw.get("status").and_then(Value::as_str).map(str::to_string);
        Self {
            code,
            message,
            status,
            raw,
        }
    }
}

impl std::fmt::Display for ProviderErrorDetail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.code, &self.message) {
            (Some(code), Some(message)) => write!(f, "{code} - {message}"),
            (None, Some(message)) => write!(f, "{message}"),
            _ => write!(f, "{}", self.raw),
        }
    }
}

/// Errors that can occur while generating and fetching a video.
#[derive(Debug, thiserror::Error)]
pub enum VeoFlowError {
    /// API key missing or rejected.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// API returned a non-success HTTP status.
    #[error("API error: {status} - {message}")]
    Api {
        status: u16,
        message: String,
        headers: Vec<(String, String)>,
    },

    /// Rate limit exceeded.
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    /// The operation reported a structured error.
    #[error("provider error: {0}")]
    Provider(ProviderErrorDetail),

    /// A response lacked a field the workflow depends on.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// The operation was still pending when the deadline passed.
    #[error("operation still pending after {elapsed:?} (limit {limit:?})")]
    Timeout { elapsed: Duration, limit: Duration },

    /// The run was cancelled while waiting.
    #[error("cancelled")]
    Cancelled,

    /// Image extension is not one of the supported formats.
    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),

    /// Input file does not exist.
    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// The downloaded file had no content and was removed.
    #[error("downloaded file is empty: {}", .0.display())]
    EmptyDownload(PathBuf),

    /// Invalid request or configuration.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Network or HTTP transport error.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Failed to decode base64 data.
    #[error("failed to decode: {0}")]
    Decode(String),

    /// I/O error (e.g., saving file).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl VeoFlowError {
    /// Returns true if a status query that failed this way is worth repeating.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Api { .. } | Self::RateLimited { .. } | Self::Json(_)
        )
    }

    /// Returns the suggested retry delay, if available.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            Self::Network(_) => Some(Duration::from_secs(2)),
            _ => None,
        }
    }

    /// HTTP status attached to this error, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::RateLimited { .. } => Some(429),
            Self::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Response headers attached to this error, if any.
    pub fn headers(&self) -> &[(String, String)] {
        match self {
            Self::Api { headers, .. } => headers,
            _ => &[],
        }
    }
}

/// Result type alias for workflow operations.
pub type Result<T> = std::result::Result<T, VeoFlowError>;

/// Workflow stage, used to report where a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Reading and base64-encoding input images.
    Encode,
    /// Creating the long-running operation.
    Submit,
    /// Waiting for the operation to finish.
    Poll,
    /// Fetching the generated file.
    Download,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Encode => write!(f, "encode"),
            Self::Submit => write!(f, "submit"),
            Self::Poll => write!(f, "poll"),
            Self::Download => write!(f, "download"),
        }
    }
}

/// An error tagged with the stage that produced it.
#[derive(Debug, thiserror::Error)]
#[error("{stage} failed: {source}")]
pub struct WorkflowError {
    /// Stage that failed.
    pub stage: Stage,
    /// Underlying cause.
    #[source]
    pub source: VeoFlowError,
}

impl WorkflowError {
    /// Returns a closure that tags an error with `stage`, for use with `map_err`.
    pub fn at(stage: Stage) -> impl FnOnce(VeoFlowError) -> Self {
        move |source| Self { stage, source }
    }
}

const MAX_ERROR_MESSAGE_LEN: usize = 500;

/// Collapses whitespace in a provider error body and truncates it.
pub(crate) fn sanitize_error_message(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= MAX_ERROR_MESSAGE_LEN {
        return collapsed;
    }
    let truncated: String = collapsed.chars().take(MAX_ERROR_MESSAGE_LEN).collect();
    format!("{truncated}...")
}

/// Parses a `Retry-After` header given in seconds.
pub(crate) fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

/// Copies response headers into owned pairs for error reporting.
pub(crate) fn header_pairs(headers: &reqwest::header::HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            (
                name.to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect()
}
