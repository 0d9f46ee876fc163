//! Error Taxonomy
//!
//! The distilled spec's legacy system classified errors by sniffing
//! substrings out of exception messages (`"403" in str(err)`). Design
//! note §9 flags this as fragile and asks for tagged variants instead:
//! `UpstreamError` carries one variant per row of the upstream
//! status-to-error mapping table (spec §4.A), and `MatrixError` wraps it
//! plus the matrix-engine-local failure modes (spec §4.C). Callers match
//! on the variant, never on string content.

use thiserror::Error;

/// Errors surfaced by the upstream reservation API client (§4.A).
#[derive(Debug, Error, Clone)]
pub enum UpstreamError {
    /// HTTP 429. Carries the first server-provided message, if any.
    #[error("{}", .0.clone().unwrap_or_else(|| "Too many requests. Please slow down.".to_string()))]
    RateLimited(Option<String>),

    #[error("AUTH_TOKEN_EXPIRED")]
    AuthTokenExpired,

    #[error("AUTH_DEVICE_KEY_EXPIRED")]
    AuthDeviceKeyExpired,

    /// HTTP 403 without a rate-limit phrase.
    #[error("Currently we are experiencing high traffic. Please try again after some time.")]
    HighTraffic,

    /// HTTP 5xx, exhausted the single retry.
    #[error("Upstream service is currently unavailable. Please try again later.")]
    BackendUnavailable,

    /// Any other non-2xx status, or a transport-level failure.
    #[error("upstream request failed: {0}")]
    Http(String),

    #[error("upstream request timed out")]
    Timeout,
}

impl UpstreamError {
    /// Whether the scheduler's retry envelope (spec §4.D) should retry a
    /// worker call that failed with this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, UpstreamError::RateLimited(_) | UpstreamError::HighTraffic)
    }
}

/// Errors surfaced by the matrix engine (§4.C), including propagated
/// upstream errors.
#[derive(Debug, Error, Clone)]
pub enum MatrixError {
    #[error("AUTH_CREDENTIALS_REQUIRED")]
    AuthCredentialsRequired,

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error("No information found for this train.")]
    NoTrainInfo,

    #[error("{train_name} does not run on {weekday}.")]
    WeekdayMismatch { train_name: String, weekday: String },

    #[error("No seats available for the selected train and date. Please try a different date or train.")]
    NoSeatsAvailable,
}

impl MatrixError {
    /// Whether the scheduler's retry envelope should retry a worker call
    /// that failed with this error. Only rate-limit/high-traffic classes
    /// propagated up from the upstream client are retryable; every other
    /// failure (validation, auth, data-empty) is terminal.
    pub fn is_retryable(&self) -> bool {
        matches!(self, MatrixError::Upstream(inner) if inner.is_retryable())
    }
}

/// Errors surfaced while validating and enqueuing a submission (§4.E).
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("train field must include a model code in parentheses, e.g. \"Name (123)\"")]
    MissingTrainModel,

    #[error("date must be in DD-MMM-YYYY format")]
    InvalidDate,

    #[error("the scheduler is currently disabled")]
    SchedulerDisabled,
}
