//! Error categorization for upstream Kiro calls.
//!
//! The Orchestrator drives retry/failover policy purely off [`ErrorCategory`];
//! it never inspects a raw status code itself.

/// How the Orchestrator should react to a failed upstream call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorCategory {
    /// HTTP 429. Carries `retry-after` seconds when the upstream sent one.
    RateLimited { retry_after_secs: Option<u64> },
    /// HTTP 401/403 — the account's access token is no longer accepted.
    AuthFailed,
    /// Body-level `CONTENT_LENGTH_EXCEEDS_THRESHOLD` error code.
    LengthExceeded,
    /// HTTP 5xx.
    ServerError,
    /// Connection reset, timeout, DNS failure — no HTTP response at all.
    TransportError,
    /// Any other 4xx.
    ClientError { status: u16 },
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("upstream call failed: {category:?}: {message}")]
    Upstream {
        category: ErrorCategory,
        message: String,
    },

    #[error("failed to build request: {0}")]
    Request(String),

    #[error("failed to parse upstream response: {0}")]
    Parse(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn category(&self) -> Option<&ErrorCategory> {
        match self {
            Error::Upstream { category, .. } => Some(category),
            _ => None,
        }
    }
}
