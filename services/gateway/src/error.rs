//! Gateway error kinds and their propagation policy.
//!
//! Each variant maps to one client-facing error kind. Most are surfaced to
//! the caller in its own protocol's error shape (see `http::error_response`);
//! `Config`/`ListenerBind` are startup-fatal and never reach a handler.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to bind listener: {0}")]
    ListenerBind(String),

    #[error("no account available: {0}")]
    NoAccountAvailable(String),

    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("rate limited on all accounts")]
    RateLimitedAllAccounts,

    #[error("content length exceeded threshold")]
    ContentLengthExceeded,

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unsupported feature: {0}")]
    UnsupportedFeature(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// The error kind string surfaced in responses and flow records.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Config(_) => "config",
            Error::ListenerBind(_) => "listener_bind",
            Error::NoAccountAvailable(_) => "no_account_available",
            Error::AuthenticationFailed => "authentication_failed",
            Error::RateLimitedAllAccounts => "rate_limited_all_accounts",
            Error::ContentLengthExceeded => "content_length_exceeded",
            Error::UpstreamUnavailable(_) => "upstream_unavailable",
            Error::BadRequest(_) => "bad_request",
            Error::UnsupportedFeature(_) => "unsupported_feature",
            Error::Internal(_) => "internal",
        }
    }

    /// HTTP status this error kind maps to, per protocol-native error bodies.
    pub fn status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Error::Config(_) | Error::ListenerBind(_) | Error::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Error::NoAccountAvailable(_) | Error::UpstreamUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Error::AuthenticationFailed => StatusCode::UNAUTHORIZED,
            Error::RateLimitedAllAccounts => StatusCode::TOO_MANY_REQUESTS,
            Error::ContentLengthExceeded | Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::UnsupportedFeature(_) => StatusCode::NOT_IMPLEMENTED,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<kiro_pool::Error> for Error {
    fn from(e: kiro_pool::Error) -> Self {
        match e {
            kiro_pool::Error::NoneAvailable(detail) => Error::NoAccountAvailable(detail),
            kiro_pool::Error::NotFound(detail) => Error::BadRequest(detail),
            kiro_pool::Error::Credential(inner) => Error::Internal(inner.to_string()),
        }
    }
}
