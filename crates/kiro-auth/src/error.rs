//! Error types for Kiro account/credential operations

/// Errors from credential store and token refresh operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("token refresh failed: {0}")]
    TokenExchange(String),

    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("credential parse error: {0}")]
    CredentialParse(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("no refresh strategy registered for auth kind {0:?}")]
    NoStrategy(String),
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;
