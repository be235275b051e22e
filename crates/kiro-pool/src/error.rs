//! Error types for Account Selector operations.

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no account available: {0}")]
    NoneAvailable(String),

    #[error("account not found: {0}")]
    NotFound(String),

    #[error("credential store error: {0}")]
    Credential(#[from] kiro_auth::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
