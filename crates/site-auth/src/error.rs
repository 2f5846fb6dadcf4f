//! Error types for credential storage and login operations

/// Errors from credential storage and login operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("login rejected: {0}")]
    Rejected(String),

    #[error("login failed: {0}")]
    Login(String),

    #[error("login deadline elapsed")]
    DeadlineElapsed,

    #[error("invalid login response: {0}")]
    InvalidResponse(String),

    #[error("credential parse error: {0}")]
    CredentialParse(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl Error {
    /// Whether the site explicitly refused this credential (as opposed to a
    /// transport or sidecar problem).
    pub fn is_rejection(&self) -> bool {
        matches!(self, Error::Rejected(_))
    }
}

/// Result alias for credential and login operations.
pub type Result<T> = std::result::Result<T, Error>;
