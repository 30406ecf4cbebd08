//! Error kinds shared by the whole crate.
//!
//! Authentication and lockout errors are deliberately generic so responses
//! cannot be used to probe which emails exist. Configuration and migration
//! errors are deliberately verbose: their audience is an operator, not an
//! end user.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or missing input, rejected before any backend call.
    #[error("validation error: {0}")]
    Validation(String),
    /// A user with the same (normalized) email already exists.
    #[error("email already registered")]
    AlreadyExists,
    /// Wrong password or unknown account; always the same message.
    #[error("invalid credentials")]
    InvalidCredentials,
    /// Too many recent failed attempts for this email.
    #[error("account temporarily locked")]
    Locked,
    /// Unknown id, token, or code; used only where enumeration is not a risk.
    #[error("not found")]
    NotFound,
    /// Token or verification code past its expiry.
    #[error("expired")]
    Expired,
    /// Insecure or missing configuration; fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),
    /// Schema-change failure. `applied` lists the columns that succeeded
    /// before the failure when the dialect applies DDL sequentially.
    #[error("migration error: {message}")]
    Migration {
        message: String,
        applied: Vec<String>,
        failed_column: Option<String>,
    },
    /// Backend failure that maps to no more specific kind.
    #[error("storage error")]
    Storage(#[from] sqlx::Error),
    /// Failure producing or parsing credential material: password
    /// hashing, stored-hash parsing, or the entropy source.
    #[error("credential material error: {0}")]
    Hash(String),
    /// Token issuance failure (verification failures map to
    /// [`Error::Expired`] or [`Error::InvalidCredentials`] instead).
    #[error("token error")]
    Token(#[from] jsonwebtoken::errors::Error),
    /// A registered audit sink rejected an event. Sink failures abort the
    /// triggering operation; they are never swallowed.
    #[error("audit sink error: {0}")]
    Audit(String),
    /// The injected delivery collaborator failed to accept a secret.
    #[error("delivery error: {0}")]
    Delivery(String),
}

impl Error {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub(crate) fn migration(message: impl Into<String>) -> Self {
        Self::Migration {
            message: message.into(),
            applied: Vec::new(),
            failed_column: None,
        }
    }
}
