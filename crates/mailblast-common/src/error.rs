//! Workspace error type
//!
//! Per-send SMTP failures never surface here; the dispatch engine folds
//! them into delivery outcomes. This type covers everything around a run:
//! loading its inputs, talking to the stores and serving the API.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Missing or unusable settings, including the sender's SMTP credential
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    /// The external identity provider could not answer
    #[error("Identity provider unavailable: {0}")]
    Identity(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// HTTP status for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Config(_) | Error::Validation(_) => 422,
            Error::Auth(_) => 401,
            Error::NotFound(_) => 404,
            Error::Identity(_) => 503,
            Error::Database(_) | Error::Storage(_) | Error::Internal(_) | Error::Other(_) => 500,
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config(_) => "CONFIG_ERROR",
            Error::Database(_) => "DATABASE_ERROR",
            Error::Storage(_) => "STORAGE_ERROR",
            Error::Auth(_) => "UNAUTHORIZED",
            Error::Identity(_) => "IDENTITY_UNAVAILABLE",
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::NotFound(_) => "NOT_FOUND",
            Error::Internal(_) | Error::Other(_) => "INTERNAL_ERROR",
        }
    }
}
