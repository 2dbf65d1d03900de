//! Dispatch error taxonomy

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Classification of a failed delivery attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Missing or invalid sender configuration
    Configuration,
    /// The SMTP server rejected the credentials
    Authentication,
    /// Connection refused, timeout, or a temporary 4xx reply
    TransientTransport,
    /// The server asked us to slow down
    RateLimited,
    /// The message or recipient was refused with a 5xx reply
    PermanentRejection,
    /// An attachment could not be read or encoded
    Attachment,
}

impl ErrorKind {
    /// Whether another attempt may succeed
    pub fn is_retriable(&self) -> bool {
        matches!(self, ErrorKind::TransientTransport | ErrorKind::RateLimited)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::Authentication => "authentication",
            ErrorKind::TransientTransport => "transient_transport",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::PermanentRejection => "permanent_rejection",
            ErrorKind::Attachment => "attachment",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed delivery attempt.
///
/// Never escapes the scheduler: it is folded into a delivery outcome.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct DeliveryError {
    pub kind: ErrorKind,
    pub message: String,
    /// Server-provided hint for when to try again
    pub retry_after: Option<Duration>,
}

impl DeliveryError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
        self.retry_after = retry_after;
        self
    }
}

/// Errors that prevent a run from starting
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Invalid SMTP configuration: {0}")]
    Configuration(String),

    #[error("Run of {requested} jobs exceeds the limit of {max}")]
    TooManyJobs { requested: usize, max: usize },
}

impl From<DispatchError> for mailblast_common::Error {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::Configuration(msg) => mailblast_common::Error::Config(msg),
            err @ DispatchError::TooManyJobs { .. } => {
                mailblast_common::Error::Validation(err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retriable_kinds() {
        assert!(ErrorKind::TransientTransport.is_retriable());
        assert!(ErrorKind::RateLimited.is_retriable());
        assert!(!ErrorKind::Authentication.is_retriable());
        assert!(!ErrorKind::PermanentRejection.is_retriable());
        assert!(!ErrorKind::Attachment.is_retriable());
        assert!(!ErrorKind::Configuration.is_retriable());
    }

    #[test]
    fn test_dispatch_error_conversion() {
        let err: mailblast_common::Error = DispatchError::TooManyJobs {
            requested: 20_000,
            max: 10_000,
        }
        .into();
        assert_eq!(err.status_code(), 422);
        assert!(err.to_string().contains("20000"));

        let err: mailblast_common::Error =
            DispatchError::Configuration("SMTP host is missing".to_string()).into();
        assert!(matches!(err, mailblast_common::Error::Config(_)));
    }
}
