//! Error responses

use axum::{http::StatusCode, Json};
use mailblast_common::Error;
use serde::{Deserialize, Serialize};
use tracing::error;

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// Error half of every handler result
pub type ApiError = (StatusCode, Json<ErrorResponse>);

/// Map a workspace error to its HTTP response.
///
/// Server-side failures are logged here and reported without detail.
pub fn api_error(err: Error) -> ApiError {
    let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let message = if status.is_server_error() {
        error!("Request failed: {}", err);
        "An internal error occurred".to_string()
    } else {
        err.to_string()
    };

    (
        status,
        Json(ErrorResponse {
            error: err.code().to_lowercase(),
            message,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_errors_keep_their_message() {
        let (status, Json(body)) = api_error(Error::NotFound("Template 42 not found".to_string()));
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body.error, "not_found");
        assert_eq!(body.message, "Not found: Template 42 not found");
    }

    #[test]
    fn test_server_errors_are_opaque() {
        let (status, Json(body)) = api_error(Error::Database("connection reset".to_string()));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.error, "database_error");
        assert!(!body.message.contains("connection reset"));
    }
}
