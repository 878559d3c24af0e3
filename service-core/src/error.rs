use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    ValidationError(#[from] validator::ValidationErrors),

    #[error("Bad request: {0}")]
    BadRequest(anyhow::Error),

    #[error("Not found: {0}")]
    NotFound(anyhow::Error),

    #[error("Unauthorized: {0}")]
    Unauthorized(anyhow::Error),

    #[error("Conflict: {0}")]
    Conflict(anyhow::Error),

    /// Webhook payload failed provider signature verification.
    #[error("Signature error: {0}")]
    SignatureError(anyhow::Error),

    /// Mail transport, payment provider or document storage failure.
    #[error("External service error: {0}")]
    ExternalServiceError(anyhow::Error),

    #[error("Internal server error: {0}")]
    InternalError(#[from] anyhow::Error),

    #[error("Service Unavailable")]
    ServiceUnavailable,

    #[error("Database error: {0}")]
    DatabaseError(anyhow::Error),

    #[error("Invalid token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),

    #[error("Configuration error: {0}")]
    ConfigError(anyhow::Error),

    /// Server-side failure reported to the caller with a fixed message.
    #[error("{message}: {source}")]
    OperationFailed {
        message: &'static str,
        source: anyhow::Error,
    },
}

impl AppError {
    /// Shorthand for a single-message validation failure.
    pub fn validation(message: impl Into<String>) -> Self {
        AppError::BadRequest(anyhow::anyhow!(message.into()))
    }

    /// Replace the public message of a 5xx error, keeping the cause for the
    /// logs. Client errors pass through unchanged.
    pub fn or_failed(self, message: &'static str) -> Self {
        if self.status_code().is_server_error() {
            AppError::OperationFailed {
                message,
                source: anyhow::Error::new(self),
            }
        } else {
            self
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::ValidationError(_) | AppError::BadRequest(_) | AppError::SignatureError(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized(_) | AppError::InvalidToken(_) => StatusCode::UNAUTHORIZED,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            AppError::ExternalServiceError(_)
            | AppError::InternalError(_)
            | AppError::DatabaseError(_)
            | AppError::ConfigError(_)
            | AppError::OperationFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(anyhow::Error::new(err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalError(anyhow::Error::new(err))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            status: &'static str,
            message: String,
            #[serde(skip_serializing_if = "Option::is_none")]
            details: Option<String>,
        }

        let status = self.status_code();

        // 5xx causes stay in the logs; callers only see a generic message.
        let (message, details) = match &self {
            AppError::ValidationError(err) => {
                ("Validation error".to_string(), Some(err.to_string()))
            }
            AppError::BadRequest(err)
            | AppError::NotFound(err)
            | AppError::Unauthorized(err)
            | AppError::Conflict(err) => (err.to_string(), None),
            AppError::SignatureError(err) => {
                tracing::warn!(error = %err, "Rejected unsigned or mis-signed payload");
                ("Webhook signature verification failed".to_string(), None)
            }
            AppError::InvalidToken(err) => {
                tracing::debug!(error = %err, "Rejected access token");
                ("Invalid or expired token".to_string(), None)
            }
            AppError::ServiceUnavailable => ("Service unavailable".to_string(), None),
            AppError::ExternalServiceError(err) => {
                tracing::error!(error = ?err, "External service failure");
                ("External service error".to_string(), None)
            }
            AppError::InternalError(err) => {
                tracing::error!(error = ?err, "Internal error");
                ("Internal server error".to_string(), None)
            }
            AppError::DatabaseError(err) => {
                tracing::error!(error = ?err, "Database error");
                ("Database error".to_string(), None)
            }
            AppError::ConfigError(err) => {
                tracing::error!(error = ?err, "Configuration error");
                ("Configuration error".to_string(), None)
            }
            AppError::OperationFailed { message, source } => {
                tracing::error!(error = ?source, "{}", message);
                (message.to_string(), None)
            }
        };

        (
            status,
            Json(ErrorResponse {
                status: "error",
                message,
                details,
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_maps_to_http_status() {
        assert_eq!(
            AppError::validation("items must not be empty").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::NotFound(anyhow::anyhow!("Invoice not found")).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::SignatureError(anyhow::anyhow!("bad signature")).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::ExternalServiceError(anyhow::anyhow!("smtp down")).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn external_errors_do_not_leak_detail() {
        let response =
            AppError::ExternalServiceError(anyhow::anyhow!("sk_live_secret rejected")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("\"status\":\"error\""));
        assert!(!text.contains("sk_live_secret"));
    }

    #[tokio::test]
    async fn or_failed_replaces_only_server_messages() {
        let not_found = AppError::NotFound(anyhow::anyhow!("Invoice not found"))
            .or_failed("Failed to send invoice");
        assert!(matches!(not_found, AppError::NotFound(_)));

        let response = AppError::DatabaseError(anyhow::anyhow!("relation missing"))
            .or_failed("Failed to create invoice")
            .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("Failed to create invoice"));
        assert!(!text.contains("relation missing"));
    }
}
