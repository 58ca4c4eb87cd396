use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use std::fmt;

use crate::lead_store::StoreError;
use crate::validator::FieldError;

/// Application-specific error types.
#[derive(Debug)]
pub enum AppError {
    /// Datastore failure. Detail is logged, never returned.
    StorageError(StoreError),
    /// Bad request error (unparseable or malformed input).
    BadRequest(String),
    /// Schema validation failed; field errors are returned as `details`.
    ValidationFailed(Vec<FieldError>),
    /// Unauthorized access error.
    Unauthorized(String),
    /// Origin not on the allow-list.
    Forbidden(String),
    MethodNotAllowed,
    UnsupportedMediaType(String),
    TooManyRequests,
    /// Body larger than the route accepts.
    PayloadTooLarge,
    /// A credential essential to the request is missing.
    Configuration(String),
    /// Error with a client-facing context message.
    WithContext {
        /// The underlying source of the error.
        source: Box<AppError>,
        /// Message returned to the client in place of the source's.
        context: String,
    },
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::StorageError(e) => write!(f, "Storage error: {}", e),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::ValidationFailed(errors) => {
                write!(f, "Validation failed: {} field error(s)", errors.len())
            }
            AppError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            AppError::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
            AppError::MethodNotAllowed => write!(f, "Method not allowed"),
            AppError::UnsupportedMediaType(msg) => write!(f, "Unsupported media type: {}", msg),
            AppError::TooManyRequests => write!(f, "Too many requests"),
            AppError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            AppError::PayloadTooLarge => write!(f, "Payload too large"),
            AppError::WithContext { source, context } => {
                write!(f, "{}: {}", context, source)
            }
        }
    }
}

impl std::error::Error for AppError {}

impl AppError {
    /// Status code for this error, following the wrapped source for `WithContext`.
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::StorageError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::BadRequest(_) | AppError::ValidationFailed(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            AppError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            AppError::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            AppError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::WithContext { source, .. } => source.status(),
        }
    }

    /// Message safe to show to the client.
    fn public_message(&self) -> String {
        match self {
            AppError::StorageError(_) => "Database error".to_string(),
            AppError::BadRequest(msg) => msg.clone(),
            AppError::ValidationFailed(_) => "Invalid request data".to_string(),
            AppError::Unauthorized(_) => "Unauthorized".to_string(),
            AppError::Forbidden(_) => "Origin not allowed".to_string(),
            AppError::MethodNotAllowed => "Method not allowed".to_string(),
            AppError::UnsupportedMediaType(msg) => msg.clone(),
            AppError::TooManyRequests => "Too many requests".to_string(),
            AppError::Configuration(_) => "Server configuration error".to_string(),
            AppError::PayloadTooLarge => "Request body too large".to_string(),
            AppError::WithContext { context, .. } => context.clone(),
        }
    }

    fn details(&self) -> Option<Value> {
        match self {
            AppError::ValidationFailed(errors) => serde_json::to_value(errors).ok(),
            AppError::WithContext { source, .. } => source.details(),
            _ => None,
        }
    }

    fn log(&self) {
        match self {
            AppError::StorageError(e) => tracing::error!("Storage error: {:?}", e),
            AppError::Unauthorized(msg) => tracing::warn!("Unauthorized access: {}", msg),
            AppError::Forbidden(msg) => tracing::warn!("Rejected origin: {}", msg),
            AppError::Configuration(msg) => tracing::error!("Configuration error: {}", msg),
            AppError::WithContext { source, context } => {
                // Log full context chain for debugging
                tracing::error!("Error with context: {} -> {}", context, source);
                source.log();
            }
            _ => {}
        }
    }
}

impl IntoResponse for AppError {
    /// Every error body is `{ok: false, error}` plus `details` for field errors.
    fn into_response(self) -> Response {
        self.log();

        let mut body = json!({
            "ok": false,
            "error": self.public_message(),
        });
        if let Some(details) = self.details() {
            body["details"] = details;
        }

        (self.status(), Json(body)).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::StorageError(err)
    }
}

/// Extension trait for adding a client-facing message to errors.
/// Similar to `anyhow::Context` but for our `AppError` type.
pub trait ResultExt<T> {
    /// Replace the public message while keeping the source for logs and status.
    fn context(self, context: impl Into<String>) -> Result<T, AppError>;
}

impl<T> ResultExt<T> for Result<T, StoreError> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(AppError::StorageError(e)),
            context: context.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_of(err: AppError) -> (StatusCode, Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_storage_error_is_not_leaked() {
        let err: Result<(), StoreError> = Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        let (status, body) = body_of(err.context("Failed to save lead").unwrap_err()).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({"ok": false, "error": "Failed to save lead"}));
    }

    #[tokio::test]
    async fn test_validation_details() {
        let err = AppError::ValidationFailed(vec![FieldError {
            path: vec!["email".to_string()],
            message: "Required".to_string(),
        }]);
        let (status, body) = body_of(err).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid request data");
        assert_eq!(body["details"][0]["path"][0], "email");
    }

    #[tokio::test]
    async fn test_status_mapping() {
        assert_eq!(AppError::TooManyRequests.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(AppError::MethodNotAllowed.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(
            AppError::UnsupportedMediaType("x".into()).status(),
            StatusCode::UNSUPPORTED_MEDIA_TYPE
        );
        assert_eq!(AppError::Forbidden("x".into()).status(), StatusCode::FORBIDDEN);
        assert_eq!(AppError::PayloadTooLarge.status(), StatusCode::PAYLOAD_TOO_LARGE);

        let (_, body) = body_of(AppError::Configuration("DATABASE_URL missing".into())).await;
        assert_eq!(body["error"], "Server configuration error");
    }
}
