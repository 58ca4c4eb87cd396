use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap},
    Json,
};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

use crate::errors::{AppError, ResultExt};
use crate::handlers::AppState;
use crate::models::normalize_email;
use crate::validator::is_valid_email;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnsubscribeResponse {
    pub ok: bool,
    pub message: String,
}

/// POST /unsubscribe
///
/// Opts a lead out of further mail. Answers the same success body whether or not the address
/// is known, so the endpoint cannot be used to probe for registered emails.
pub async fn unsubscribe(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<UnsubscribeResponse>, AppError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !content_type.to_ascii_lowercase().contains("application/json") {
        return Err(AppError::UnsupportedMediaType(
            "Content-Type must be application/json".to_string(),
        ));
    }

    let payload: Value = serde_json::from_slice(&body)
        .map_err(|_| AppError::BadRequest("Invalid JSON body".to_string()))?;

    let email = payload
        .get("email")
        .and_then(|e| e.as_str())
        .map(normalize_email)
        .filter(|e| is_valid_email(e))
        .ok_or_else(|| AppError::BadRequest("Invalid email address".to_string()))?;

    let store = state.store.as_ref().ok_or_else(|| {
        AppError::Configuration("DATABASE_URL not set; cannot process unsubscribe".to_string())
    })?;

    let matched = store
        .mark_unsubscribed(&email)
        .await
        .context("Failed to process unsubscribe request")?;

    if matched {
        tracing::info!("Unsubscribed {}", email);
    } else {
        tracing::info!("Unsubscribe for unknown email {}", email);
    }

    Ok(Json(UnsubscribeResponse {
        ok: true,
        message: "Unsubscribed successfully".to_string(),
    }))
}
