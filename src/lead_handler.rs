//! `POST /lead`: the intake pipeline.
//!
//! Runs the same sequence for every request and stops at the first failing step: origin, method,
//! content type, rate limit, parse, honeypot, validate, persist, dispatch. CORS headers are
//! attached to every response the origin is allowed to read.

use axum::{
    body::Bytes,
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::config::DispatchMode;
use crate::email_dispatcher::{DispatchOutcome, EmailDispatcher};
use crate::errors::{AppError, ResultExt};
use crate::handlers::{client_ip, AppState};
use crate::models::{LeadResponse, NewLead, RequestProvenance};
use crate::validator;

pub async fn submit_lead(
    State(state): State<Arc<AppState>>,
    method: Method,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let origin = headers
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let origins = &state.config.origins;

    if method == Method::OPTIONS {
        return if origins.is_allowed(origin.as_deref()) {
            (StatusCode::NO_CONTENT, origins.preflight_headers(origin.as_deref())).into_response()
        } else {
            AppError::Forbidden(format!("preflight from {:?}", origin)).into_response()
        };
    }

    let peer = connect_info.map(|ConnectInfo(addr)| addr);
    let result = handle_submission(&state, &method, peer, &headers, &body).await;

    let mut response = match result {
        Ok(body) => (StatusCode::OK, Json(body)).into_response(),
        Err(e) => e.into_response(),
    };
    response
        .headers_mut()
        .extend(origins.cors_headers(origin.as_deref()));
    response
}

async fn handle_submission(
    state: &AppState,
    method: &Method,
    peer: Option<SocketAddr>,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<LeadResponse, AppError> {
    if *method != Method::POST {
        return Err(AppError::MethodNotAllowed);
    }

    let origin = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok());
    if !state.config.origins.is_allowed(origin) {
        return Err(AppError::Forbidden(format!("{:?}", origin)));
    }

    if !is_json_content_type(headers) {
        return Err(AppError::UnsupportedMediaType(
            "Content-Type must be application/json".to_string(),
        ));
    }

    let ip = client_ip(headers, peer);
    let client_id = ip.clone().unwrap_or_else(|| "unknown".to_string());
    if !state.rate_limiter.allow(&client_id) {
        tracing::warn!("Rate limit exceeded for {}", client_id);
        return Err(AppError::TooManyRequests);
    }

    let raw: Value = serde_json::from_slice(body).map_err(|e| {
        tracing::debug!("Lead body is not valid JSON: {}", e);
        AppError::BadRequest("Invalid JSON body".to_string())
    })?;

    if validator::is_honeypot_tripped(&raw) {
        tracing::warn!("Honeypot tripped from {}; dropping submission", client_id);
        return Ok(LeadResponse::accepted());
    }

    let submission = validator::validate(&raw).map_err(|errors| {
        tracing::debug!("Lead validation failed: {:?}", errors);
        AppError::ValidationFailed(errors)
    })?;

    let store = state.store.as_ref().ok_or_else(|| {
        AppError::Configuration("DATABASE_URL not set; cannot persist lead".to_string())
    })?;

    let provenance = RequestProvenance {
        user_agent: header_string(headers, header::USER_AGENT),
        ip,
        referer: header_string(headers, header::REFERER),
    };
    let lead = NewLead::from_submission(submission, provenance);

    let outcome = store.insert(&lead).await.context("Failed to save lead")?;
    if outcome.is_duplicate() {
        tracing::info!("Duplicate lead submission for {}", lead.email);
        return Ok(LeadResponse::duplicate());
    }
    tracing::info!("Lead created: {}", lead.email);

    match state.config.dispatch_mode {
        DispatchMode::Sync => {
            let sent = deliver_welcome(&state.dispatcher, &lead.email).await;
            Ok(LeadResponse::with_email_sent(sent))
        }
        DispatchMode::Background => {
            let dispatcher = state.dispatcher.clone();
            let email = lead.email.clone();
            tokio::spawn(async move {
                deliver_welcome(&dispatcher, &email).await;
            });
            Ok(LeadResponse::accepted())
        }
    }
}

/// Sends the welcome email and reports whether it went out. Failures are logged, never raised.
async fn deliver_welcome(dispatcher: &EmailDispatcher, email: &str) -> bool {
    match dispatcher.send_welcome_email(email).await {
        Ok(DispatchOutcome::Sent(report)) => {
            tracing::debug!(
                "Welcome email for {} went out via {} after {} attempt(s)",
                email,
                report.transport,
                report.attempts
            );
            true
        }
        Ok(DispatchOutcome::Skipped) => false,
        Err(e) => {
            tracing::error!("Welcome email dispatch failed: {}", e);
            false
        }
    }
}

fn is_json_content_type(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|mime| mime.trim().eq_ignore_ascii_case("application/json"))
        .unwrap_or(false)
}

fn header_string(headers: &HeaderMap, name: header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
