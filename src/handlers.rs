use crate::config::{Config, StorageBackend};
use crate::db::Database;
use crate::email_dispatcher::EmailDispatcher;
use crate::errors::AppError;
use crate::lead_handler;
use crate::lead_store::{InMemoryLeadStore, LeadStore, PgLeadStore};
use crate::rate_limiter::{RateLimiter, TokenBucketLimiter};
use crate::unsubscribe_handler;
use crate::webhook_handler;
use axum::{
    extract::Request,
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{any, get, post},
    Json, Router,
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;

/// Largest request body accepted on any route.
pub const MAX_BODY_BYTES: usize = 64 * 1024;

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Config,
    /// Lead persistence. `None` when no datastore credential is configured.
    pub store: Option<Arc<dyn LeadStore>>,
    /// Per-client throttle for lead submissions.
    pub rate_limiter: Arc<dyn RateLimiter>,
    pub dispatcher: Arc<EmailDispatcher>,
}

impl AppState {
    /// Builds the production state: store per `config.storage`, token bucket limiter and
    /// the transport chain from the email config.
    pub async fn from_config(config: Config) -> anyhow::Result<Self> {
        let store: Option<Arc<dyn LeadStore>> = match &config.storage {
            StorageBackend::Postgres(url) => {
                let db = Database::new(url).await?;
                tracing::info!("Database connection pool established");
                db.migrate().await?;
                tracing::info!("Database migrations applied");
                Some(Arc::new(PgLeadStore::new(db.pool)))
            }
            StorageBackend::Memory => Some(Arc::new(InMemoryLeadStore::new())),
            StorageBackend::Unconfigured => None,
        };

        let rate_limiter = Arc::new(TokenBucketLimiter::new(config.rate_limit));
        let dispatcher = Arc::new(EmailDispatcher::from_config(&config.email));

        Ok(Self {
            config,
            store,
            rate_limiter,
            dispatcher,
        })
    }
}

/// Health check endpoint.
pub async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

pub async fn method_not_allowed() -> AppError {
    AppError::MethodNotAllowed
}

/// Rewrites the body limit's plain-text 413 into the JSON error shape.
pub async fn json_payload_too_large(request: Request, next: Next) -> Response {
    let response = next.run(request).await;
    if response.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return AppError::PayloadTooLarge.into_response();
    }
    response
}

/// Client address for throttling and provenance: first hop of `X-Forwarded-For`, then
/// `X-Real-IP`, then the TCP peer.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        })
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
}

/// Lead, webhook and unsubscribe routes with the body limit applied.
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/lead", any(lead_handler::submit_lead))
        .route(
            "/email-webhook",
            post(webhook_handler::email_webhook).fallback(method_not_allowed),
        )
        .route(
            "/unsubscribe",
            post(unsubscribe_handler::unsubscribe).fallback(method_not_allowed),
        )
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(middleware::from_fn(json_payload_too_large))
}

/// Full application router. The binary builds its own variant so it can put the ingress
/// throttle in front of `api_routes` only.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(api_routes())
        .with_state(state)
}
