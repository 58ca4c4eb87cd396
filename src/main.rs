use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::trace::TraceLayer;

use lead_intake_api::config::Config;
use lead_intake_api::handlers::{self, AppState};
use lead_intake_api::obs;

/// Main entry point for the application.
///
/// Initializes logging, loads configuration, connects the lead store (running migrations),
/// builds the email transport chain and serves the router with tracing and ingress throttling.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    obs::init_tracing();

    let config = Config::from_env()?;
    let port = config.port;

    let app_state = Arc::new(AppState::from_config(config).await?);

    // Coarse per-IP throttle in front of the per-client lead bucket: 10 req/s, burst of 20
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(10)
            .burst_size(20)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow::anyhow!("Invalid ingress rate limit configuration"))?,
    );

    // Health check bypasses the throttle
    let app = Router::new()
        .route("/health", get(handlers::health))
        .merge(handlers::api_routes().layer(GovernorLayer {
            config: governor_conf,
        }))
        .with_state(app_state)
        .layer(TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
