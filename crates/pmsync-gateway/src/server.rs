//! HTTP server implementation using Axum.

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use pmsync_core::config::GatewayConfig;
use pmsync_handlers::Dispatcher;
use pmsync_scheduler::SchedulerEngine;
use tower_http::trace::TraceLayer;

/// Shared state for the gateway server.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub engine: Arc<SchedulerEngine>,
    /// HMAC key for `X-Webhook-Signature`. Empty disables verification.
    pub signing_secret: String,
}

impl AppState {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        engine: Arc<SchedulerEngine>,
        signing_secret: impl Into<String>,
    ) -> Self {
        Self {
            dispatcher,
            engine,
            signing_secret: signing_secret.into(),
        }
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(super::routes::health_check))
        .route("/api/v1/events", post(super::routes::receive_event))
        .route("/api/v1/runs", get(super::routes::list_runs))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

/// Start the HTTP server.
pub async fn start(config: &GatewayConfig, state: AppState) -> anyhow::Result<()> {
    if state.signing_secret.is_empty() {
        tracing::warn!("⚠️ No signing secret configured, events are accepted unsigned");
    }
    let app = build_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("🌐 Gateway server listening on http://{}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
