//! API route handlers for the gateway.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use hmac::{Hmac, Mac};
use pmsync_core::error::SyncError;
use pmsync_core::events::Event;
use serde::Deserialize;
use sha2::Sha256;

use super::server::AppState;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";

const DEFAULT_RUN_LIMIT: usize = 50;
const MAX_RUN_LIMIT: usize = 500;

/// Error body: `{"ok": false, "kind": "...", "error": "..."}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    kind: &'static str,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            message: message.into(),
        }
    }

    fn unauthorized(message: &str) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized", message)
    }
}

impl From<SyncError> for ApiError {
    fn from(e: SyncError) -> Self {
        let status = match &e {
            SyncError::InvalidPayload(_) | SyncError::UnknownEvent(_) => StatusCode::BAD_REQUEST,
            SyncError::NotFound { .. } => StatusCode::NOT_FOUND,
            SyncError::Conflict(_) => StatusCode::CONFLICT,
            SyncError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            SyncError::MailSend(_) => StatusCode::BAD_GATEWAY,
            SyncError::Scheduler(_) | SyncError::Config(_) | SyncError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self::new(status, e.kind(), e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "ok": false,
            "kind": self.kind,
            "error": self.message,
        });
        (self.status, Json(body)).into_response()
    }
}

/// Hex HMAC-SHA256 of `body` keyed with `secret`.
pub fn sign_body(secret: &str, body: &[u8]) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(body);
    Some(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time check of a hex signature, with or without a `sha256=` prefix.
pub fn verify_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    let signature = signature.trim();
    let digest = signature.strip_prefix("sha256=").unwrap_or(signature);
    let (Ok(expected), Ok(mut mac)) = (
        hex::decode(digest),
        HmacSha256::new_from_slice(secret.as_bytes()),
    ) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Health check endpoint.
pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "ok": true,
        "service": "pmsync-gateway",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Event intake: verifies the signature, parses the envelope and dispatches.
///
/// Any non-2xx answer makes the bus redeliver the event.
pub async fn receive_event(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !state.signing_secret.is_empty() {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if signature.is_empty() {
            return Err(ApiError::unauthorized("Missing X-Webhook-Signature header"));
        }
        if !verify_signature(&state.signing_secret, &body, signature) {
            tracing::warn!("[events] Invalid signature on inbound event");
            return Err(ApiError::unauthorized("Invalid webhook signature"));
        }
    }

    let event: Event = serde_json::from_slice(&body).map_err(|e| {
        ApiError::new(StatusCode::BAD_REQUEST, "invalid_json", format!("Invalid JSON: {e}"))
    })?;

    state.dispatcher.dispatch(&event).await?;
    Ok(Json(serde_json::json!({ "ok": true, "event": event.name })))
}

#[derive(Debug, Deserialize)]
pub struct RunsQuery {
    pub limit: Option<usize>,
}

/// Most recent workflow runs, newest first.
pub async fn list_runs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RunsQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_RUN_LIMIT).clamp(1, MAX_RUN_LIMIT);
    let runs = state.engine.list_runs(limit)?;
    Ok(Json(serde_json::json!({
        "ok": true,
        "count": runs.len(),
        "runs": runs,
    })))
}
