//! # Gateway Routes
//!
//! HTTP surface of the notification gateway:
//!
//! - `GET /ws/notifications`: WebSocket upgrade for the authenticated user
//!   (optional legacy `?user_id=`),
//! - `GET /ws/notifications/{user_id}`: legacy path form,
//! - `GET /health`: liveness plus registry size.

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{middleware, Json, Router};
use chrono::{SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::json;

use crate::client::OUTBOUND_CAPACITY;
use crate::connection::serve_socket;
use crate::error::IdentityError;
use crate::hub::HubHandle;
use crate::identity::{resolve_identity, trusted_header_identity, ContextIdentity};

#[derive(Debug, Clone)]
pub struct GatewayState {
    pub hub: HubHandle,
    pub outbound_capacity: usize,
    pub allow_legacy_identity: bool,
}

impl GatewayState {
    pub fn new(hub: HubHandle) -> Self {
        Self {
            hub,
            outbound_capacity: OUTBOUND_CAPACITY,
            allow_legacy_identity: true,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct LegacyIdentityQuery {
    pub user_id: Option<String>,
}

pub fn router(state: GatewayState, identity_header: HeaderName) -> Router {
    Router::new()
        .route("/ws/notifications", get(ws_handler))
        .route("/ws/notifications/{user_id}", get(ws_legacy_path_handler))
        .route("/health", get(health_handler))
        .layer(middleware::from_fn_with_state(identity_header, trusted_header_identity))
        .with_state(state)
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<GatewayState>,
    ContextIdentity(context): ContextIdentity,
    Query(query): Query<LegacyIdentityQuery>,
) -> Result<Response, IdentityError> {
    let user_id = resolve_identity(
        context.as_ref(),
        query.user_id.as_deref(),
        state.allow_legacy_identity,
    )?;
    Ok(upgrade(ws, state, user_id))
}

async fn ws_legacy_path_handler(
    ws: WebSocketUpgrade,
    State(state): State<GatewayState>,
    ContextIdentity(context): ContextIdentity,
    Path(user_id): Path<String>,
) -> Result<Response, IdentityError> {
    let user_id = resolve_identity(context.as_ref(), Some(&user_id), state.allow_legacy_identity)?;
    Ok(upgrade(ws, state, user_id))
}

fn upgrade(ws: WebSocketUpgrade, state: GatewayState, user_id: String) -> Response {
    log::debug!("Upgrading WebSocket for user {}", user_id);
    ws.on_upgrade(move |socket| {
        serve_socket(socket, user_id, state.hub, state.outbound_capacity)
    })
}

async fn health_handler(State(state): State<GatewayState>) -> impl IntoResponse {
    let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    match state.hub.stats().await {
        Ok(stats) => (
            StatusCode::OK,
            Json(json!({
                "status": "healthy",
                "timestamp": timestamp,
                "users": stats.users,
                "clients": stats.clients,
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "unavailable",
                "timestamp": timestamp,
                "error": e.to_string(),
            })),
        ),
    }
}
