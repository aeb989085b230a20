// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Control API surface: HTTP command/read endpoints for the parent UI, the
//! UI event WebSocket, and the agent gateway WebSocket route.

pub mod http;
pub mod ws;

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::ErrorCode;
use crate::state::Store;

/// Reject API requests without the configured bearer token.
///
/// WebSocket routes authenticate via query parameter instead and are mounted
/// outside this layer.
async fn require_bearer(State(store): State<Arc<Store>>, req: Request, next: Next) -> Response {
    let Some(ref required) = store.runtime.auth_token else {
        return next.run(req).await;
    };
    let authorized = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| token == required);
    if authorized {
        next.run(req).await
    } else {
        ErrorCode::Unauthorized.to_http_response("missing or invalid bearer token").into_response()
    }
}

/// Build the full router: control API, UI event stream, agent hub.
pub fn build_router(store: Arc<Store>) -> Router {
    let api = Router::new()
        .route("/api/v1/health", get(http::health))
        .route("/api/v1/status", get(http::status))
        .route("/api/v1/agents", get(http::agents))
        .route("/api/v1/agents/{id}/link", post(http::link_agent))
        .route("/api/v1/agents/{id}/unlink", post(http::unlink_agent))
        .route("/api/v1/agents/{id}/mappings", post(http::set_user_mapping))
        .route("/api/v1/agents/{id}/parents", post(http::set_parent_accounts))
        .route("/api/v1/agents/{id}/enabled", post(http::set_agent_enabled))
        .route("/api/v1/agents/{id}/logout", post(http::force_logout))
        .route("/api/v1/agents/{id}/lock", post(http::lock_session))
        .route("/api/v1/agents/{id}/focus", post(http::trigger_focus_mode))
        .route("/api/v1/children/{id}", put(http::update_child_settings))
        .route("/api/v1/violations", get(http::get_violations))
        .route("/api/v1/violations/clear", post(http::clear_violations))
        .route("/api/v1/activity", get(http::get_activity))
        .route("/api/v1/settings", get(http::get_settings).post(http::update_settings))
        .layer(middleware::from_fn_with_state(Arc::clone(&store), require_bearer));

    Router::new()
        .merge(api)
        .route("/ws/events", get(ws::events_ws_handler))
        .route("/ws/agent", get(crate::gateway::ws::agent_ws_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(store)
}
