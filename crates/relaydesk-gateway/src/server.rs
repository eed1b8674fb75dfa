// SPDX-FileCopyrightText: 2026 Relaydesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Gateway HTTP server built on axum.
//!
//! Sets up routes, middleware, and shared state for the gateway.

use std::sync::Arc;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};
use relaydesk_config::model::ChatConfig;
use relaydesk_core::{RelaydeskError, SessionStore};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

use crate::auth::{OperatorAuth, operator_auth_middleware};
use crate::handlers;
use crate::lobby::Lobby;
use crate::persist::PersistQueue;
use crate::registry::RoomRegistry;
use crate::ws;

/// Health state for the unauthenticated `/health` endpoint.
#[derive(Clone)]
pub struct HealthState {
    /// Process start time for uptime calculation.
    pub start_time: std::time::Instant,
}

/// Shared state for axum request handlers.
#[derive(Clone)]
pub struct GatewayState {
    pub registry: Arc<RoomRegistry>,
    pub lobby: Arc<Lobby>,
    pub store: Arc<dyn SessionStore>,
    pub auth: OperatorAuth,
    pub chat: Arc<ChatConfig>,
    pub health: HealthState,
    /// Cancelled when the gateway stops; live sockets close with 1001.
    pub shutdown: CancellationToken,
}

impl GatewayState {
    pub fn new(
        chat: ChatConfig,
        auth: OperatorAuth,
        store: Arc<dyn SessionStore>,
        persist: PersistQueue,
    ) -> Self {
        let lobby = Arc::new(Lobby::new());
        let registry = Arc::new(RoomRegistry::new(lobby.clone(), persist, &chat));
        Self {
            registry,
            lobby,
            store,
            auth,
            chat: Arc::new(chat),
            health: HealthState {
                start_time: std::time::Instant::now(),
            },
            shutdown: CancellationToken::new(),
        }
    }

    /// Ties live sockets to `token`.
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }
}

fn chat_routes() -> Router<GatewayState> {
    Router::new()
        .route("/chat/master", get(ws::lobby_handler))
        .route("/chat/lobby", get(ws::lobby_handler))
        .route("/chat/{room}", get(ws::room_handler))
}

/// Builds the full router.
///
/// - `POST /livechat/request`, `GET /livechat/availability`, `GET /health` (public)
/// - `POST /livechat/save-session`, `POST /livechat/cleanup`,
///   `POST /livechat/end`, `GET /livechat/sessions` (operator bearer token)
/// - `GET /chat/master`, `/chat/{room}` and the same under `/ws` (auth via query)
pub fn router(state: GatewayState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(handlers::get_health))
        .route("/livechat/availability", get(handlers::get_availability))
        .route("/livechat/request", post(handlers::post_request))
        .with_state(state.clone());

    let operator_routes = Router::new()
        .route("/livechat/save-session", post(handlers::post_save_session))
        .route("/livechat/cleanup", post(handlers::post_cleanup))
        .route("/livechat/end", post(handlers::post_end))
        .route("/livechat/sessions", get(handlers::get_sessions))
        .route_layer(axum_middleware::from_fn_with_state(
            state.auth.clone(),
            operator_auth_middleware,
        ))
        .with_state(state.clone());

    let ws_routes = chat_routes()
        .nest("/ws", chat_routes())
        .with_state(state);

    Router::new()
        .merge(public_routes)
        .merge(operator_routes)
        .merge(ws_routes)
        .layer(CorsLayer::permissive())
}

/// Serves the router on `listener` until `cancel` fires.
pub async fn serve(
    listener: TcpListener,
    state: GatewayState,
    cancel: CancellationToken,
) -> Result<(), RelaydeskError> {
    let app = router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
        .map_err(|e| RelaydeskError::Transport {
            message: format!("gateway server error: {e}"),
            source: Some(Box::new(e)),
        })
}

/// Binds the listening socket for `addr`.
pub async fn bind(addr: &str) -> Result<TcpListener, RelaydeskError> {
    TcpListener::bind(addr)
        .await
        .map_err(|e| RelaydeskError::Transport {
            message: format!("failed to bind gateway to {addr}: {e}"),
            source: Some(Box::new(e)),
        })
}
