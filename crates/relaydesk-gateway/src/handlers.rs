// SPDX-FileCopyrightText: 2026 Relaydesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP request handlers for the live-chat boundary.
//!
//! Every response body carries `ok`. Failures are `{ok:false, error:<code>}`
//! with a status matching the error kind.

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use relaydesk_core::{
    EndCause, EndMetadata, HealthStatus, LobbyEvent, PageInfo, PolicyViolation, RelaydeskError,
    RoomId, RoomState, SaveSession, SessionId, SessionRecord, SessionSaved,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, error, info};

use crate::server::GatewayState;

const MAX_LIST_LIMIT: usize = 500;

/// Error wrapper rendered as `{ok:false, error}`.
#[derive(Debug)]
pub struct ApiError(pub RelaydeskError);

impl From<RelaydeskError> for ApiError {
    fn from(e: RelaydeskError) -> Self {
        Self(e)
    }
}

impl From<PolicyViolation> for ApiError {
    fn from(v: PolicyViolation) -> Self {
        Self(v.into())
    }
}

pub fn status_for(err: &RelaydeskError) -> StatusCode {
    match err {
        RelaydeskError::Policy(v) => match v {
            PolicyViolation::EndMetadataRequired | PolicyViolation::InvalidRoomId(_) => {
                StatusCode::BAD_REQUEST
            }
            PolicyViolation::SessionEnded
            | PolicyViolation::SessionNotEnded
            | PolicyViolation::UnsavedSession { .. } => StatusCode::CONFLICT,
            PolicyViolation::NotPermitted { .. } => StatusCode::FORBIDDEN,
        },
        RelaydeskError::Protocol { .. } => StatusCode::BAD_REQUEST,
        RelaydeskError::NotFound { .. } => StatusCode::NOT_FOUND,
        RelaydeskError::Transport { .. } => StatusCode::BAD_GATEWAY,
        RelaydeskError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        RelaydeskError::Storage { .. } | RelaydeskError::Config(_) | RelaydeskError::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        let body = if status.is_server_error() {
            error!(error = %self.0, "request failed");
            json!({ "ok": false, "error": self.0.code() })
        } else {
            debug!(error = %self.0, "request rejected");
            json!({ "ok": false, "error": self.0.code(), "message": self.0.to_string() })
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult = Result<Json<Value>, ApiError>;

/// Request body for POST /livechat/request.
#[derive(Debug, Deserialize)]
pub struct ChatRequestBody {
    pub room: String,
    #[serde(default)]
    pub page: PageInfo,
    /// Full URL of the page the visitor asked from.
    #[serde(default)]
    pub url: Option<String>,
}

/// Request body for POST /livechat/cleanup.
#[derive(Debug, Default, Deserialize)]
pub struct CleanupBody {
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub session_id: Option<SessionId>,
}

/// Request body for POST /livechat/end.
#[derive(Debug, Deserialize)]
pub struct EndBody {
    pub room: String,
    #[serde(flatten)]
    pub metadata: EndMetadata,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Response body for GET /health.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub rooms: usize,
    pub operators: usize,
    pub storage: String,
}

/// POST /livechat/request
///
/// Opens (or reuses) the session record for a room and returns its id.
pub async fn post_request(
    State(state): State<GatewayState>,
    Json(body): Json<ChatRequestBody>,
) -> ApiResult {
    let room = RoomId::parse(body.room)?;
    let record = state
        .store
        .open_request(&room, &body.page, body.url.as_deref())
        .await?;
    state.registry.attach_session(&room, record.id).await?;
    info!(room = %room, session_id = %record.id, "chat requested");

    Ok(Json(json!({
        "ok": true,
        "session_id": record.id,
        "code": record.id.to_string(),
        "room": room,
        "greeting": state.chat.greeting,
    })))
}

/// GET /livechat/availability
pub async fn get_availability(State(state): State<GatewayState>) -> Json<Value> {
    let operators = state.lobby.operator_count();
    Json(json!({
        "ok": true,
        "available": operators > 0,
        "operator_count": operators,
    }))
}

/// POST /livechat/save-session
///
/// Saves the operator's final metadata for an ended session, then tells
/// every console to refresh through the lobby.
pub async fn post_save_session(
    State(state): State<GatewayState>,
    Json(mut body): Json<SaveSession>,
) -> ApiResult {
    if state.chat.require_end_metadata && body.metadata.is_empty() {
        return Err(PolicyViolation::EndMetadataRequired.into());
    }
    let room = body.room.as_deref().map(RoomId::parse).transpose()?;

    if let Some(room) = &room {
        if let Some(snapshot) = state.registry.snapshot(room).await {
            if snapshot.state != RoomState::Ended {
                return Err(PolicyViolation::SessionNotEnded.into());
            }
            body.session_id = body.session_id.or(snapshot.session_id);
            body.end_cause = body.end_cause.or(snapshot.end_cause);
        }
    }

    let record = state.store.save(&body).await?;
    if let Ok(saved_room) = RoomId::parse(record.room.as_str()) {
        state.registry.mark_saved(&saved_room).await;
    }
    info!(room = %record.room, session_id = %record.id, "session saved");
    state
        .lobby
        .publish(&LobbyEvent::SessionSaved(saved_event(&record)));

    Ok(Json(json!({ "ok": true, "session": record })))
}

fn saved_event(record: &SessionRecord) -> SessionSaved {
    let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
    SessionSaved {
        session_id: Some(record.id),
        room: Some(record.room.clone()),
        status: Some(record.status),
        session_type: non_empty(&record.metadata.session_type),
        session_note: non_empty(&record.metadata.session_note),
        created_at: Some(record.created_at.clone()),
        ended_at: record.ended_at.clone(),
    }
}

/// POST /livechat/cleanup
///
/// `{session_id}` deletes one record; `{mode:"today"}` ends every record
/// created today that is still open.
pub async fn post_cleanup(
    State(state): State<GatewayState>,
    Json(body): Json<CleanupBody>,
) -> ApiResult {
    let response = match (body.session_id, body.mode.as_deref()) {
        (Some(id), _) => {
            let deleted = state.store.delete(id).await?;
            info!(session_id = %id, deleted, "session deleted");
            json!({ "ok": true, "deleted": deleted })
        }
        (None, Some("today")) => {
            let updated = state.store.cleanup_today().await?;
            info!(updated, "today's open sessions closed");
            json!({ "ok": true, "updated": updated })
        }
        _ => {
            return Err(RelaydeskError::Protocol {
                message: "cleanup needs `session_id` or `mode: \"today\"`".into(),
            }
            .into());
        }
    };
    // Consoles re-fetch their recent list on any session_saved.
    state
        .lobby
        .publish(&LobbyEvent::SessionSaved(SessionSaved::default()));
    Ok(Json(response))
}

/// POST /livechat/end
///
/// Ends a live room on behalf of an operator.
pub async fn post_end(State(state): State<GatewayState>, Json(body): Json<EndBody>) -> ApiResult {
    let room = RoomId::parse(body.room)?;
    let cause: EndCause = state.registry.end_room(&room, body.metadata).await?;
    Ok(Json(json!({ "ok": true, "room": room, "cause": cause })))
}

/// GET /livechat/sessions
pub async fn get_sessions(
    State(state): State<GatewayState>,
    Query(params): Query<ListParams>,
) -> ApiResult {
    let limit = params
        .limit
        .unwrap_or(state.chat.recent_sessions_limit)
        .clamp(1, MAX_LIST_LIMIT);
    let sessions = state.store.list_recent(limit).await?;
    Ok(Json(json!({ "ok": true, "sessions": sessions })))
}

/// GET /health
pub async fn get_health(State(state): State<GatewayState>) -> Json<HealthResponse> {
    let (status, storage) = match state.store.health_check().await {
        Ok(HealthStatus::Healthy) => ("ok", "healthy".to_string()),
        Ok(HealthStatus::Degraded(reason)) => ("degraded", format!("degraded: {reason}")),
        Ok(HealthStatus::Unhealthy(reason)) => ("degraded", format!("unhealthy: {reason}")),
        Err(e) => ("degraded", format!("unhealthy: {e}")),
    };
    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.health.start_time.elapsed().as_secs(),
        rooms: state.registry.room_count(),
        operators: state.lobby.operator_count(),
        storage,
    })
}
