// SPDX-FileCopyrightText: 2026 Relaydesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP client for the `/livechat/...` boundary.
//!
//! [`HttpGateway`] tries each configured base URL in order and moves on only
//! when an endpoint cannot be reached. Any HTTP answer, success or failure,
//! is final. When no endpoint answers, the error message starts with
//! [`APOLOGY`] so a UI can show it inline.

use std::time::Duration;

use async_trait::async_trait;
use relaydesk_core::{
    Adapter, AdapterType, EndCause, EndMetadata, HealthStatus, PageInfo, PersistenceGateway,
    PolicyViolation, RelaydeskError, RoomId, SaveSession, SessionId, SessionRecord,
};
use reqwest::{Method, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, warn};

/// Shown to a participant when no gateway endpoint is reachable.
pub const APOLOGY: &str =
    "Sorry, live chat is unavailable right now. Please try again in a few minutes.";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Availability {
    pub available: bool,
    pub operator_count: usize,
}

/// Answer to `POST /livechat/request`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChatTicket {
    pub session_id: SessionId,
    pub code: String,
    pub room: RoomId,
    #[serde(default)]
    pub greeting: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GatewayHealth {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub rooms: usize,
    pub operators: usize,
    pub storage: String,
}

#[derive(Clone)]
pub struct HttpGateway {
    client: reqwest::Client,
    bases: Vec<String>,
    token: Option<String>,
}

impl std::fmt::Debug for HttpGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpGateway")
            .field("bases", &self.bases)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl HttpGateway {
    /// Creates a client for the given base URLs, tried in order.
    ///
    /// `token` is the operator bearer token; visitor calls work without it.
    pub fn new(bases: Vec<String>, token: Option<String>) -> Result<Self, RelaydeskError> {
        Self::with_timeout(bases, token, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(
        bases: Vec<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, RelaydeskError> {
        let bases: Vec<String> = bases
            .into_iter()
            .map(|b| b.trim_end_matches('/').to_string())
            .filter(|b| !b.is_empty())
            .collect();
        if bases.is_empty() {
            return Err(RelaydeskError::Config(
                "at least one gateway base URL is required".into(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(CONNECT_TIMEOUT.min(timeout))
            .build()
            .map_err(|e| RelaydeskError::Transport {
                message: format!("failed to build HTTP client: {e}"),
                source: Some(Box::new(e)),
            })?;
        Ok(Self {
            client,
            bases,
            token: token.filter(|t| !t.is_empty()),
        })
    }

    pub fn bases(&self) -> &[String] {
        &self.bases
    }

    pub async fn availability(&self) -> Result<Availability, RelaydeskError> {
        let body = self.call(Method::GET, "/livechat/availability", None).await?;
        parse(body)
    }

    /// Opens (or reuses) the session record for a visitor's room.
    pub async fn request_chat(
        &self,
        room: &RoomId,
        page: &PageInfo,
        requester_url: Option<&str>,
    ) -> Result<ChatTicket, RelaydeskError> {
        let body = json!({ "room": room, "page": page, "url": requester_url });
        let body = self
            .call(Method::POST, "/livechat/request", Some(&body))
            .await?;
        parse(body)
    }

    /// Ends a room over HTTP on behalf of the operator.
    pub async fn end_room(
        &self,
        room: &RoomId,
        metadata: &EndMetadata,
    ) -> Result<EndCause, RelaydeskError> {
        let mut body = serde_json::to_value(metadata).map_err(|e| RelaydeskError::Protocol {
            message: format!("failed to encode end metadata: {e}"),
        })?;
        body["room"] = json!(room);
        let body = self.call(Method::POST, "/livechat/end", Some(&body)).await?;
        parse(body["cause"].clone())
    }

    /// Closes every record opened today that has not ended.
    pub async fn cleanup_today(&self) -> Result<u64, RelaydeskError> {
        let body = json!({ "mode": "today" });
        let body = self
            .call(Method::POST, "/livechat/cleanup", Some(&body))
            .await?;
        Ok(body["updated"].as_u64().unwrap_or(0))
    }

    pub async fn health(&self) -> Result<GatewayHealth, RelaydeskError> {
        let body = self.call(Method::GET, "/health", None).await?;
        parse(body)
    }

    async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, RelaydeskError> {
        let mut last_error = None;
        for base in &self.bases {
            let url = format!("{base}{path}");
            let mut request = self.client.request(method.clone(), &url);
            if let Some(token) = &self.token {
                request = request.bearer_auth(token);
            }
            if let Some(body) = body {
                request = request.json(body);
            }
            match request.send().await {
                Ok(response) => {
                    debug!(url = %url, status = %response.status(), "gateway answered");
                    return decode(response, path).await;
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "gateway endpoint unreachable");
                    last_error = Some(e);
                }
            }
        }
        Err(RelaydeskError::Transport {
            message: format!(
                "{APOLOGY} (none of {} gateway endpoints answered {path})",
                self.bases.len()
            ),
            source: last_error.map(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>),
        })
    }
}

/// Message to show a participant for a failed gateway call.
pub fn user_message(err: &RelaydeskError) -> String {
    match err {
        RelaydeskError::Transport { .. } => APOLOGY.to_string(),
        other => other.to_string(),
    }
}

async fn decode(response: Response, path: &str) -> Result<Value, RelaydeskError> {
    let status = response.status();
    let body: Value = response.json().await.unwrap_or(Value::Null);
    let refused = body.get("ok").and_then(Value::as_bool) == Some(false);
    if status.is_success() && !refused {
        return Ok(body);
    }
    Err(error_from(status, &body, path))
}

fn error_from(status: StatusCode, body: &Value, path: &str) -> RelaydeskError {
    let code = body.get("error").and_then(Value::as_str).unwrap_or_default();
    let message = body
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or(code)
        .to_string();
    match code {
        "metadata_required" => PolicyViolation::EndMetadataRequired.into(),
        "session_not_ended" => PolicyViolation::SessionNotEnded.into(),
        "session_ended" => PolicyViolation::SessionEnded.into(),
        "invalid_room" => PolicyViolation::InvalidRoomId(message).into(),
        "not_found" => RelaydeskError::NotFound {
            kind: "session",
            id: message,
        },
        _ if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN => {
            PolicyViolation::NotPermitted {
                action: format!("call {path}"),
            }
            .into()
        }
        _ if status.is_server_error() || code == "storage_error" => {
            RelaydeskError::storage(format!("gateway returned {status} for {path}: {message}"))
        }
        _ => RelaydeskError::Protocol {
            message: format!("gateway rejected {path} with {status}: {message}"),
        },
    }
}

fn parse<T: DeserializeOwned>(value: Value) -> Result<T, RelaydeskError> {
    serde_json::from_value(value).map_err(|e| RelaydeskError::Protocol {
        message: format!("unexpected gateway response: {e}"),
    })
}

#[async_trait]
impl Adapter for HttpGateway {
    fn name(&self) -> &str {
        "http-gateway"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Persistence
    }

    async fn health_check(&self) -> Result<HealthStatus, RelaydeskError> {
        Ok(match self.health().await {
            Ok(health) if health.status == "ok" => HealthStatus::Healthy,
            Ok(health) => HealthStatus::Degraded(health.storage),
            Err(e) => HealthStatus::Unhealthy(e.to_string()),
        })
    }

    async fn shutdown(&self) -> Result<(), RelaydeskError> {
        Ok(())
    }
}

#[async_trait]
impl PersistenceGateway for HttpGateway {
    async fn save(&self, record: &SaveSession) -> Result<SessionRecord, RelaydeskError> {
        let body = serde_json::to_value(record).map_err(|e| RelaydeskError::Protocol {
            message: format!("failed to encode save request: {e}"),
        })?;
        let body = self
            .call(Method::POST, "/livechat/save-session", Some(&body))
            .await?;
        parse(body["session"].clone())
    }

    async fn delete(&self, id: SessionId) -> Result<u64, RelaydeskError> {
        let body = json!({ "session_id": id });
        let body = self
            .call(Method::POST, "/livechat/cleanup", Some(&body))
            .await?;
        Ok(body["deleted"].as_u64().unwrap_or(0))
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<SessionRecord>, RelaydeskError> {
        let path = format!("/livechat/sessions?limit={limit}");
        let body = self.call(Method::GET, &path, None).await?;
        parse(body["sessions"].clone())
    }
}
