// SPDX-FileCopyrightText: 2026 Relaydesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Operator authentication.
//!
//! Operator HTTP routes take `Authorization: Bearer <token>`. Socket upgrades
//! carry `?role=operator&token=<token>` because browsers cannot set headers
//! on a WebSocket handshake. When no token is configured every operator
//! request is rejected (fail-closed); visitors never need a token.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use relaydesk_core::Role;
use serde::Deserialize;

/// Expected operator credential.
#[derive(Clone, Default)]
pub struct OperatorAuth {
    pub token: Option<String>,
}

impl std::fmt::Debug for OperatorAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperatorAuth")
            .field("token", &self.token.as_ref().map(|_| "[redacted]"))
            .finish()
    }
}

impl OperatorAuth {
    pub fn new(token: Option<String>) -> Self {
        Self { token }
    }

    /// Checks a presented token against the configured one.
    pub fn accepts(&self, presented: Option<&str>) -> bool {
        match (self.token.as_deref(), presented) {
            (Some(expected), Some(given)) => expected == given,
            _ => false,
        }
    }

    /// Decides the role for a socket upgrade, before the upgrade happens.
    pub fn authorize_upgrade(&self, params: &ConnectParams) -> Result<Role, StatusCode> {
        match params.role.unwrap_or_default() {
            Role::User => Ok(Role::User),
            Role::Operator if self.accepts(params.token.as_deref()) => Ok(Role::Operator),
            Role::Operator => {
                tracing::warn!("operator upgrade rejected: bad or missing token");
                Err(StatusCode::UNAUTHORIZED)
            }
            Role::System => Err(StatusCode::BAD_REQUEST),
        }
    }
}

/// Query parameters accepted on `/chat/...` upgrades.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConnectParams {
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub token: Option<String>,
}

/// Middleware guarding operator HTTP routes with a bearer token.
pub async fn operator_auth_middleware(
    State(auth): State<OperatorAuth>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    if auth.token.is_none() {
        tracing::error!("no operator token configured -- rejecting operator request");
        return Err(StatusCode::UNAUTHORIZED);
    }

    let presented = request
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    if auth.accepts(presented) {
        return Ok(next.run(request).await);
    }
    Err(StatusCode::UNAUTHORIZED)
}
