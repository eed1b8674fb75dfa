// SPDX-FileCopyrightText: 2026 Relaydesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types shared by every relaydesk crate.
//!
//! The variants follow the failure taxonomy of the live-chat protocol:
//! transport failures are recovered by reconnecting, protocol failures drop
//! the offending frame, persistence failures are surfaced to the operator
//! with a retry, and policy violations are rejected with a prompt.

use thiserror::Error;

/// The primary error type used across relaydesk.
#[derive(Debug, Error)]
pub enum RelaydeskError {
    /// Configuration errors (invalid TOML, missing required fields, type mismatches).
    #[error("configuration error: {0}")]
    Config(String),

    /// Transport failures: connect refused, mid-session drop, send on a closed socket.
    #[error("transport error: {message}")]
    Transport {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A frame could not be decoded into a protocol event.
    #[error("protocol error: {message}")]
    Protocol { message: String },

    /// Persistence backend errors (database failure, gateway returned `ok:false`).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The request violates a session policy.
    #[error("policy violation: {0}")]
    Policy(#[from] PolicyViolation),

    /// A room or session record does not exist.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Operation timed out.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: std::time::Duration },

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl RelaydeskError {
    /// Builds a transport error without an underlying source.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            source: None,
        }
    }

    /// Builds a storage error from a plain message.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            source: message.into().into(),
        }
    }

    /// Stable machine-readable code, used in `{ok:false, error}` bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "config_error",
            Self::Transport { .. } => "transport_error",
            Self::Protocol { .. } => "invalid_message",
            Self::Storage { .. } => "storage_error",
            Self::Policy(violation) => violation.code(),
            Self::NotFound { .. } => "not_found",
            Self::Timeout { .. } => "timeout",
            Self::Internal(_) => "server_error",
        }
    }
}

/// Session policy rules enforced on both sides of the connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyViolation {
    /// An operator end needs a session type, note, or detail.
    #[error("ending a session requires a session type, note, or detail")]
    EndMetadataRequired,

    /// The session has ended; chat is closed.
    #[error("the session has already ended")]
    SessionEnded,

    /// Save was attempted while the room is still live.
    #[error("the session has not ended yet")]
    SessionNotEnded,

    /// A previous session still needs to be saved or abandoned.
    #[error("session for room `{room}` has not been saved")]
    UnsavedSession { room: String },

    /// The caller's role may not perform the action.
    #[error("not permitted: {action}")]
    NotPermitted { action: String },

    /// The room identifier is empty, reserved, or malformed.
    #[error("invalid room id `{0}`")]
    InvalidRoomId(String),
}

impl PolicyViolation {
    /// Stable machine-readable code for this violation.
    pub fn code(&self) -> &'static str {
        match self {
            Self::EndMetadataRequired => "metadata_required",
            Self::SessionEnded => "session_ended",
            Self::SessionNotEnded => "session_not_ended",
            Self::UnsavedSession { .. } => "session_unsaved",
            Self::NotPermitted { .. } => "not_permitted",
            Self::InvalidRoomId(_) => "invalid_room",
        }
    }
}
