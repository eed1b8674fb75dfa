// SPDX-FileCopyrightText: 2026 Relaydesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common types shared by the gateway, storage, and client crates.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use strum::{Display, EnumString};

use crate::error::PolicyViolation;

/// Names that address the lobby channel and can never be used as a room id.
pub const LOBBY_NAMES: [&str; 2] = ["master", "lobby"];

/// Longest accepted room identifier, in characters.
pub const MAX_ROOM_ID_LEN: usize = 128;

/// Opaque room identifier chosen by the visitor.
///
/// A valid id is 1 to [`MAX_ROOM_ID_LEN`] characters long, contains no `/`
/// and no whitespace, and is not one of the [`LOBBY_NAMES`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomId(String);

impl RoomId {
    /// Validates and wraps a room identifier.
    pub fn parse(raw: impl Into<String>) -> Result<Self, PolicyViolation> {
        let raw = raw.into();
        let len = raw.chars().count();
        let well_formed = (1..=MAX_ROOM_ID_LEN).contains(&len)
            && !raw.contains('/')
            && !raw.chars().any(char::is_whitespace);
        if !well_formed || LOBBY_NAMES.contains(&raw.as_str()) {
            return Err(PolicyViolation::InvalidRoomId(raw));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RoomId {
    type Err = PolicyViolation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for RoomId {
    type Error = PolicyViolation;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<RoomId> for String {
    fn from(value: RoomId) -> Self {
        value.0
    }
}

/// Identifier of a persisted session record.
///
/// Serialized as a JSON number; accepted as either a number or a numeric string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SessionId(pub i64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<'de> Deserialize<'de> for SessionId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Int(i64),
            Str(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Int(n) => Ok(SessionId(n)),
            Raw::Str(s) => s
                .trim()
                .parse()
                .map(SessionId)
                .map_err(|_| serde::de::Error::custom(format!("invalid session id `{s}`"))),
        }
    }
}

/// Participant role on a connection.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    /// The anonymous visitor.
    #[default]
    User,
    /// A human operator working from a console.
    Operator,
    /// Frames produced by the server itself.
    System,
}

/// Lifecycle state of a room and of its persisted record.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RoomState {
    #[default]
    Waiting,
    Active,
    Ended,
}

/// Who or what ended a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum EndCause {
    /// The visitor ended it, explicitly or by closing cleanly.
    User,
    /// The operator ended it.
    Operator,
    /// The visitor's connection dropped without a clean close.
    Network,
}

impl EndCause {
    /// Attribution for an explicit end signal sent by `role`.
    pub fn from_role(role: Role) -> Self {
        match role {
            Role::Operator => Self::Operator,
            Role::User | Role::System => Self::User,
        }
    }
}

/// Health status reported by adapter health checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// Adapter is fully operational.
    Healthy,
    /// Adapter is operational but experiencing issues.
    Degraded(String),
    /// Adapter is not operational.
    Unhealthy(String),
}

/// Identifies the kind of adapter behind a trait object.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
pub enum AdapterType {
    /// Server-side session storage.
    Storage,
    /// Remote persistence gateway reached over HTTP.
    Persistence,
    /// The WebSocket/HTTP gateway.
    Gateway,
}

/// The page a visitor was looking at when they asked for help.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl PageInfo {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.path.is_none()
    }
}

/// A new chat request waiting for an operator, as broadcast on the lobby.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandoffRequest {
    pub room: RoomId,
    pub requester_url: Option<String>,
    pub page: PageInfo,
    pub session_id: Option<SessionId>,
    /// Epoch milliseconds.
    pub ts: i64,
}

/// Operator-supplied classification attached when a session ends.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndMetadata {
    #[serde(default)]
    pub session_type: String,
    #[serde(default)]
    pub session_note: String,
    #[serde(default)]
    pub session_detail: String,
}

impl EndMetadata {
    /// True when type, note, and detail are all blank.
    pub fn is_empty(&self) -> bool {
        self.session_type.trim().is_empty()
            && self.session_note.trim().is_empty()
            && self.session_detail.trim().is_empty()
    }
}

/// A persisted live-chat session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: SessionId,
    pub room: String,
    pub source: String,
    pub status: RoomState,
    pub page_title: Option<String>,
    pub page_path: Option<String>,
    pub requester_url: Option<String>,
    #[serde(flatten)]
    pub metadata: EndMetadata,
    pub end_cause: Option<EndCause>,
    pub created_at: String,
    pub connected_at: Option<String>,
    pub ended_at: Option<String>,
    pub saved_at: Option<String>,
}

/// The operator's final submission for an ended session.
///
/// The target record is chosen by `session_id`, else the newest record for
/// `room`; when neither matches a new record is created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveSession {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
    #[serde(flatten)]
    pub metadata: EndMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_cause: Option<EndCause>,
}

/// Current time as epoch milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Current time in the ISO 8601 form stored in session records.
pub fn now_iso() -> String {
    chrono::Utc::now()
        .format("%Y-%m-%dT%H:%M:%S%.3fZ")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_id_accepts_plain_tokens() {
        let id = RoomId::parse("r1").unwrap();
        assert_eq!(id.as_str(), "r1");
        assert!(RoomId::parse("visitor_8f2c-41aa").is_ok());
        assert!(RoomId::parse("a".repeat(MAX_ROOM_ID_LEN)).is_ok());
    }

    #[test]
    fn room_id_rejects_reserved_and_malformed() {
        for bad in ["", "master", "lobby", "a/b", "has space", "tab\there"] {
            assert_eq!(
                RoomId::parse(bad),
                Err(PolicyViolation::InvalidRoomId(bad.to_string())),
                "{bad:?} should be rejected"
            );
        }
        assert!(RoomId::parse("a".repeat(MAX_ROOM_ID_LEN + 1)).is_err());
    }

    #[test]
    fn room_id_deserialize_validates() {
        let ok: RoomId = serde_json::from_str("\"r7\"").unwrap();
        assert_eq!(ok.to_string(), "r7");
        assert!(serde_json::from_str::<RoomId>("\"master\"").is_err());
    }

    #[test]
    fn session_id_accepts_number_or_string() {
        let a: SessionId = serde_json::from_str("42").unwrap();
        let b: SessionId = serde_json::from_str("\"42\"").unwrap();
        assert_eq!(a, b);
        assert_eq!(serde_json::to_string(&a).unwrap(), "42");
        assert!(serde_json::from_str::<SessionId>("\"abc\"").is_err());
    }

    #[test]
    fn roles_and_states_use_lowercase_names() {
        assert_eq!(Role::Operator.to_string(), "operator");
        assert_eq!("user".parse::<Role>().unwrap(), Role::User);
        assert_eq!(serde_json::to_string(&RoomState::Ended).unwrap(), "\"ended\"");
        assert_eq!("network".parse::<EndCause>().unwrap(), EndCause::Network);
    }

    #[test]
    fn end_cause_follows_sender_role() {
        assert_eq!(EndCause::from_role(Role::Operator), EndCause::Operator);
        assert_eq!(EndCause::from_role(Role::User), EndCause::User);
    }

    #[test]
    fn end_metadata_blank_fields_count_as_empty() {
        let mut meta = EndMetadata {
            session_type: "  ".into(),
            ..Default::default()
        };
        assert!(meta.is_empty());
        meta.session_note = "refund issued".into();
        assert!(!meta.is_empty());
    }

    #[test]
    fn save_session_reads_flat_body() {
        let save: SaveSession = serde_json::from_str(
            r#"{"room":"r1","session_type":"billing","session_note":"","session_detail":"x"}"#,
        )
        .unwrap();
        assert_eq!(save.room.as_deref(), Some("r1"));
        assert_eq!(save.metadata.session_type, "billing");
        assert!(save.session_id.is_none());
    }
}
