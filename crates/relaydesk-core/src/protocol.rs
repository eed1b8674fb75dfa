// SPDX-FileCopyrightText: 2026 Relaydesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Wire protocol for lobby and room connections.
//!
//! Every frame is a JSON object in which all fields are optional. Frames are
//! read into the tolerant [`WireMessage`] shape first (a field with the wrong
//! JSON type is treated as absent) and then decoded exactly once into a
//! tagged event: [`RoomEvent`] for `/chat/<room>` and [`LobbyEvent`] for
//! `/chat/master`. Handlers match on the event, never on raw strings.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::RelaydeskError;
use crate::types::{
    EndCause, EndMetadata, HandoffRequest, PageInfo, Role, RoomId, RoomState, SessionId,
};

/// `type` tags understood on either channel.
pub mod tag {
    pub const PLAIN: &str = "plain";
    pub const HANDOFF: &str = "handoff";
    pub const END: &str = "end";
    pub const CLOSED: &str = "closed";
    pub const RELEASE: &str = "release";
    pub const SESSION_SAVED: &str = "session_saved";
    pub const STATE: &str = "state";
    pub const ERROR: &str = "error";
}

/// WebSocket close codes used by the relay.
pub mod close {
    /// The only code treated as a clean close.
    pub const NORMAL: u16 = 1000;
    /// The server is shutting down; clients reconnect.
    pub const GOING_AWAY: u16 = 1001;
    /// The room table is full; try again later.
    pub const TRY_AGAIN: u16 = 1013;
    /// The room id is missing or invalid. Retrying cannot succeed.
    pub const INVALID_ROOM: u16 = 4000;
}

fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| serde_json::from_value(v).ok()))
}

/// A raw frame as it travels over the socket.
///
/// Unknown fields are kept in `extra` so chat frames are relayed verbatim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    #[serde(rename = "type", default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub sender: Option<Role>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Epoch milliseconds.
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub ts: Option<i64>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub page: Option<PageInfo>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub session_type: Option<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub session_note: Option<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub session_detail: Option<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub cause: Option<EndCause>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub state: Option<RoomState>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub status: Option<RoomState>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl WireMessage {
    /// Parses a text frame. Fails only when the frame is not a JSON object.
    pub fn decode(text: &str) -> Result<Self, RelaydeskError> {
        let value: Value = serde_json::from_str(text).map_err(|e| RelaydeskError::Protocol {
            message: format!("malformed JSON: {e}"),
        })?;
        if !value.is_object() {
            return Err(RelaydeskError::Protocol {
                message: "frame is not a JSON object".into(),
            });
        }
        serde_json::from_value(value).map_err(|e| RelaydeskError::Protocol {
            message: format!("unreadable frame: {e}"),
        })
    }

    pub fn encode(&self) -> Result<String, RelaydeskError> {
        serde_json::to_string(self).map_err(|e| RelaydeskError::Protocol {
            message: format!("failed to encode frame: {e}"),
        })
    }

    fn with_kind(kind: &str) -> Self {
        Self {
            kind: Some(kind.to_string()),
            ..Default::default()
        }
    }

    fn metadata(&self) -> EndMetadata {
        EndMetadata {
            session_type: self.session_type.clone().unwrap_or_default(),
            session_note: self.session_note.clone().unwrap_or_default(),
            session_detail: self.session_detail.clone().unwrap_or_default(),
        }
    }

    fn set_metadata(&mut self, meta: &EndMetadata) {
        let non_empty = |s: &String| (!s.is_empty()).then(|| s.clone());
        self.session_type = non_empty(&meta.session_type);
        self.session_note = non_empty(&meta.session_note);
        self.session_detail = non_empty(&meta.session_detail);
    }

    fn room_id(&self) -> Result<RoomId, RelaydeskError> {
        let raw = self.room.as_deref().ok_or_else(|| RelaydeskError::Protocol {
            message: format!(
                "`{}` frame without a room",
                self.kind.as_deref().unwrap_or_default()
            ),
        })?;
        Ok(RoomId::parse(raw)?)
    }
}

/// A chat line exchanged inside a room.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub sender: Role,
    pub text: String,
    pub ts: i64,
    /// Fields the relay does not interpret, passed through untouched.
    pub extra: Map<String, Value>,
}

/// A frame on a room connection.
#[derive(Debug, Clone, PartialEq)]
pub enum RoomEvent {
    Chat(ChatMessage),
    /// Explicit end signal.
    End {
        sender: Role,
        metadata: EndMetadata,
        cause: Option<EndCause>,
        ts: i64,
    },
    /// Closing notice. Before the room has ended it is handled as an end.
    Closed {
        sender: Role,
        cause: Option<EndCause>,
        ts: i64,
    },
    /// Server snapshot of the room's lifecycle state.
    State { room: String, state: RoomState },
    /// Server rejection addressed to a single sender.
    Error { code: String, text: String },
}

impl RoomEvent {
    /// Server-originated error frame.
    pub fn error(code: &str, text: impl Into<String>) -> Self {
        Self::Error {
            code: code.to_string(),
            text: text.into(),
        }
    }

    /// Whether this event ends a room that has not ended yet.
    pub fn is_end_signal(&self) -> bool {
        matches!(self, Self::End { .. } | Self::Closed { .. })
    }

    pub fn to_wire(&self, room: &str) -> WireMessage {
        match self {
            Self::Chat(chat) => WireMessage {
                sender: Some(chat.sender),
                room: Some(room.to_string()),
                text: Some(chat.text.clone()),
                ts: Some(chat.ts),
                extra: chat.extra.clone(),
                ..Default::default()
            },
            Self::End {
                sender,
                metadata,
                cause,
                ts,
            } => {
                let mut msg = WireMessage::with_kind(tag::END);
                msg.sender = Some(*sender);
                msg.room = Some(room.to_string());
                msg.ts = Some(*ts);
                msg.cause = *cause;
                msg.set_metadata(metadata);
                msg
            }
            Self::Closed { sender, cause, ts } => {
                let mut msg = WireMessage::with_kind(tag::CLOSED);
                msg.sender = Some(*sender);
                msg.room = Some(room.to_string());
                msg.ts = Some(*ts);
                msg.cause = *cause;
                msg
            }
            Self::State { room, state } => {
                let mut msg = WireMessage::with_kind(tag::STATE);
                msg.sender = Some(Role::System);
                msg.room = Some(room.clone());
                msg.state = Some(*state);
                msg
            }
            Self::Error { code, text } => {
                let mut msg = WireMessage::with_kind(tag::ERROR);
                msg.sender = Some(Role::System);
                msg.room = Some(room.to_string());
                msg.code = Some(code.clone());
                msg.text = Some(text.clone());
                msg
            }
        }
    }
}

impl TryFrom<WireMessage> for RoomEvent {
    type Error = RelaydeskError;

    fn try_from(msg: WireMessage) -> Result<Self, RelaydeskError> {
        let sender = msg.sender.unwrap_or_default();
        let ts = msg.ts.unwrap_or_default();
        match msg.kind.as_deref() {
            None | Some(tag::PLAIN) => {
                let text = msg.text.ok_or_else(|| RelaydeskError::Protocol {
                    message: "chat frame without text".into(),
                })?;
                Ok(Self::Chat(ChatMessage {
                    sender,
                    text,
                    ts,
                    extra: msg.extra,
                }))
            }
            Some(tag::END) => Ok(Self::End {
                sender,
                metadata: msg.metadata(),
                cause: msg.cause,
                ts,
            }),
            Some(tag::CLOSED) => Ok(Self::Closed {
                sender,
                cause: msg.cause,
                ts,
            }),
            Some(tag::STATE) => Ok(Self::State {
                room: msg.room.unwrap_or_default(),
                state: msg.state.unwrap_or_default(),
            }),
            Some(tag::ERROR) => Ok(Self::Error {
                code: msg.code.unwrap_or_default(),
                text: msg.text.unwrap_or_default(),
            }),
            Some(other) => Err(RelaydeskError::Protocol {
                message: format!("unknown room frame type `{other}`"),
            }),
        }
    }
}

/// Broadcast after a session record has been saved.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSaved {
    pub session_id: Option<SessionId>,
    pub room: Option<String>,
    pub status: Option<RoomState>,
    pub session_type: Option<String>,
    pub session_note: Option<String>,
    pub created_at: Option<String>,
    pub ended_at: Option<String>,
}

/// A frame on the lobby channel.
#[derive(Debug, Clone, PartialEq)]
pub enum LobbyEvent {
    Handoff(HandoffRequest),
    SessionSaved(SessionSaved),
    End {
        room: RoomId,
        cause: Option<EndCause>,
    },
    Closed {
        room: RoomId,
        cause: Option<EndCause>,
    },
    Release {
        room: RoomId,
    },
}

impl LobbyEvent {
    /// The room this event concerns, if any.
    pub fn room(&self) -> Option<&str> {
        match self {
            Self::Handoff(h) => Some(h.room.as_str()),
            Self::SessionSaved(s) => s.room.as_deref(),
            Self::End { room, .. } | Self::Closed { room, .. } | Self::Release { room } => {
                Some(room.as_str())
            }
        }
    }

    pub fn to_wire(&self) -> WireMessage {
        match self {
            Self::Handoff(h) => {
                let mut msg = WireMessage::with_kind(tag::HANDOFF);
                msg.room = Some(h.room.to_string());
                msg.url = h.requester_url.clone();
                msg.page = (!h.page.is_empty()).then(|| h.page.clone());
                msg.session_id = h.session_id;
                msg.ts = Some(h.ts);
                msg
            }
            Self::SessionSaved(s) => {
                let mut msg = WireMessage::with_kind(tag::SESSION_SAVED);
                msg.session_id = s.session_id;
                msg.room = s.room.clone();
                msg.status = s.status;
                msg.session_type = s.session_type.clone();
                msg.session_note = s.session_note.clone();
                msg.created_at = s.created_at.clone();
                msg.ended_at = s.ended_at.clone();
                msg
            }
            Self::End { room, cause } => {
                let mut msg = WireMessage::with_kind(tag::END);
                msg.room = Some(room.to_string());
                msg.cause = *cause;
                msg
            }
            Self::Closed { room, cause } => {
                let mut msg = WireMessage::with_kind(tag::CLOSED);
                msg.room = Some(room.to_string());
                msg.cause = *cause;
                msg
            }
            Self::Release { room } => {
                let mut msg = WireMessage::with_kind(tag::RELEASE);
                msg.room = Some(room.to_string());
                msg
            }
        }
    }
}

impl TryFrom<WireMessage> for LobbyEvent {
    type Error = RelaydeskError;

    fn try_from(msg: WireMessage) -> Result<Self, RelaydeskError> {
        match msg.kind.as_deref() {
            Some(tag::HANDOFF) => Ok(Self::Handoff(HandoffRequest {
                room: msg.room_id()?,
                requester_url: msg.url,
                page: msg.page.unwrap_or_default(),
                session_id: msg.session_id,
                ts: msg.ts.unwrap_or_default(),
            })),
            Some(tag::SESSION_SAVED) => Ok(Self::SessionSaved(SessionSaved {
                session_id: msg.session_id,
                room: msg.room,
                status: msg.status,
                session_type: msg.session_type,
                session_note: msg.session_note,
                created_at: msg.created_at,
                ended_at: msg.ended_at,
            })),
            Some(tag::END) => Ok(Self::End {
                room: msg.room_id()?,
                cause: msg.cause,
            }),
            Some(tag::CLOSED) => Ok(Self::Closed {
                room: msg.room_id()?,
                cause: msg.cause,
            }),
            Some(tag::RELEASE) => Ok(Self::Release {
                room: msg.room_id()?,
            }),
            Some(other) => Err(RelaydeskError::Protocol {
                message: format!("unknown lobby frame type `{other}`"),
            }),
            None => Err(RelaydeskError::Protocol {
                message: "lobby frame without a type".into(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room_event(text: &str) -> Result<RoomEvent, RelaydeskError> {
        RoomEvent::try_from(WireMessage::decode(text)?)
    }

    fn lobby_event(text: &str) -> Result<LobbyEvent, RelaydeskError> {
        LobbyEvent::try_from(WireMessage::decode(text)?)
    }

    #[test]
    fn decode_rejects_non_objects() {
        assert!(matches!(
            WireMessage::decode("not json"),
            Err(RelaydeskError::Protocol { .. })
        ));
        assert!(WireMessage::decode("[1,2]").is_err());
        assert!(WireMessage::decode("\"hi\"").is_err());
    }

    #[test]
    fn wrongly_typed_fields_are_treated_as_absent() {
        let msg = WireMessage::decode(r#"{"text":"hi","ts":"soon","sender":"robot","page":7}"#)
            .unwrap();
        assert_eq!(msg.text.as_deref(), Some("hi"));
        assert_eq!(msg.ts, None);
        assert_eq!(msg.sender, None);
        assert_eq!(msg.page, None);
    }

    #[test]
    fn untyped_frame_is_chat() {
        let event = room_event(r#"{"sender":"operator","text":"hello","ts":5}"#).unwrap();
        match event {
            RoomEvent::Chat(chat) => {
                assert_eq!(chat.sender, Role::Operator);
                assert_eq!(chat.text, "hello");
                assert_eq!(chat.ts, 5);
            }
            other => panic!("expected chat, got {other:?}"),
        }
    }

    #[test]
    fn chat_keeps_unknown_fields_on_relay() {
        let event = room_event(r#"{"text":"hi","lang":"ko"}"#).unwrap();
        let wire = event.to_wire("r1");
        assert_eq!(wire.extra.get("lang"), Some(&Value::from("ko")));
        assert_eq!(wire.room.as_deref(), Some("r1"));
        assert_eq!(wire.kind, None);
    }

    #[test]
    fn chat_without_text_is_a_protocol_error() {
        assert!(matches!(
            room_event(r#"{"sender":"user"}"#),
            Err(RelaydeskError::Protocol { .. })
        ));
    }

    #[test]
    fn end_frame_carries_metadata() {
        let event = room_event(r#"{"type":"end","sender":"operator","session_type":"billing"}"#)
            .unwrap();
        let RoomEvent::End {
            sender, metadata, ..
        } = event
        else {
            panic!("expected end");
        };
        assert_eq!(sender, Role::Operator);
        assert_eq!(metadata.session_type, "billing");
        assert!(!metadata.is_empty());
    }

    #[test]
    fn unknown_room_type_is_rejected() {
        assert!(room_event(r#"{"type":"typing"}"#).is_err());
    }

    #[test]
    fn handoff_requires_a_valid_room() {
        let event = lobby_event(
            r#"{"type":"handoff","room":"r1","page":{"title":"Pricing","path":"/pricing"},"ts":10}"#,
        )
        .unwrap();
        let LobbyEvent::Handoff(handoff) = event else {
            panic!("expected handoff");
        };
        assert_eq!(handoff.room.as_str(), "r1");
        assert_eq!(handoff.page.title.as_deref(), Some("Pricing"));
        assert_eq!(handoff.ts, 10);

        assert!(lobby_event(r#"{"type":"handoff"}"#).is_err());
        assert!(lobby_event(r#"{"type":"handoff","room":"master"}"#).is_err());
    }

    #[test]
    fn lobby_lifecycle_echoes_round_trip_through_wire() {
        let room = RoomId::parse("r9").unwrap();
        let events = [
            LobbyEvent::End {
                room: room.clone(),
                cause: Some(EndCause::Network),
            },
            LobbyEvent::Closed {
                room: room.clone(),
                cause: None,
            },
            LobbyEvent::Release { room: room.clone() },
        ];
        for event in events {
            let text = event.to_wire().encode().unwrap();
            assert_eq!(lobby_event(&text).unwrap(), event);
        }
    }

    #[test]
    fn session_saved_accepts_bare_acknowledgement() {
        let event = lobby_event(r#"{"type":"session_saved"}"#).unwrap();
        assert_eq!(event, LobbyEvent::SessionSaved(SessionSaved::default()));
        assert_eq!(event.room(), None);
    }

    #[test]
    fn error_frame_is_addressed_from_system() {
        let wire = RoomEvent::error("session_ended", "chat is closed").to_wire("r1");
        assert_eq!(wire.kind.as_deref(), Some(tag::ERROR));
        assert_eq!(wire.sender, Some(Role::System));
        assert_eq!(wire.code.as_deref(), Some("session_ended"));
    }
}
