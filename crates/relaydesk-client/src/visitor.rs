// SPDX-FileCopyrightText: 2026 Relaydesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-visitor chat state.
//!
//! One [`VisitorSession`] exists per browser visitor. Every room and lobby
//! event is applied to it explicitly; nothing is kept in shared globals.

use relaydesk_core::types::now_millis;
use relaydesk_core::{
    EndCause, EndMetadata, HandoffRequest, LobbyEvent, PageInfo, PolicyViolation, Role, RoomEvent,
    RoomId, RoomState, SessionId, WireMessage,
};
use tracing::{debug, warn};

/// What the visitor UI should do after a frame was applied.
#[derive(Debug, Clone, PartialEq)]
pub enum VisitorUpdate {
    Nothing,
    Chat { sender: Role, text: String },
    State(RoomState),
    Ended(Option<EndCause>),
    Rejected { code: String, text: String },
}

#[derive(Debug, Clone)]
pub struct VisitorSession {
    room: RoomId,
    page: PageInfo,
    requester_url: Option<String>,
    session_id: Option<SessionId>,
    handoff_sent: bool,
    state: RoomState,
    end_cause: Option<EndCause>,
}

impl VisitorSession {
    pub fn new(room: RoomId, page: PageInfo, requester_url: Option<String>) -> Self {
        Self {
            room,
            page,
            requester_url,
            session_id: None,
            handoff_sent: false,
            state: RoomState::Waiting,
            end_cause: None,
        }
    }

    pub fn room(&self) -> &RoomId {
        &self.room
    }

    pub fn state(&self) -> RoomState {
        self.state
    }

    pub fn is_ended(&self) -> bool {
        self.state == RoomState::Ended
    }

    pub fn end_cause(&self) -> Option<EndCause> {
        self.end_cause
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.session_id
    }

    /// Records the id returned by `POST /livechat/request`.
    pub fn set_session_id(&mut self, id: SessionId) {
        self.session_id = Some(id);
    }

    pub fn handoff_sent(&self) -> bool {
        self.handoff_sent
    }

    /// The lobby `handoff` frame for this visitor.
    pub fn handoff_frame(&self) -> WireMessage {
        LobbyEvent::Handoff(HandoffRequest {
            room: self.room.clone(),
            requester_url: self.requester_url.clone(),
            page: self.page.clone(),
            session_id: self.session_id,
            ts: now_millis(),
        })
        .to_wire()
    }

    /// Returns the handoff frame the first time only.
    pub fn take_handoff(&mut self) -> Option<WireMessage> {
        if self.handoff_sent {
            return None;
        }
        self.handoff_sent = true;
        Some(self.handoff_frame())
    }

    /// Builds a chat frame. Refused once the room has ended.
    pub fn chat(&self, text: impl Into<String>) -> Result<WireMessage, PolicyViolation> {
        if self.is_ended() {
            return Err(PolicyViolation::SessionEnded);
        }
        Ok(WireMessage {
            sender: Some(Role::User),
            room: Some(self.room.to_string()),
            text: Some(text.into()),
            ts: Some(now_millis()),
            ..Default::default()
        })
    }

    /// Builds the visitor's own end signal and marks the session ended.
    pub fn end(&mut self) -> Result<WireMessage, PolicyViolation> {
        if self.is_ended() {
            return Err(PolicyViolation::SessionEnded);
        }
        self.state = RoomState::Ended;
        self.end_cause = Some(EndCause::User);
        Ok(RoomEvent::End {
            sender: Role::User,
            metadata: EndMetadata::default(),
            cause: None,
            ts: now_millis(),
        }
        .to_wire(self.room.as_str()))
    }

    /// Applies a frame received on the room connection.
    pub fn apply(&mut self, msg: WireMessage) -> VisitorUpdate {
        let event = match RoomEvent::try_from(msg) {
            Ok(event) => event,
            Err(e) => {
                warn!(room = %self.room, error = %e, "ignoring room frame");
                return VisitorUpdate::Nothing;
            }
        };
        match event {
            RoomEvent::Chat(chat) => VisitorUpdate::Chat {
                sender: chat.sender,
                text: chat.text,
            },
            RoomEvent::State { state, .. } => {
                // A reconnect into an ended room shows the final state; it never revives chat.
                if self.state != RoomState::Ended {
                    self.state = state;
                }
                VisitorUpdate::State(self.state)
            }
            RoomEvent::End { sender, cause, .. } | RoomEvent::Closed { sender, cause, .. } => {
                let was_ended = self.is_ended();
                self.state = RoomState::Ended;
                if self.end_cause.is_none() {
                    self.end_cause = cause.or(Some(EndCause::from_role(sender)));
                }
                if was_ended {
                    debug!(room = %self.room, "end notice for a session already ended");
                }
                VisitorUpdate::Ended(self.end_cause)
            }
            RoomEvent::Error { code, text } => VisitorUpdate::Rejected { code, text },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> VisitorSession {
        VisitorSession::new(
            RoomId::parse("r1").unwrap(),
            PageInfo {
                title: Some("Pricing".into()),
                path: Some("/pricing".into()),
            },
            Some("https://example.test/pricing".into()),
        )
    }

    fn frame(json: &str) -> WireMessage {
        WireMessage::decode(json).unwrap()
    }

    #[test]
    fn handoff_is_one_shot() {
        let mut s = session();
        s.set_session_id(SessionId(7));
        let first = s.take_handoff().unwrap();
        assert_eq!(first.kind.as_deref(), Some("handoff"));
        assert_eq!(first.room.as_deref(), Some("r1"));
        assert_eq!(first.session_id, Some(SessionId(7)));
        assert_eq!(first.page.as_ref().and_then(|p| p.path.as_deref()), Some("/pricing"));
        assert!(s.take_handoff().is_none());
        assert!(s.handoff_sent());
    }

    #[test]
    fn state_frames_drive_the_session() {
        let mut s = session();
        let update = s.apply(frame(r#"{"type":"state","room":"r1","state":"active"}"#));
        assert_eq!(update, VisitorUpdate::State(RoomState::Active));
        assert_eq!(s.state(), RoomState::Active);
    }

    #[test]
    fn operator_end_blocks_further_sends() {
        let mut s = session();
        s.apply(frame(r#"{"type":"state","room":"r1","state":"active"}"#));
        assert!(s.chat("hi").is_ok());

        let update = s.apply(frame(
            r#"{"type":"end","sender":"operator","room":"r1","session_type":"billing"}"#,
        ));
        assert_eq!(update, VisitorUpdate::Ended(Some(EndCause::Operator)));
        assert_eq!(s.chat("still there?"), Err(PolicyViolation::SessionEnded));
        assert!(s.end().is_err());
    }

    #[test]
    fn ended_state_is_not_revived_by_reconnect_snapshot() {
        let mut s = session();
        s.end().unwrap();
        s.apply(frame(r#"{"type":"state","room":"r1","state":"active"}"#));
        assert!(s.is_ended());
        assert_eq!(s.end_cause(), Some(EndCause::User));
    }

    #[test]
    fn rejection_is_surfaced() {
        let mut s = session();
        let update = s.apply(frame(
            r#"{"type":"error","sender":"system","code":"session_ended","text":"ended"}"#,
        ));
        assert!(matches!(update, VisitorUpdate::Rejected { code, .. } if code == "session_ended"));
    }

    #[test]
    fn malformed_frames_are_ignored() {
        let mut s = session();
        assert_eq!(s.apply(frame(r#"{"type":"bogus"}"#)), VisitorUpdate::Nothing);
    }
}
