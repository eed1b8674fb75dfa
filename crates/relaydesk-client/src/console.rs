// SPDX-FileCopyrightText: 2026 Relaydesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Operator console state.
//!
//! The pending list is rebuilt purely from lobby events and tolerates
//! duplicates and reordering: a handoff is an upsert keyed by room where the
//! newer timestamp wins, and lifecycle echoes delete by room. The console
//! also tracks the one room the operator is in and refuses to move on while
//! an ended session is still unsaved.

use std::collections::HashMap;

use relaydesk_core::types::now_millis;
use relaydesk_core::{
    EndCause, EndMetadata, HandoffRequest, LobbyEvent, PolicyViolation, Role, RoomEvent, RoomId,
    RoomState, SaveSession, SessionId, WireMessage,
};
use tracing::{debug, info, warn};

/// What the console UI should do after an event was applied.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleAction {
    Nothing,
    /// The pending list changed; re-render it.
    PendingChanged,
    /// A session was saved somewhere; re-fetch the recent list.
    RefreshHistory,
    RoomState(RoomState),
    Chat { sender: Role, text: String },
    /// The current room ended and now needs its metadata saved.
    NeedsSave { room: RoomId, cause: Option<EndCause> },
    Rejected { code: String, text: String },
}

#[derive(Debug, Clone)]
struct CurrentRoom {
    room: RoomId,
    session_id: Option<SessionId>,
    state: RoomState,
    end_cause: Option<EndCause>,
}

#[derive(Debug, Default)]
pub struct OperatorConsole {
    pending: HashMap<RoomId, HandoffRequest>,
    current: Option<CurrentRoom>,
    require_end_metadata: bool,
}

impl OperatorConsole {
    pub fn new(require_end_metadata: bool) -> Self {
        Self {
            require_end_metadata,
            ..Default::default()
        }
    }

    /// Waiting handoffs, oldest first.
    pub fn pending(&self) -> Vec<&HandoffRequest> {
        let mut list: Vec<_> = self.pending.values().collect();
        list.sort_by(|a, b| a.ts.cmp(&b.ts).then_with(|| a.room.cmp(&b.room)));
        list
    }

    pub fn current_room(&self) -> Option<&RoomId> {
        self.current.as_ref().map(|c| &c.room)
    }

    pub fn room_state(&self) -> Option<RoomState> {
        self.current.as_ref().map(|c| c.state)
    }

    /// True while the current room has ended and has not been saved.
    pub fn needs_save(&self) -> bool {
        self.current
            .as_ref()
            .is_some_and(|c| c.state == RoomState::Ended)
    }

    /// Applies a lobby frame. Frames that do not decode are dropped.
    pub fn apply_lobby(&mut self, msg: WireMessage) -> ConsoleAction {
        match LobbyEvent::try_from(msg) {
            Ok(event) => self.apply_lobby_event(event),
            Err(e) => {
                warn!(error = %e, "ignoring lobby frame");
                ConsoleAction::Nothing
            }
        }
    }

    pub fn apply_lobby_event(&mut self, event: LobbyEvent) -> ConsoleAction {
        match event {
            LobbyEvent::Handoff(request) => {
                if self.current_room() == Some(&request.room) {
                    return ConsoleAction::Nothing;
                }
                if let Some(existing) = self.pending.get(&request.room) {
                    if existing.ts > request.ts {
                        debug!(room = %request.room, "stale handoff ignored");
                        return ConsoleAction::Nothing;
                    }
                }
                self.pending.insert(request.room.clone(), request);
                ConsoleAction::PendingChanged
            }
            LobbyEvent::SessionSaved(_) => ConsoleAction::RefreshHistory,
            LobbyEvent::End { room, cause } | LobbyEvent::Closed { room, cause } => {
                let removed = self.pending.remove(&room).is_some();
                if let Some(action) = self.end_current(&room, cause) {
                    return action;
                }
                if removed {
                    ConsoleAction::PendingChanged
                } else {
                    ConsoleAction::Nothing
                }
            }
            LobbyEvent::Release { room } => {
                if self.pending.remove(&room).is_some() {
                    ConsoleAction::PendingChanged
                } else {
                    ConsoleAction::Nothing
                }
            }
        }
    }

    /// Takes a pending room. Refused while the previous session is unsaved.
    ///
    /// Returns the room socket path to open.
    pub fn join(&mut self, room: &RoomId) -> Result<String, PolicyViolation> {
        if let Some(current) = self.current.as_ref().filter(|c| c.state == RoomState::Ended) {
            return Err(PolicyViolation::UnsavedSession {
                room: current.room.to_string(),
            });
        }
        let session_id = self.pending.remove(room).and_then(|h| h.session_id);
        info!(room = %room, "operator joining room");
        self.current = Some(CurrentRoom {
            room: room.clone(),
            session_id,
            state: RoomState::Waiting,
            end_cause: None,
        });
        Ok(format!("/chat/{room}"))
    }

    /// Drops an unsaved session without saving it.
    pub fn abandon(&mut self) -> Option<RoomId> {
        let current = self.current.take()?;
        warn!(room = %current.room, "session abandoned without saving");
        Some(current.room)
    }

    /// Applies a frame received on the current room connection.
    pub fn apply_room(&mut self, msg: WireMessage) -> ConsoleAction {
        let event = match RoomEvent::try_from(msg) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "ignoring room frame");
                return ConsoleAction::Nothing;
            }
        };
        let Some(current) = self.current.as_mut() else {
            return ConsoleAction::Nothing;
        };
        match event {
            RoomEvent::Chat(chat) => ConsoleAction::Chat {
                sender: chat.sender,
                text: chat.text,
            },
            RoomEvent::State { state, .. } => {
                if current.state != RoomState::Ended {
                    current.state = state;
                }
                ConsoleAction::RoomState(current.state)
            }
            RoomEvent::End { sender, cause, .. } | RoomEvent::Closed { sender, cause, .. } => {
                let room = current.room.clone();
                let cause = cause.or(Some(EndCause::from_role(sender)));
                self.end_current(&room, cause)
                    .unwrap_or(ConsoleAction::Nothing)
            }
            RoomEvent::Error { code, text } => ConsoleAction::Rejected { code, text },
        }
    }

    /// Builds a chat frame for the current room.
    pub fn chat(&self, text: impl Into<String>) -> Result<WireMessage, PolicyViolation> {
        let current = self.live_room()?;
        Ok(WireMessage {
            sender: Some(Role::Operator),
            room: Some(current.room.to_string()),
            text: Some(text.into()),
            ts: Some(now_millis()),
            ..Default::default()
        })
    }

    /// Builds the operator's end signal. Metadata is required when the
    /// console is configured to require it.
    pub fn end(&mut self, metadata: EndMetadata) -> Result<WireMessage, PolicyViolation> {
        if self.require_end_metadata && metadata.is_empty() {
            return Err(PolicyViolation::EndMetadataRequired);
        }
        let room = self.live_room()?.room.clone();
        Ok(RoomEvent::End {
            sender: Role::Operator,
            metadata,
            cause: None,
            ts: now_millis(),
        }
        .to_wire(room.as_str()))
    }

    /// The save request for the ended current room.
    pub fn save_request(&self, metadata: EndMetadata) -> Result<SaveSession, PolicyViolation> {
        if self.require_end_metadata && metadata.is_empty() {
            return Err(PolicyViolation::EndMetadataRequired);
        }
        let current = self
            .current
            .as_ref()
            .filter(|c| c.state == RoomState::Ended)
            .ok_or(PolicyViolation::SessionNotEnded)?;
        Ok(SaveSession {
            session_id: current.session_id,
            room: Some(current.room.to_string()),
            metadata,
            end_cause: current.end_cause,
        })
    }

    /// Clears the current room after a successful save.
    pub fn mark_saved(&mut self) {
        if let Some(current) = self.current.take() {
            info!(room = %current.room, "session saved");
        }
    }

    fn live_room(&self) -> Result<&CurrentRoom, PolicyViolation> {
        let current = self.current.as_ref().ok_or_else(|| PolicyViolation::NotPermitted {
            action: "send without joining a room".into(),
        })?;
        if current.state == RoomState::Ended {
            return Err(PolicyViolation::SessionEnded);
        }
        Ok(current)
    }

    fn end_current(&mut self, room: &RoomId, cause: Option<EndCause>) -> Option<ConsoleAction> {
        let current = self.current.as_mut().filter(|c| &c.room == room)?;
        if current.state != RoomState::Ended {
            current.state = RoomState::Ended;
            current.end_cause = cause;
            info!(room = %room, cause = ?cause, "room ended; needs save");
        }
        Some(ConsoleAction::NeedsSave {
            room: room.clone(),
            cause: current.end_cause,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaydesk_core::PageInfo;

    fn room(id: &str) -> RoomId {
        RoomId::parse(id).unwrap()
    }

    fn handoff(id: &str, ts: i64, path: &str) -> LobbyEvent {
        LobbyEvent::Handoff(HandoffRequest {
            room: room(id),
            requester_url: None,
            page: PageInfo {
                title: None,
                path: Some(path.into()),
            },
            session_id: None,
            ts,
        })
    }

    fn meta(kind: &str) -> EndMetadata {
        EndMetadata {
            session_type: kind.into(),
            ..Default::default()
        }
    }

    fn frame(json: &str) -> WireMessage {
        WireMessage::decode(json).unwrap()
    }

    #[test]
    fn handoffs_upsert_with_newer_timestamp_winning() {
        let mut console = OperatorConsole::new(true);
        assert_eq!(
            console.apply_lobby_event(handoff("r1", 10, "/a")),
            ConsoleAction::PendingChanged
        );
        console.apply_lobby_event(handoff("r1", 20, "/b"));
        assert_eq!(
            console.apply_lobby_event(handoff("r1", 15, "/stale")),
            ConsoleAction::Nothing
        );
        console.apply_lobby_event(handoff("r2", 5, "/c"));

        let pending = console.pending();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].room.as_str(), "r2");
        assert_eq!(pending[1].page.path.as_deref(), Some("/b"));
    }

    #[test]
    fn lifecycle_echoes_delete_by_room() {
        let mut console = OperatorConsole::new(true);
        console.apply_lobby_event(handoff("r1", 1, "/"));
        console.apply_lobby_event(handoff("r2", 2, "/"));
        console.apply_lobby_event(handoff("r3", 3, "/"));

        console.apply_lobby(frame(r#"{"type":"end","room":"r1","cause":"network"}"#));
        console.apply_lobby(frame(r#"{"type":"closed","room":"r2"}"#));
        console.apply_lobby(frame(r#"{"type":"release","room":"r3"}"#));
        assert!(console.pending().is_empty());

        // Deleting twice is harmless.
        assert_eq!(
            console.apply_lobby(frame(r#"{"type":"release","room":"r3"}"#)),
            ConsoleAction::Nothing
        );
    }

    #[test]
    fn session_saved_requests_refresh() {
        let mut console = OperatorConsole::new(true);
        assert_eq!(
            console.apply_lobby(frame(r#"{"type":"session_saved"}"#)),
            ConsoleAction::RefreshHistory
        );
    }

    #[test]
    fn end_requires_metadata() {
        let mut console = OperatorConsole::new(true);
        console.join(&room("r1")).unwrap();
        assert_eq!(
            console.end(EndMetadata::default()),
            Err(PolicyViolation::EndMetadataRequired)
        );
        let msg = console.end(meta("billing")).unwrap();
        assert_eq!(msg.kind.as_deref(), Some("end"));
        assert_eq!(msg.session_type.as_deref(), Some("billing"));
        assert_eq!(msg.sender, Some(Role::Operator));
    }

    #[test]
    fn ended_room_blocks_next_join_until_saved() {
        let mut console = OperatorConsole::new(true);
        console.apply_lobby_event(handoff("r1", 1, "/"));
        assert_eq!(console.join(&room("r1")).unwrap(), "/chat/r1");
        assert!(console.pending().is_empty());
        assert_eq!(
            console.save_request(meta("x")),
            Err(PolicyViolation::SessionNotEnded)
        );

        let action = console.apply_room(frame(
            r#"{"type":"closed","sender":"system","room":"r1","cause":"network"}"#,
        ));
        assert_eq!(
            action,
            ConsoleAction::NeedsSave {
                room: room("r1"),
                cause: Some(EndCause::Network)
            }
        );
        assert!(console.needs_save());
        assert_eq!(console.chat("hello?"), Err(PolicyViolation::SessionEnded));
        assert!(matches!(
            console.join(&room("r2")),
            Err(PolicyViolation::UnsavedSession { room }) if room == "r1"
        ));

        let save = console.save_request(meta("billing")).unwrap();
        assert_eq!(save.room.as_deref(), Some("r1"));
        assert_eq!(save.end_cause, Some(EndCause::Network));
        console.mark_saved();
        assert!(!console.needs_save());
        assert!(console.join(&room("r2")).is_ok());
    }

    #[test]
    fn lobby_end_for_current_room_raises_needs_save() {
        let mut console = OperatorConsole::new(false);
        console.join(&room("r1")).unwrap();
        console.apply_room(frame(r#"{"type":"state","room":"r1","state":"active"}"#));
        let action = console.apply_lobby(frame(r#"{"type":"end","room":"r1","cause":"user"}"#));
        assert!(matches!(action, ConsoleAction::NeedsSave { .. }));
        assert_eq!(console.room_state(), Some(RoomState::Ended));
    }

    #[test]
    fn abandon_releases_the_gate() {
        let mut console = OperatorConsole::new(true);
        console.join(&room("r1")).unwrap();
        console.apply_room(frame(r#"{"type":"end","sender":"user","room":"r1"}"#));
        assert!(console.needs_save());
        assert_eq!(console.abandon(), Some(room("r1")));
        assert!(console.join(&room("r2")).is_ok());
    }
}
