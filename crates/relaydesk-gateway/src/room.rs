// SPDX-FileCopyrightText: 2026 Relaydesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A single room: its members, session state, and handoff details.
//!
//! A `Room` is only ever touched while its registry mutex is held.

use std::time::{Duration, Instant};

use relaydesk_core::types::now_millis;
use relaydesk_core::{
    HandoffRequest, Role, RoomEvent, RoomId, RoomState, SessionId, SessionMachine, Transition,
    WireMessage,
};
use uuid::Uuid;

use crate::connection::ConnectionHandle;

#[derive(Debug)]
pub struct Room {
    id: RoomId,
    members: Vec<ConnectionHandle>,
    pub(crate) machine: SessionMachine,
    pub(crate) handoff: Option<HandoffRequest>,
    pub(crate) session_id: Option<SessionId>,
    created_at: i64,
    ended_at: Option<i64>,
    empty_since: Option<Instant>,
    /// Set by the sweeper when the room is dropped from the registry.
    pub(crate) retired: bool,
}

/// Read-only view of a room for HTTP handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSnapshot {
    pub room: RoomId,
    pub state: RoomState,
    pub users: usize,
    pub operators: usize,
    pub needs_save: bool,
    pub end_cause: Option<relaydesk_core::EndCause>,
    pub session_id: Option<SessionId>,
    pub created_at: i64,
    pub ended_at: Option<i64>,
}

impl Room {
    pub fn new(id: RoomId) -> Self {
        Self {
            id,
            members: Vec::new(),
            machine: SessionMachine::new(),
            handoff: None,
            session_id: None,
            created_at: now_millis(),
            ended_at: None,
            empty_since: Some(Instant::now()),
            retired: false,
        }
    }

    pub fn id(&self) -> &RoomId {
        &self.id
    }

    pub fn state(&self) -> RoomState {
        self.machine.state()
    }

    pub fn count(&self, role: Role) -> usize {
        self.members.iter().filter(|m| m.role() == role).count()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// True once the room has had no members for at least `grace`.
    pub fn is_idle(&self, now: Instant, grace: Duration) -> bool {
        self.empty_since
            .is_some_and(|since| now.saturating_duration_since(since) >= grace)
    }

    /// Whether the room ever reached Active.
    pub fn was_activated(&self) -> bool {
        self.machine.state() != RoomState::Waiting
    }

    /// Adds a member and re-evaluates activation.
    pub fn add(&mut self, handle: ConnectionHandle) -> Transition {
        self.members.push(handle);
        self.empty_since = None;
        self.machine
            .on_join(self.count(Role::User) > 0, self.count(Role::Operator) > 0)
    }

    /// Removes a member by id, returning it if present.
    pub fn remove(&mut self, id: Uuid) -> Option<ConnectionHandle> {
        let pos = self.members.iter().position(|m| m.id() == id)?;
        let handle = self.members.remove(pos);
        if self.members.is_empty() {
            self.empty_since = Some(Instant::now());
        }
        Some(handle)
    }

    /// Records the end timestamp the first time the room ends.
    pub(crate) fn stamp_end(&mut self) {
        if self.ended_at.is_none() {
            self.ended_at = Some(now_millis());
        }
    }

    /// Delivers a frame to every member. Members whose queue rejected it are
    /// removed and returned so the caller can treat them as having left.
    pub fn broadcast(&mut self, msg: &WireMessage) -> Vec<ConnectionHandle> {
        let text = match msg.encode() {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(room = %self.id, error = %e, "failed to encode broadcast");
                return Vec::new();
            }
        };
        let (alive, dead): (Vec<_>, Vec<_>) = std::mem::take(&mut self.members)
            .into_iter()
            .partition(|m| m.deliver(&text));
        self.members = alive;
        if self.members.is_empty() && !dead.is_empty() {
            self.empty_since = Some(Instant::now());
        }
        dead
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.members.iter().any(|m| m.id() == id)
    }

    /// Delivers a room event to a single member. A member whose queue
    /// rejects it is removed and returned, like [`Room::broadcast`].
    pub fn send_to(&mut self, id: Uuid, event: &RoomEvent) -> Vec<ConnectionHandle> {
        let msg = event.to_wire(self.id.as_str());
        let delivered = self
            .members
            .iter()
            .find(|m| m.id() == id)
            .is_none_or(|m| m.deliver_msg(&msg));
        if delivered {
            return Vec::new();
        }
        self.remove(id).into_iter().collect()
    }

    pub fn state_event(&self) -> RoomEvent {
        RoomEvent::State {
            room: self.id.to_string(),
            state: self.state(),
        }
    }

    pub fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            room: self.id.clone(),
            state: self.state(),
            users: self.count(Role::User),
            operators: self.count(Role::Operator),
            needs_save: self.machine.needs_save(),
            end_cause: self.machine.end_cause(),
            session_id: self.session_id,
            created_at: self.created_at,
            ended_at: self.ended_at,
        }
    }
}
