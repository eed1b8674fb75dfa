// SPDX-FileCopyrightText: 2026 Relaydesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Process-wide room registry.
//!
//! Each room sits behind its own async mutex. `join`, `leave`, relays, and
//! state transitions for a room all run under that lock, so a broadcast sees
//! a consistent member set and relays from one connection keep their order.
//! Storage is never awaited under the lock; lifecycle writes go through the
//! [`PersistQueue`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use relaydesk_config::model::ChatConfig;
use relaydesk_core::protocol::close;
use relaydesk_core::types::now_millis;
use relaydesk_core::{
    EndCause, EndMetadata, EndOutcome, HandoffRequest, LobbyEvent, PolicyViolation,
    RelaydeskError, Role, RoomEvent, RoomId, RoomState, SessionId, Transition,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::connection::ConnectionHandle;
use crate::lobby::Lobby;
use crate::persist::{PersistQueue, StoreCommand};
use crate::room::{Room, RoomSnapshot};

type RoomEntry = Arc<Mutex<Room>>;

pub struct RoomRegistry {
    rooms: DashMap<RoomId, RoomEntry>,
    lobby: Arc<Lobby>,
    persist: PersistQueue,
    require_end_metadata: bool,
    max_rooms: usize,
    grace: Duration,
}

impl std::fmt::Debug for RoomRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomRegistry")
            .field("rooms", &self.rooms.len())
            .field("require_end_metadata", &self.require_end_metadata)
            .field("max_rooms", &self.max_rooms)
            .field("grace", &self.grace)
            .finish()
    }
}

impl RoomRegistry {
    pub fn new(lobby: Arc<Lobby>, persist: PersistQueue, chat: &ChatConfig) -> Self {
        Self {
            rooms: DashMap::new(),
            lobby,
            persist,
            require_end_metadata: chat.require_end_metadata,
            max_rooms: chat.max_rooms,
            grace: Duration::from_secs(chat.room_grace_secs),
        }
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    fn existing(&self, id: &RoomId) -> Option<RoomEntry> {
        self.rooms.get(id).map(|entry| entry.value().clone())
    }

    /// Gets or creates the room entry. Refuses new rooms once the table is full.
    fn entry(&self, id: &RoomId) -> Result<RoomEntry, RelaydeskError> {
        if let Some(room) = self.existing(id) {
            return Ok(room);
        }
        if self.rooms.len() >= self.max_rooms {
            return Err(PolicyViolation::NotPermitted {
                action: format!("open room `{id}` while {} rooms are live", self.max_rooms),
            }
            .into());
        }
        let entry = self.rooms.entry(id.clone()).or_insert_with(|| {
            info!(room = %id, "room created");
            Arc::new(Mutex::new(Room::new(id.clone())))
        });
        Ok(entry.value().clone())
    }

    /// Adds a connection to a room and returns the room's state afterwards.
    ///
    /// The joiner always receives a `state` snapshot. When the join activates
    /// the room every member receives it instead.
    pub async fn join(
        &self,
        id: &RoomId,
        handle: ConnectionHandle,
    ) -> Result<RoomState, RelaydeskError> {
        loop {
            let entry = self.entry(id)?;
            let mut room = entry.lock().await;
            if room.retired {
                continue;
            }
            let conn = handle.id();
            let role = handle.role();
            let transition = room.add(handle.clone());
            info!(room = %id, conn = %conn, role = %role, state = %room.state(), "joined room");

            let snapshot = room.state_event();
            if transition == Transition::Activated {
                info!(room = %id, "room active");
                self.persist.enqueue(StoreCommand::Connected(id.clone()));
                let dead = room.broadcast(&snapshot.to_wire(id.as_str()));
                self.reap(&mut room, dead);
            } else {
                let dead = room.send_to(conn, &snapshot);
                self.reap(&mut room, dead);
            }
            return Ok(room.state());
        }
    }

    /// Removes a connection. `clean` is true only for a close code of 1000.
    pub async fn leave(&self, id: &RoomId, conn: Uuid, clean: bool) {
        let Some(entry) = self.existing(id) else {
            return;
        };
        let mut room = entry.lock().await;
        let Some(handle) = room.remove(conn) else {
            return;
        };
        info!(room = %id, conn = %conn, role = %handle.role(), clean, "left room");
        let dead = self.after_departure(&mut room, handle.role(), clean);
        self.reap(&mut room, dead);
    }

    /// Applies one inbound frame from a room member.
    pub async fn dispatch(&self, id: &RoomId, from: &ConnectionHandle, event: RoomEvent) {
        let Some(entry) = self.existing(id) else {
            return;
        };
        let mut room = entry.lock().await;
        if !room.contains(from.id()) {
            debug!(room = %id, conn = %from.id(), "ignoring frame from non-member");
            return;
        }
        let dead = match event {
            RoomEvent::Chat(chat) => match room.machine.admit_chat() {
                Ok(()) => {
                    debug!(room = %id, sender = %chat.sender, "relay chat");
                    room.broadcast(&RoomEvent::Chat(chat).to_wire(id.as_str()))
                }
                Err(violation) => {
                    debug!(room = %id, conn = %from.id(), "chat after end rejected");
                    reject(&mut room, from, &violation)
                }
            },
            RoomEvent::End {
                sender,
                metadata,
                ts,
                ..
            } => match room.machine.end(sender, &metadata, self.require_end_metadata) {
                Ok(EndOutcome::Ended(cause)) => {
                    self.announce_end(&mut room, sender, metadata, cause, ts)
                }
                Ok(EndOutcome::AlreadyEnded(cause)) => {
                    room.send_to(from.id(), &end_confirmation(cause))
                }
                Err(violation) => {
                    warn!(room = %id, conn = %from.id(), error = %violation, "end rejected");
                    reject(&mut room, from, &violation)
                }
            },
            RoomEvent::Closed { sender, ts, .. } => self.apply_closed(&mut room, from, sender, ts),
            RoomEvent::State { .. } | RoomEvent::Error { .. } => {
                debug!(room = %id, conn = %from.id(), "ignoring server-only frame from client");
                Vec::new()
            }
        };
        self.reap(&mut room, dead);
    }

    /// Ends a room on behalf of an operator outside any socket.
    pub async fn end_room(
        &self,
        id: &RoomId,
        metadata: EndMetadata,
    ) -> Result<EndCause, RelaydeskError> {
        let entry = self.existing(id).ok_or_else(|| RelaydeskError::NotFound {
            kind: "room",
            id: id.to_string(),
        })?;
        let mut room = entry.lock().await;
        match room
            .machine
            .end(Role::Operator, &metadata, self.require_end_metadata)?
        {
            EndOutcome::Ended(cause) => {
                let dead = self.announce_end(&mut room, Role::Operator, metadata, cause, now_millis());
                self.reap(&mut room, dead);
                Ok(cause)
            }
            EndOutcome::AlreadyEnded(cause) => Ok(cause),
        }
    }

    /// Records a lobby handoff against its room, creating the room if needed.
    ///
    /// A handoff for an ended room with nobody connected starts a fresh room.
    pub async fn register_handoff(&self, handoff: &HandoffRequest) -> Result<(), RelaydeskError> {
        self.prepare(&handoff.room, |room| {
            if handoff.session_id.is_some() {
                room.session_id = handoff.session_id;
            }
            room.handoff = Some(handoff.clone());
        })
        .await
    }

    /// Binds a stored session record to a room, creating the room if needed.
    pub async fn attach_session(&self, id: &RoomId, session_id: SessionId) -> Result<(), RelaydeskError> {
        self.prepare(id, |room| room.session_id = Some(session_id))
            .await
    }

    async fn prepare(
        &self,
        id: &RoomId,
        apply: impl FnOnce(&mut Room),
    ) -> Result<(), RelaydeskError> {
        loop {
            let entry = self.entry(id)?;
            let mut room = entry.lock().await;
            if room.retired {
                continue;
            }
            if room.machine.is_ended() && room.is_empty() {
                room.retired = true;
                self.rooms.remove_if(id, |_, current| Arc::ptr_eq(current, &entry));
                info!(room = %id, "replacing ended room for a new request");
                continue;
            }
            apply(&mut *room);
            return Ok(());
        }
    }

    /// Handoffs for rooms still waiting for an operator.
    pub async fn waiting_handoffs(&self) -> Vec<HandoffRequest> {
        let entries: Vec<RoomEntry> = self.rooms.iter().map(|e| e.value().clone()).collect();
        let mut pending = Vec::new();
        for entry in entries {
            let room = entry.lock().await;
            let waiting = room.state() == RoomState::Waiting;
            if let Some(handoff) = room.handoff.as_ref().filter(|_| waiting) {
                pending.push(handoff.clone());
            }
        }
        pending.sort_by_key(|h| h.ts);
        pending
    }

    pub async fn mark_saved(&self, id: &RoomId) {
        if let Some(entry) = self.existing(id) {
            entry.lock().await.machine.mark_saved();
        }
    }

    pub async fn snapshot(&self, id: &RoomId) -> Option<RoomSnapshot> {
        let entry = self.existing(id)?;
        let room = entry.lock().await;
        Some(room.snapshot())
    }

    /// Drops rooms that have had no connections for the grace period.
    ///
    /// Rooms currently locked are skipped until the next sweep. Returns the
    /// number of rooms removed.
    pub fn sweep_idle(&self, now: Instant) -> usize {
        let keys: Vec<RoomId> = self.rooms.iter().map(|e| e.key().clone()).collect();
        let mut removed = 0;
        for key in keys {
            let mut never_active = false;
            let mut unsaved = false;
            let gone = self.rooms.remove_if(&key, |_, entry| {
                let Ok(mut room) = entry.try_lock() else {
                    return false;
                };
                if !room.is_idle(now, self.grace) {
                    return false;
                }
                room.retired = true;
                never_active = !room.was_activated();
                unsaved = room.machine.needs_save();
                true
            });
            if gone.is_none() {
                continue;
            }
            removed += 1;
            if unsaved {
                warn!(room = %key, "swept room with an unsaved session");
            } else {
                info!(room = %key, "room swept");
            }
            if never_active {
                self.lobby.publish(&LobbyEvent::Release { room: key });
            }
        }
        removed
    }

    /// Handles the ending of a room by an explicit end signal.
    fn announce_end(
        &self,
        room: &mut Room,
        sender: Role,
        metadata: EndMetadata,
        cause: EndCause,
        ts: i64,
    ) -> Vec<ConnectionHandle> {
        let id = room.id().clone();
        room.stamp_end();
        info!(room = %id, cause = %cause, "room ended");
        self.persist.enqueue(StoreCommand::Ended(id.clone(), cause));
        self.lobby.publish(&LobbyEvent::End {
            room: id.clone(),
            cause: Some(cause),
        });
        let end = RoomEvent::End {
            sender,
            metadata,
            cause: Some(cause),
            ts,
        };
        room.broadcast(&end.to_wire(id.as_str()))
    }

    fn apply_closed(
        &self,
        room: &mut Room,
        from: &ConnectionHandle,
        sender: Role,
        ts: i64,
    ) -> Vec<ConnectionHandle> {
        let id = room.id().clone();
        if room.machine.is_ended() {
            if room.machine.take_closing_notice() {
                let closed = RoomEvent::Closed {
                    sender,
                    cause: room.machine.end_cause(),
                    ts,
                };
                return room.broadcast(&closed.to_wire(id.as_str()));
            }
            debug!(room = %id, conn = %from.id(), "dropping repeated closing notice");
            return Vec::new();
        }

        let cause = match room
            .machine
            .end(sender, &EndMetadata::default(), self.require_end_metadata)
        {
            Ok(EndOutcome::Ended(cause) | EndOutcome::AlreadyEnded(cause)) => cause,
            Err(violation) => {
                warn!(room = %id, conn = %from.id(), error = %violation, "close rejected");
                return reject(room, from, &violation);
            }
        };
        room.stamp_end();
        room.machine.take_closing_notice();
        info!(room = %id, cause = %cause, "room closed");
        self.persist.enqueue(StoreCommand::Ended(id.clone(), cause));
        self.lobby.publish(&LobbyEvent::Closed {
            room: id.clone(),
            cause: Some(cause),
        });
        let closed = RoomEvent::Closed {
            sender,
            cause: Some(cause),
            ts,
        };
        room.broadcast(&closed.to_wire(id.as_str()))
    }

    /// Re-evaluates the room after a member is gone.
    fn after_departure(&self, room: &mut Room, role: Role, clean: bool) -> Vec<ConnectionHandle> {
        if role != Role::User {
            return Vec::new();
        }
        let Transition::Ended(cause) = room.machine.on_user_lost(clean, room.count(Role::User))
        else {
            return Vec::new();
        };
        let id = room.id().clone();
        room.stamp_end();
        info!(room = %id, cause = %cause, "room ended by connection loss");
        self.persist.enqueue(StoreCommand::Ended(id.clone(), cause));
        self.lobby.publish(&LobbyEvent::End {
            room: id.clone(),
            cause: Some(cause),
        });
        if !room.machine.take_closing_notice() {
            return Vec::new();
        }
        let closed = RoomEvent::Closed {
            sender: Role::System,
            cause: Some(cause),
            ts: now_millis(),
        };
        room.broadcast(&closed.to_wire(id.as_str()))
    }

    /// Treats members whose queue rejected a frame as unclean departures.
    fn reap(&self, room: &mut Room, mut dead: Vec<ConnectionHandle>) {
        while let Some(gone) = dead.pop() {
            warn!(room = %room.id(), conn = %gone.id(), "dropping unresponsive member");
            gone.close(close::TRY_AGAIN, "outbound backlog");
            dead.extend(self.after_departure(room, gone.role(), false));
        }
    }
}

fn reject(
    room: &mut Room,
    from: &ConnectionHandle,
    violation: &PolicyViolation,
) -> Vec<ConnectionHandle> {
    room.send_to(from.id(), &RoomEvent::error(violation.code(), violation.to_string()))
}

fn end_confirmation(cause: EndCause) -> RoomEvent {
    RoomEvent::End {
        sender: Role::System,
        metadata: EndMetadata::default(),
        cause: Some(cause),
        ts: now_millis(),
    }
}
