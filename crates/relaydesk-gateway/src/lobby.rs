// SPDX-FileCopyrightText: 2026 Relaydesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The `/chat/master` lobby: operator fan-out of handoffs and lifecycle echoes.

use dashmap::DashMap;
use relaydesk_core::{LobbyEvent, Role};
use uuid::Uuid;

use crate::connection::ConnectionHandle;

/// Connected lobby members. Only operators receive published events.
#[derive(Debug, Default)]
pub struct Lobby {
    members: DashMap<Uuid, ConnectionHandle>,
}

impl Lobby {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(&self, handle: ConnectionHandle) {
        tracing::debug!(conn = %handle.id(), role = %handle.role(), "lobby join");
        self.members.insert(handle.id(), handle);
    }

    pub fn leave(&self, id: Uuid) {
        if self.members.remove(&id).is_some() {
            tracing::debug!(conn = %id, "lobby leave");
        }
    }

    /// Number of operators currently listening on the lobby.
    pub fn operator_count(&self) -> usize {
        self.members
            .iter()
            .filter(|m| m.role() == Role::Operator)
            .count()
    }

    /// Fans an event out to every operator. Returns how many received it.
    ///
    /// Members whose queue rejects the frame are dropped from the lobby.
    pub fn publish(&self, event: &LobbyEvent) -> usize {
        let text = match event.to_wire().encode() {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(error = %e, "failed to encode lobby event");
                return 0;
            }
        };

        let mut delivered = 0;
        let mut dead = Vec::new();
        for member in self.members.iter() {
            if member.role() != Role::Operator {
                continue;
            }
            if member.deliver(&text) {
                delivered += 1;
            } else {
                dead.push(*member.key());
            }
        }
        // Removal happens after iteration; DashMap shards are still read-locked above.
        for id in dead {
            tracing::warn!(conn = %id, "dropping unresponsive lobby member");
            if let Some((_, handle)) = self.members.remove(&id) {
                handle.close(relaydesk_core::protocol::close::TRY_AGAIN, "lobby backlog");
            }
        }
        tracing::debug!(room = ?event.room(), delivered, "lobby publish");
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Outbound;
    use relaydesk_core::RoomId;

    fn release() -> LobbyEvent {
        LobbyEvent::Release {
            room: RoomId::parse("r1").unwrap(),
        }
    }

    #[test]
    fn publish_reaches_operators_only() {
        let lobby = Lobby::new();
        let (op, mut op_rx) = ConnectionHandle::new(Role::Operator, 4);
        let (visitor, mut visitor_rx) = ConnectionHandle::new(Role::User, 4);
        lobby.join(op);
        lobby.join(visitor);

        assert_eq!(lobby.publish(&release()), 1);
        assert!(matches!(op_rx.try_recv(), Ok(Outbound::Frame(f)) if f.contains("release")));
        assert!(visitor_rx.try_recv().is_err());
    }

    #[test]
    fn operator_count_tracks_membership() {
        let lobby = Lobby::new();
        let (a, _ra) = ConnectionHandle::new(Role::Operator, 4);
        let (b, _rb) = ConnectionHandle::new(Role::Operator, 4);
        let a_id = a.id();
        lobby.join(a);
        lobby.join(b);
        assert_eq!(lobby.operator_count(), 2);
        lobby.leave(a_id);
        assert_eq!(lobby.operator_count(), 1);
    }

    #[test]
    fn dead_operator_is_dropped() {
        let lobby = Lobby::new();
        let (dead, dead_rx) = ConnectionHandle::new(Role::Operator, 4);
        drop(dead_rx);
        lobby.join(dead);
        assert_eq!(lobby.publish(&release()), 0);
        assert_eq!(lobby.operator_count(), 0);
    }

    #[test]
    fn backlogged_operator_is_told_to_close() {
        let lobby = Lobby::new();
        let (slow, mut slow_rx) = ConnectionHandle::new(Role::Operator, 1);
        lobby.join(slow);
        assert_eq!(lobby.publish(&release()), 1);
        assert_eq!(lobby.publish(&release()), 0);
        assert_eq!(lobby.operator_count(), 0);
        assert!(matches!(
            slow_rx.try_recv(),
            Ok(Outbound::Close { reason, .. }) if reason == "lobby backlog"
        ));
    }
}
