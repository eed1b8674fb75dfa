// SPDX-FileCopyrightText: 2026 Relaydesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Client side of the relaydesk live-chat relay.
//!
//! Visitor widgets and operator consoles share the same building blocks:
//! a [`Connection`] that refuses to send on a closed socket, a
//! [`Supervisor`] that reconnects with [`Backoff`] and re-registers, explicit
//! per-participant state ([`VisitorSession`], [`OperatorConsole`]), and the
//! [`HttpGateway`] for the `/livechat/...` HTTP boundary.

pub mod backoff;
pub mod connection;
pub mod console;
pub mod http;
pub mod supervisor;
pub mod visitor;

pub use backoff::Backoff;
pub use connection::{Connection, ConnectionEvent};
pub use console::{ConsoleAction, OperatorConsole};
pub use http::{APOLOGY, Availability, ChatTicket, GatewayHealth, HttpGateway};
pub use supervisor::{LinkStatus, Supervisor};
pub use visitor::{VisitorSession, VisitorUpdate};

/// WebSocket URL of the lobby channel under `base` (`ws://host:port`).
pub fn lobby_url(base: &str) -> String {
    format!("{}/chat/master", base.trim_end_matches('/'))
}

/// WebSocket URL of a room, with the operator role and token when given.
pub fn room_url(base: &str, room: &relaydesk_core::RoomId, operator_token: Option<&str>) -> String {
    let base = base.trim_end_matches('/');
    match operator_token {
        Some(token) => format!("{base}/chat/{room}?role=operator&token={token}"),
        None => format!("{base}/chat/{room}"),
    }
}

/// Lobby URL for an operator console.
pub fn operator_lobby_url(base: &str, operator_token: &str) -> String {
    format!("{}?role=operator&token={operator_token}", lobby_url(base))
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaydesk_core::RoomId;

    #[test]
    fn urls_are_built_from_base() {
        let room = RoomId::parse("r1").unwrap();
        assert_eq!(lobby_url("ws://h:1/"), "ws://h:1/chat/master");
        assert_eq!(room_url("ws://h:1", &room, None), "ws://h:1/chat/r1");
        assert_eq!(
            room_url("ws://h:1", &room, Some("t")),
            "ws://h:1/chat/r1?role=operator&token=t"
        );
        assert_eq!(
            operator_lobby_url("ws://h:1", "t"),
            "ws://h:1/chat/master?role=operator&token=t"
        );
    }
}
