// SPDX-FileCopyrightText: 2026 Relaydesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! WebSocket handlers for the lobby and room channels.
//!
//! Room frames (`/chat/<room>`):
//! ```json
//! {"sender": "operator", "text": "hello", "ts": 1700000000000}
//! {"type": "end", "session_type": "billing"}
//! {"type": "closed"}
//! ```
//!
//! Lobby frames (`/chat/master`):
//! ```json
//! {"type": "handoff", "room": "r1", "page": {"title": "Pricing", "path": "/pricing"}}
//! ```

use axum::{
    extract::{
        Path, Query, State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
    },
    response::{IntoResponse, Response},
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use std::time::Duration;

use relaydesk_core::protocol::close;
use relaydesk_core::types::{LOBBY_NAMES, now_millis};
use relaydesk_core::{LobbyEvent, PolicyViolation, Role, RoomEvent, RoomId, WireMessage};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::auth::ConnectParams;
use crate::connection::{ConnectionHandle, Outbound, Outbox};
use crate::server::GatewayState;

/// How long the writer gets to flush the reply to a peer's close frame.
const CLOSE_FLUSH: Duration = Duration::from_secs(1);

/// Upgrade handler for `/chat/master`.
pub async fn lobby_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<GatewayState>,
) -> Response {
    match state.auth.authorize_upgrade(&params) {
        Ok(role) => ws.on_upgrade(move |socket| handle_lobby(socket, state, role)),
        Err(status) => status.into_response(),
    }
}

/// Upgrade handler for `/chat/{room}`.
///
/// An invalid room id is still upgraded, then closed with code 4000 so the
/// client sees the reason.
pub async fn room_handler(
    ws: WebSocketUpgrade,
    Path(room): Path<String>,
    Query(params): Query<ConnectParams>,
    State(state): State<GatewayState>,
) -> Response {
    match state.auth.authorize_upgrade(&params) {
        Ok(role) => ws.on_upgrade(move |socket| handle_room(socket, state, role, room)),
        Err(status) => status.into_response(),
    }
}

/// Drains a connection's outbound queue into the socket.
fn spawn_writer(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: Outbox,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(item) = rx.recv().await {
            match item {
                Outbound::Frame(text) => {
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Outbound::Close { code, reason } => {
                    let frame = CloseFrame {
                        code,
                        reason: reason.into(),
                    };
                    let _ = sink.send(Message::Close(Some(frame))).await;
                    break;
                }
            }
        }
    })
}

async fn handle_room(socket: WebSocket, state: GatewayState, role: Role, raw_room: String) {
    let (sink, mut stream) = socket.split();
    let (handle, rx) = ConnectionHandle::new(role, state.chat.outbound_buffer);
    let mut writer = spawn_writer(sink, rx);

    let room = match RoomId::parse(raw_room.as_str()) {
        Ok(room) => room,
        Err(violation) => {
            warn!(room = %raw_room, "rejecting invalid room id");
            handle.close(close::INVALID_ROOM, violation.code());
            let _ = writer.await;
            return;
        }
    };

    if let Err(e) = state.registry.join(&room, handle.clone()).await {
        warn!(room = %room, error = %e, "join refused");
        handle.close(close::TRY_AGAIN, e.code());
        let _ = writer.await;
        return;
    }

    let mut clean = false;
    let mut peer_close = None;
    loop {
        let next = tokio::select! {
            next = stream.next() => next,
            _ = state.shutdown.cancelled() => {
                debug!(room = %room, conn = %handle.id(), "closing room socket for shutdown");
                close_for_shutdown(&handle, &mut writer).await;
                return;
            }
            _ = handle.closing() => {
                debug!(room = %room, conn = %handle.id(), "room socket closed by server");
                break;
            }
        };
        let Some(msg) = next else {
            break;
        };
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => {
                debug!(room = %room, conn = %handle.id(), error = %e, "room socket error");
                break;
            }
        };
        match msg {
            Message::Text(text) => {
                if let Some(event) = decode_room_frame(text.as_str(), &room, role) {
                    state.registry.dispatch(&room, &handle, event).await;
                }
            }
            Message::Close(frame) => {
                let code = frame.as_ref().map_or(close::NORMAL, |f| f.code);
                clean = frame.is_some() && code == close::NORMAL;
                peer_close = Some(code);
                break;
            }
            _ => {} // Binary is unused; ping/pong is handled by the protocol layer.
        }
    }

    state.registry.leave(&room, handle.id(), clean).await;
    finish_writer(&handle, &mut writer, peer_close).await;
}

/// Answers a peer-initiated close and lets a pending close frame flush.
/// Drops the writer when the stream just ended.
async fn finish_writer(
    handle: &ConnectionHandle,
    writer: &mut JoinHandle<()>,
    peer_close: Option<u16>,
) {
    if let Some(code) = peer_close {
        handle.close(code, "");
    }
    if !handle.is_closing() {
        writer.abort();
        return;
    }
    if tokio::time::timeout(CLOSE_FLUSH, &mut *writer).await.is_err() {
        writer.abort();
    }
}

/// Closes with 1001 so clients reconnect once the gateway is back. Room
/// state is left alone; it does not survive the restart.
async fn close_for_shutdown(handle: &ConnectionHandle, writer: &mut JoinHandle<()>) {
    handle.close(close::GOING_AWAY, "server shutting down");
    if tokio::time::timeout(CLOSE_FLUSH, &mut *writer).await.is_err() {
        writer.abort();
    }
}

/// Decodes one room frame, stamping the connection's role and room.
///
/// Malformed frames are logged and dropped.
pub(crate) fn decode_room_frame(text: &str, room: &RoomId, role: Role) -> Option<RoomEvent> {
    let mut msg = match WireMessage::decode(text) {
        Ok(msg) => msg,
        Err(e) => {
            warn!(room = %room, error = %e, "dropping malformed frame");
            return None;
        }
    };
    msg.sender = Some(role);
    msg.room = Some(room.to_string());
    if msg.ts.is_none() {
        msg.ts = Some(now_millis());
    }

    match RoomEvent::try_from(msg) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!(room = %room, error = %e, "dropping unreadable frame");
            None
        }
    }
}

async fn handle_lobby(socket: WebSocket, state: GatewayState, role: Role) {
    let (sink, mut stream) = socket.split();
    let (handle, rx) = ConnectionHandle::new(role, state.chat.outbound_buffer);
    let mut writer = spawn_writer(sink, rx);

    state.lobby.join(handle.clone());
    if role == Role::Operator {
        // Late consoles rebuild their pending list from rooms still waiting.
        for handoff in state.registry.waiting_handoffs().await {
            handle.deliver_msg(&LobbyEvent::Handoff(handoff).to_wire());
        }
    }

    let mut peer_close = None;
    loop {
        let next = tokio::select! {
            next = stream.next() => next,
            _ = state.shutdown.cancelled() => {
                state.lobby.leave(handle.id());
                close_for_shutdown(&handle, &mut writer).await;
                return;
            }
            _ = handle.closing() => break,
        };
        let Some(Ok(msg)) = next else {
            break;
        };
        match msg {
            Message::Text(text) => on_lobby_frame(&state, &handle, text.as_str()).await,
            Message::Close(frame) => {
                peer_close = Some(frame.map_or(close::NORMAL, |f| f.code));
                break;
            }
            _ => {}
        }
    }

    state.lobby.leave(handle.id());
    finish_writer(&handle, &mut writer, peer_close).await;
}

async fn on_lobby_frame(state: &GatewayState, handle: &ConnectionHandle, text: &str) {
    let Some(event) = decode_lobby_frame(text) else {
        return;
    };

    match event {
        LobbyEvent::Handoff(handoff) => {
            if let Err(e) = state.registry.register_handoff(&handoff).await {
                warn!(room = %handoff.room, error = %e, "handoff refused");
                lobby_error(handle, e.code(), &e.to_string());
                return;
            }
            info!(room = %handoff.room, "handoff");
            state.lobby.publish(&LobbyEvent::Handoff(handoff));
        }
        other if handle.role() == Role::Operator => {
            state.lobby.publish(&other);
        }
        other => {
            let violation = PolicyViolation::NotPermitted {
                action: format!(
                    "publish `{}` on the lobby",
                    other.to_wire().kind.unwrap_or_default()
                ),
            };
            debug!(conn = %handle.id(), error = %violation, "lobby publish refused");
            lobby_error(handle, violation.code(), &violation.to_string());
        }
    }
}

pub(crate) fn decode_lobby_frame(text: &str) -> Option<LobbyEvent> {
    let mut msg = match WireMessage::decode(text) {
        Ok(msg) => msg,
        Err(e) => {
            warn!(error = %e, "dropping malformed lobby frame");
            return None;
        }
    };
    if msg.ts.is_none() {
        msg.ts = Some(now_millis());
    }
    match LobbyEvent::try_from(msg) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!(error = %e, "dropping unreadable lobby frame");
            None
        }
    }
}

fn lobby_error(handle: &ConnectionHandle, code: &str, text: &str) {
    handle.deliver_msg(&RoomEvent::error(code, text).to_wire(LOBBY_NAMES[0]));
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaydesk_core::EndCause;
    use tracing_test::traced_test;

    fn r1() -> RoomId {
        RoomId::parse("r1").unwrap()
    }

    #[traced_test]
    #[test]
    fn malformed_room_frame_is_logged_and_dropped() {
        assert!(decode_room_frame("{not json", &r1(), Role::User).is_none());
        assert!(logs_contain("dropping malformed frame"));
    }

    #[traced_test]
    #[test]
    fn unknown_frame_type_is_logged_and_dropped() {
        assert!(decode_room_frame(r#"{"type":"typing"}"#, &r1(), Role::User).is_none());
        assert!(logs_contain("dropping unreadable frame"));
    }

    #[test]
    fn sender_and_room_come_from_the_connection() {
        let event = decode_room_frame(
            r#"{"sender":"operator","room":"elsewhere","text":"hi"}"#,
            &r1(),
            Role::User,
        )
        .unwrap();
        let RoomEvent::Chat(chat) = event else {
            panic!("expected chat");
        };
        assert_eq!(chat.sender, Role::User);
        assert!(chat.ts > 0);
        assert_eq!(RoomEvent::Chat(chat).to_wire("r1").room.as_deref(), Some("r1"));
    }

    #[test]
    fn client_timestamp_is_kept() {
        let event = decode_room_frame(r#"{"text":"hi","ts":42}"#, &r1(), Role::Operator).unwrap();
        assert!(matches!(event, RoomEvent::Chat(chat) if chat.ts == 42));
    }

    #[test]
    fn lobby_handoff_gets_a_timestamp() {
        let Some(LobbyEvent::Handoff(handoff)) =
            decode_lobby_frame(r#"{"type":"handoff","room":"r1"}"#)
        else {
            panic!("expected handoff");
        };
        assert!(handoff.ts > 0);
    }

    #[traced_test]
    #[test]
    fn lobby_frame_without_type_is_dropped() {
        assert!(decode_lobby_frame(r#"{"room":"r1"}"#).is_none());
        assert!(logs_contain("dropping unreadable lobby frame"));
    }

    #[test]
    fn lobby_end_echo_decodes() {
        let event = decode_lobby_frame(r#"{"type":"end","room":"r1","cause":"network"}"#).unwrap();
        assert_eq!(
            event,
            LobbyEvent::End {
                room: r1(),
                cause: Some(EndCause::Network),
            }
        );
    }
}
