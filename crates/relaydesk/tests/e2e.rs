// SPDX-FileCopyrightText: 2026 Relaydesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end tests for the complete relay.
//!
//! Each test boots an isolated gateway on an ephemeral port with a temp
//! SQLite database and drives it over real WebSockets and HTTP. Raw frames
//! are fed through the client-side state types so both halves of the
//! protocol are exercised together.

use std::time::Duration;

use relaydesk_client::{
    Backoff, Connection, ConnectionEvent, ConsoleAction, HttpGateway, LinkStatus,
    OperatorConsole, Supervisor, VisitorSession, VisitorUpdate, lobby_url, room_url,
};
use relaydesk_core::{
    EndCause, EndMetadata, PageInfo, PersistenceGateway, PolicyViolation, Role, RoomId,
    RoomState, SaveSession, WireMessage,
};
use relaydesk_gateway::Gateway;
use relaydesk_test_utils::{OPERATOR_TOKEN, TestHarness, TestSocket};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(5);

fn room(id: &str) -> RoomId {
    RoomId::parse(id).unwrap()
}

fn wire(value: &Value) -> WireMessage {
    WireMessage::decode(&value.to_string()).unwrap()
}

fn operator_http(harness: &TestHarness) -> HttpGateway {
    HttpGateway::new(
        vec![harness.http_base()],
        Some(OPERATOR_TOKEN.to_string()),
    )
    .unwrap()
}

/// Lobby joins are registered after the upgrade completes; poll until the
/// gateway counts them.
async fn wait_for_operators(http: &HttpGateway, count: usize) {
    tokio::time::timeout(WAIT, async {
        loop {
            if http.availability().await.unwrap().operator_count == count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("operator never registered on the lobby");
}

fn fast_backoff() -> Backoff {
    Backoff::new(
        Duration::from_millis(50),
        Duration::ZERO,
        Duration::from_millis(100),
        0,
    )
}

/// Visitor and operator both connected to `id`, room active.
struct LiveRoom {
    visitor: TestSocket,
    operator: TestSocket,
}

async fn open_live_room(harness: &TestHarness, id: &str) -> LiveRoom {
    let mut visitor = harness.connect_room(id, Role::User).await.unwrap();
    let waiting = visitor.recv_type("state").await.unwrap();
    assert_eq!(waiting["state"], "waiting");

    let mut operator = harness.connect_room(id, Role::Operator).await.unwrap();
    assert_eq!(operator.recv_type("state").await.unwrap()["state"], "active");
    assert_eq!(visitor.recv_type("state").await.unwrap()["state"], "active");
    LiveRoom { visitor, operator }
}

// ---- Scenario A: handoff, join, relay ----

#[tokio::test]
async fn handoff_reaches_lobby_and_chat_is_relayed_verbatim() {
    let harness = TestHarness::builder().build().await.unwrap();
    let http = operator_http(&harness);

    let mut op_lobby = harness.connect_lobby(Role::Operator).await.unwrap();
    wait_for_operators(&http, 1).await;
    assert!(http.availability().await.unwrap().available);

    // Visitor requests a chat, then announces it on the lobby.
    let mut visitor = VisitorSession::new(
        room("r1"),
        PageInfo {
            title: Some("Pricing".into()),
            path: Some("/pricing".into()),
        },
        Some("https://shop.test/pricing".into()),
    );
    let ticket = http
        .request_chat(visitor.room(), &PageInfo::default(), Some("https://shop.test/pricing"))
        .await
        .unwrap();
    assert_eq!(ticket.room, room("r1"));
    visitor.set_session_id(ticket.session_id);

    let mut visitor_room = harness.connect_room("r1", Role::User).await.unwrap();
    let update = visitor.apply(wire(&visitor_room.recv_type("state").await.unwrap()));
    assert_eq!(update, VisitorUpdate::State(RoomState::Waiting));

    let mut visitor_lobby = harness.connect_lobby(Role::User).await.unwrap();
    let handoff = visitor.take_handoff().unwrap();
    assert!(visitor.take_handoff().is_none());
    visitor_lobby
        .send_json(serde_json::to_value(&handoff).unwrap())
        .await
        .unwrap();

    // The console lists it as pending.
    let mut console = OperatorConsole::new(true);
    let frame = op_lobby.recv_type("handoff").await.unwrap();
    assert_eq!(frame["room"], "r1");
    assert_eq!(frame["page"]["path"], "/pricing");
    assert_eq!(console.apply_lobby(wire(&frame)), ConsoleAction::PendingChanged);
    assert_eq!(console.pending().len(), 1);
    assert_eq!(console.pending()[0].session_id, Some(ticket.session_id));

    // Operator joins; both sides see the room go active.
    assert_eq!(console.join(&room("r1")).unwrap(), "/chat/r1");
    assert!(console.pending().is_empty());
    let mut op_room = harness.connect_room("r1", Role::Operator).await.unwrap();
    let state = op_room.recv_type("state").await.unwrap();
    assert_eq!(
        console.apply_room(wire(&state)),
        ConsoleAction::RoomState(RoomState::Active)
    );
    let state = visitor_room.recv_type("state").await.unwrap();
    assert_eq!(
        visitor.apply(wire(&state)),
        VisitorUpdate::State(RoomState::Active)
    );

    // Visitor chat reaches the operator with unknown fields intact.
    let mut line = serde_json::to_value(visitor.chat("안녕하세요, I need help").unwrap()).unwrap();
    line["lang"] = json!("ko");
    visitor_room.send_json(line).await.unwrap();
    let relayed = op_room
        .recv_until(|v| v["text"] == "안녕하세요, I need help")
        .await
        .unwrap();
    assert_eq!(relayed["sender"], "user");
    assert_eq!(relayed["room"], "r1");
    assert_eq!(relayed["lang"], "ko");
    assert_eq!(
        console.apply_room(wire(&relayed)),
        ConsoleAction::Chat {
            sender: Role::User,
            text: "안녕하세요, I need help".into(),
        }
    );

    // And the reverse direction.
    let reply = serde_json::to_value(console.chat("Sure, what's up?").unwrap()).unwrap();
    op_room.send_json(reply).await.unwrap();
    let relayed = visitor_room
        .recv_until(|v| v["text"] == "Sure, what's up?")
        .await
        .unwrap();
    assert_eq!(relayed["sender"], "operator");

    let snapshot = harness.gateway.state().registry.snapshot(&room("r1")).await.unwrap();
    assert_eq!(snapshot.state, RoomState::Active);
    assert_eq!(snapshot.session_id, Some(ticket.session_id));
}

#[tokio::test]
async fn late_operator_console_gets_waiting_handoffs_replayed() {
    let harness = TestHarness::builder().build().await.unwrap();
    let mut visitor_lobby = harness.connect_lobby(Role::User).await.unwrap();
    visitor_lobby
        .send_json(json!({"type": "handoff", "room": "early", "url": "https://x.test"}))
        .await
        .unwrap();

    // Wait until the handoff is attached to its room.
    tokio::time::timeout(WAIT, async {
        while harness
            .gateway
            .state()
            .registry
            .waiting_handoffs()
            .await
            .is_empty()
        {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();

    let mut op_lobby = harness.connect_lobby(Role::Operator).await.unwrap();
    let frame = op_lobby.recv_type("handoff").await.unwrap();
    assert_eq!(frame["room"], "early");
    assert_eq!(frame["url"], "https://x.test");
}

// ---- Scenario B: operator end ----

#[tokio::test]
async fn operator_end_reaches_visitor_and_blocks_further_chat() {
    let harness = TestHarness::builder().build().await.unwrap();
    let mut op_lobby = harness.connect_lobby(Role::Operator).await.unwrap();
    wait_for_operators(&operator_http(&harness), 1).await;
    let LiveRoom {
        visitor: mut visitor_room,
        operator: mut op_room,
    } = open_live_room(&harness, "r2").await;

    let mut visitor = VisitorSession::new(room("r2"), PageInfo::default(), None);
    op_room
        .send_json(json!({"type": "end", "session_type": "billing"}))
        .await
        .unwrap();

    let end = visitor_room.recv_type("end").await.unwrap();
    assert_eq!(end["sender"], "operator");
    assert_eq!(end["cause"], "operator");
    assert_eq!(end["session_type"], "billing");
    assert_eq!(
        visitor.apply(wire(&end)),
        VisitorUpdate::Ended(Some(EndCause::Operator))
    );
    assert_eq!(visitor.chat("still there?"), Err(PolicyViolation::SessionEnded));

    let lobby_end = op_lobby.recv_type("end").await.unwrap();
    assert_eq!(lobby_end["room"], "r2");
    assert_eq!(lobby_end["cause"], "operator");

    // A client that ignores the gate is refused by the server.
    visitor_room.send_json(json!({"text": "hello?"})).await.unwrap();
    let error = visitor_room.recv_type("error").await.unwrap();
    assert_eq!(error["code"], "session_ended");

    // The trailing closing notice is echoed once.
    visitor_room.send_json(json!({"type": "closed"})).await.unwrap();
    let closed = op_room.recv_type("closed").await.unwrap();
    assert_eq!(closed["cause"], "operator");

    let snapshot = harness.gateway.state().registry.snapshot(&room("r2")).await.unwrap();
    assert_eq!(snapshot.state, RoomState::Ended);
    assert!(snapshot.needs_save);
}

#[tokio::test]
async fn operator_end_without_metadata_is_refused() {
    let harness = TestHarness::builder().build().await.unwrap();
    let LiveRoom {
        operator: mut op_room,
        visitor: _visitor,
    } = open_live_room(&harness, "r3").await;

    op_room.send_json(json!({"type": "end"})).await.unwrap();
    let error = op_room.recv_type("error").await.unwrap();
    assert_eq!(error["code"], "metadata_required");

    let snapshot = harness.gateway.state().registry.snapshot(&room("r3")).await.unwrap();
    assert_eq!(snapshot.state, RoomState::Active);
}

// ---- Scenario C: unclean visitor drop ----

#[tokio::test]
async fn visitor_drop_ends_room_with_network_cause() {
    let harness = TestHarness::builder().build().await.unwrap();
    let mut op_lobby = harness.connect_lobby(Role::Operator).await.unwrap();
    wait_for_operators(&operator_http(&harness), 1).await;

    let mut console = OperatorConsole::new(true);
    console.join(&room("r4")).unwrap();
    let LiveRoom {
        visitor,
        operator: mut op_room,
    } = open_live_room(&harness, "r4").await;

    visitor.drop_abruptly();

    let closed = op_room.recv_type("closed").await.unwrap();
    assert_eq!(closed["cause"], "network");
    assert_eq!(
        console.apply_room(wire(&closed)),
        ConsoleAction::NeedsSave {
            room: room("r4"),
            cause: Some(EndCause::Network),
        }
    );
    assert!(console.needs_save());
    assert_eq!(
        console.join(&room("other")),
        Err(PolicyViolation::UnsavedSession { room: "r4".into() })
    );

    let lobby_end = op_lobby.recv_type("end").await.unwrap();
    assert_eq!(lobby_end["room"], "r4");
    assert_eq!(lobby_end["cause"], "network");

    let snapshot = harness.gateway.state().registry.snapshot(&room("r4")).await.unwrap();
    assert_eq!(snapshot.state, RoomState::Ended);
    assert_eq!(snapshot.end_cause, Some(EndCause::Network));
    assert!(snapshot.needs_save);
}

#[tokio::test]
async fn clean_visitor_close_ends_room_as_user() {
    let harness = TestHarness::builder().build().await.unwrap();
    let LiveRoom {
        visitor,
        operator: mut op_room,
    } = open_live_room(&harness, "r5").await;

    visitor.close(1000).await.unwrap();
    let closed = op_room.recv_type("closed").await.unwrap();
    assert_eq!(closed["cause"], "user");
}

#[tokio::test]
async fn operator_drop_leaves_room_active() {
    let harness = TestHarness::builder().build().await.unwrap();
    let LiveRoom {
        operator,
        mut visitor,
    } = open_live_room(&harness, "r6").await;

    operator.drop_abruptly();
    tokio::time::sleep(Duration::from_millis(100)).await;
    let snapshot = harness.gateway.state().registry.snapshot(&room("r6")).await.unwrap();
    assert_eq!(snapshot.state, RoomState::Active);
    assert_eq!(snapshot.operators, 0);

    // The console comes back and the visitor keeps chatting.
    let mut operator = harness.connect_room("r6", Role::Operator).await.unwrap();
    assert_eq!(operator.recv_type("state").await.unwrap()["state"], "active");
    visitor.send_json(json!({"text": "you back?"})).await.unwrap();
    let relayed = operator.recv_until(|v| v["text"] == "you back?").await.unwrap();
    assert_eq!(relayed["sender"], "user");
}

// ---- Scenario D: save and refresh ----

#[tokio::test]
async fn save_publishes_session_saved_and_console_refreshes() {
    let harness = TestHarness::builder().build().await.unwrap();
    let http = operator_http(&harness);
    let mut op_lobby = harness.connect_lobby(Role::Operator).await.unwrap();
    wait_for_operators(&http, 1).await;

    let ticket = http
        .request_chat(&room("r7"), &PageInfo::default(), None)
        .await
        .unwrap();

    let mut console = OperatorConsole::new(true);
    let handoff = json!({
        "type": "handoff",
        "room": "r7",
        "session_id": ticket.session_id,
        "ts": 1,
    });
    assert_eq!(console.apply_lobby(wire(&handoff)), ConsoleAction::PendingChanged);
    console.join(&room("r7")).unwrap();

    let LiveRoom {
        operator: mut op_room,
        visitor: _visitor,
    } = open_live_room(&harness, "r7").await;

    // Saving before the end is refused on both sides.
    let metadata = EndMetadata {
        session_type: "billing".into(),
        session_note: "refund issued".into(),
        ..Default::default()
    };
    assert_eq!(
        console.save_request(metadata.clone()),
        Err(PolicyViolation::SessionNotEnded)
    );
    let early = SaveSession {
        room: Some("r7".into()),
        metadata: metadata.clone(),
        ..Default::default()
    };
    let err = http.save(&early).await.unwrap_err();
    assert_eq!(err.code(), "session_not_ended");

    let end = console.end(metadata.clone()).unwrap();
    op_room.send_json(serde_json::to_value(&end).unwrap()).await.unwrap();
    let echoed = op_room.recv_type("end").await.unwrap();
    assert!(matches!(
        console.apply_room(wire(&echoed)),
        ConsoleAction::NeedsSave { .. }
    ));

    let request = console.save_request(metadata).unwrap();
    assert_eq!(request.session_id, Some(ticket.session_id));
    let record = http.save(&request).await.unwrap();
    assert_eq!(record.id, ticket.session_id);
    assert_eq!(record.status, RoomState::Ended);
    assert_eq!(record.metadata.session_type, "billing");
    assert_eq!(record.end_cause, Some(EndCause::Operator));
    assert!(record.saved_at.is_some());

    let saved = op_lobby.recv_type("session_saved").await.unwrap();
    assert_eq!(saved["room"], "r7");
    assert_eq!(saved["session_type"], "billing");
    assert_eq!(console.apply_lobby(wire(&saved)), ConsoleAction::RefreshHistory);
    console.mark_saved();
    assert!(!console.needs_save());
    assert!(console.join(&room("next")).is_ok());

    let recent = http.list_recent(10).await.unwrap();
    assert_eq!(recent[0].id, ticket.session_id);
    let snapshot = harness.gateway.state().registry.snapshot(&room("r7")).await.unwrap();
    assert!(!snapshot.needs_save);
}

#[tokio::test]
async fn cleanup_broadcasts_refresh() {
    let harness = TestHarness::builder().build().await.unwrap();
    let http = operator_http(&harness);
    let mut op_lobby = harness.connect_lobby(Role::Operator).await.unwrap();
    wait_for_operators(&http, 1).await;

    http.request_chat(&room("stale"), &PageInfo::default(), None)
        .await
        .unwrap();
    assert_eq!(http.cleanup_today().await.unwrap(), 1);

    let mut console = OperatorConsole::new(true);
    let saved = op_lobby.recv_type("session_saved").await.unwrap();
    assert_eq!(console.apply_lobby(wire(&saved)), ConsoleAction::RefreshHistory);
}

// ---- Transport boundary ----

#[tokio::test]
async fn invalid_room_is_closed_with_4000() {
    let harness = TestHarness::builder().build().await.unwrap();
    let mut socket = harness.connect_room("bad%20room", Role::User).await.unwrap();
    assert_eq!(socket.expect_close().await.unwrap(), Some(4000));
}

#[tokio::test]
async fn operator_socket_without_token_is_refused() {
    let harness = TestHarness::builder().build().await.unwrap();
    let url = format!("{}/chat/r8?role=operator&token=wrong", harness.ws_base());
    assert!(TestSocket::connect(&url).await.is_err());
}

#[tokio::test]
async fn send_on_closed_connection_fails_fast() {
    let harness = TestHarness::builder().build().await.unwrap();
    let url = room_url(&harness.ws_base(), &room("r9"), None);
    let mut conn = Connection::open(&url).await.unwrap();
    let frame = WireMessage {
        text: Some("hi".into()),
        ..Default::default()
    };
    assert!(conn.send(&frame).is_ok());

    conn.close(1000, "bye");
    assert!(!conn.is_open());
    let err = conn.send(&frame).unwrap_err();
    assert_eq!(err.code(), "transport_error");

    tokio::time::timeout(WAIT, async {
        while let Some(event) = conn.next_event().await {
            if let ConnectionEvent::Closed { code, was_clean } = event {
                assert_eq!(code, 1000);
                assert!(was_clean);
                return;
            }
        }
    })
    .await
    .unwrap();
}

// ---- Reconnect and re-registration ----

#[tokio::test]
async fn supervisor_reregisters_handoff_after_gateway_restart() {
    let harness = TestHarness::builder().build().await.unwrap();
    let addr = harness.addr();
    let http = operator_http(&harness);

    let mut op_lobby = harness.connect_lobby(Role::Operator).await.unwrap();
    wait_for_operators(&http, 1).await;

    let visitor = VisitorSession::new(room("r10"), PageInfo::default(), None);
    let cancel = CancellationToken::new();
    let supervisor = Supervisor::spawn(
        lobby_url(&harness.ws_base()),
        fast_backoff(),
        vec![visitor.handoff_frame()],
        &cancel,
    );

    let mut status = supervisor.watch_status();
    assert!(
        tokio::time::timeout(WAIT, status.wait_for(|s| *s == LinkStatus::Connected))
            .await
            .unwrap()
            .is_ok()
    );
    assert_eq!(op_lobby.recv_type("handoff").await.unwrap()["room"], "r10");

    // Stop the gateway: sockets close with 1001 and the link starts retrying.
    harness.shutdown().await.unwrap();
    assert_eq!(op_lobby.expect_close().await.unwrap(), Some(1001));
    assert!(
        tokio::time::timeout(
            WAIT,
            status.wait_for(|s| matches!(s, LinkStatus::Retrying { .. }))
        )
        .await
        .unwrap()
        .is_ok()
    );
    assert!(supervisor.send(visitor.handoff_frame()).is_err());

    // Bring a fresh gateway up on the same port.
    let mut config = harness.config.clone();
    config.server.port = addr.port();
    let restarted = Gateway::new(&config, harness.store.clone());
    restarted.start().await.unwrap();

    assert!(
        tokio::time::timeout(WAIT, status.wait_for(|s| *s == LinkStatus::Connected))
            .await
            .unwrap()
            .is_ok()
    );
    let url = format!("ws://{addr}/chat/master?role=operator&token={OPERATOR_TOKEN}");
    let mut op_lobby = TestSocket::connect(&url).await.unwrap();
    let frame = op_lobby
        .recv_until(|v| v["type"] == "handoff" && v["room"] == "r10")
        .await
        .unwrap();
    assert_eq!(frame["room"], "r10");

    supervisor.shutdown().await;
    relaydesk_core::Adapter::shutdown(&restarted).await.unwrap();
}

#[tokio::test]
async fn supervisor_gives_up_on_invalid_room() {
    let harness = TestHarness::builder().build().await.unwrap();
    let cancel = CancellationToken::new();
    let supervisor = Supervisor::spawn(
        format!("{}/chat/bad%20room", harness.ws_base()),
        fast_backoff(),
        Vec::new(),
        &cancel,
    );
    let mut status = supervisor.watch_status();
    assert!(
        tokio::time::timeout(WAIT, status.wait_for(|s| *s == LinkStatus::GaveUp))
            .await
            .unwrap()
            .is_ok()
    );
    supervisor.shutdown().await;
}

#[tokio::test]
async fn room_link_stays_down_after_visitor_ends() {
    let harness = TestHarness::builder().build().await.unwrap();
    let mut operator = harness.connect_room("r11", Role::Operator).await.unwrap();
    assert_eq!(operator.recv_type("state").await.unwrap()["state"], "waiting");

    let mut visitor = VisitorSession::new(room("r11"), PageInfo::default(), None);
    let cancel = CancellationToken::new();
    let link = Supervisor::spawn(
        room_url(&harness.ws_base(), visitor.room(), None),
        fast_backoff(),
        Vec::new(),
        &cancel,
    );
    let mut status = link.watch_status();
    assert!(
        tokio::time::timeout(WAIT, status.wait_for(|s| *s == LinkStatus::Connected))
            .await
            .unwrap()
            .is_ok()
    );
    assert_eq!(operator.recv_type("state").await.unwrap()["state"], "active");

    link.send_end(visitor.end().unwrap()).unwrap();
    assert_eq!(operator.recv_type("end").await.unwrap()["cause"], "user");

    // The gateway goes away; an ended room's link must not come back.
    harness.shutdown().await.unwrap();
    let settled = tokio::time::timeout(
        WAIT,
        status.wait_for(|s| matches!(s, LinkStatus::Disconnected | LinkStatus::Retrying { .. })),
    )
    .await
    .unwrap()
    .unwrap()
    .clone();
    assert_eq!(settled, LinkStatus::Disconnected);
}

#[tokio::test]
async fn http_gateway_falls_back_to_a_live_base() {
    let harness = TestHarness::builder().build().await.unwrap();
    let http = HttpGateway::new(
        vec!["http://127.0.0.1:1".into(), harness.http_base()],
        None,
    )
    .unwrap();
    let availability = http.availability().await.unwrap();
    assert!(!availability.available);
    assert_eq!(availability.operator_count, 0);
}
