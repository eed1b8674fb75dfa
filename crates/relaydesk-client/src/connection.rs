// SPDX-FileCopyrightText: 2026 Relaydesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A single WebSocket connection to the relay.
//!
//! The socket is driven by a spawned pump task. Callers push frames through
//! [`Connection::send`], which never queues on a socket that is not open,
//! and read [`ConnectionEvent`]s from [`Connection::events`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::{SinkExt, StreamExt};
use relaydesk_core::protocol::close;
use relaydesk_core::{RelaydeskError, WireMessage};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Reported when the stream ends without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Reported when a close frame carries no status code.
pub const CLOSE_NO_STATUS: u16 = 1005;

const OUTBOUND_DEPTH: usize = 64;
const EVENT_DEPTH: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Opened,
    Message(WireMessage),
    Closed { code: u16, was_clean: bool },
}

#[derive(Debug)]
pub struct Connection {
    url: String,
    open: Arc<AtomicBool>,
    outbound: mpsc::Sender<Message>,
    events: mpsc::Receiver<ConnectionEvent>,
}

impl Connection {
    /// Connects to `url`. The first event is always [`ConnectionEvent::Opened`].
    pub async fn open(url: &str) -> Result<Self, RelaydeskError> {
        let (ws, _) = connect_async(url)
            .await
            .map_err(|e| RelaydeskError::Transport {
                message: format!("failed to connect to {url}: {e}"),
                source: Some(Box::new(e)),
            })?;
        debug!(url, "socket open");

        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_DEPTH);
        let (events_tx, events) = mpsc::channel(EVENT_DEPTH);
        let open = Arc::new(AtomicBool::new(true));
        // Fresh channel with spare capacity.
        let _ = events_tx.try_send(ConnectionEvent::Opened);
        tokio::spawn(pump(ws, outbound_rx, events_tx, open.clone(), url.to_string()));

        Ok(Self {
            url: url.to_string(),
            open,
            outbound,
            events,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Queues a frame for sending. Fails at once when the socket is not open.
    pub fn send(&self, msg: &WireMessage) -> Result<(), RelaydeskError> {
        if !self.is_open() {
            return Err(RelaydeskError::transport(format!(
                "cannot send on closed connection to {}",
                self.url
            )));
        }
        let text = msg.encode()?;
        self.outbound
            .try_send(Message::Text(text.into()))
            .map_err(|e| RelaydeskError::transport(format!("send to {} failed: {e}", self.url)))
    }

    /// Starts the closing handshake. Sends fail from here on; the matching
    /// [`ConnectionEvent::Closed`] arrives once the peer answers.
    pub fn close(&self, code: u16, reason: &str) {
        if !self.open.swap(false, Ordering::AcqRel) {
            return;
        }
        let frame = CloseFrame {
            code: code.into(),
            reason: reason.to_string().into(),
        };
        if self.outbound.try_send(Message::Close(Some(frame))).is_err() {
            debug!(url = %self.url, "close frame not queued; pump already stopped");
        }
    }

    pub fn events(&mut self) -> &mut mpsc::Receiver<ConnectionEvent> {
        &mut self.events
    }

    pub async fn next_event(&mut self) -> Option<ConnectionEvent> {
        self.events.recv().await
    }
}

async fn pump(
    mut ws: WsStream,
    mut outbound: mpsc::Receiver<Message>,
    events: mpsc::Sender<ConnectionEvent>,
    open: Arc<AtomicBool>,
    url: String,
) {
    let closed = loop {
        tokio::select! {
            out = outbound.recv() => match out {
                Some(frame) => {
                    if let Err(e) = ws.send(frame).await {
                        debug!(url = %url, error = %e, "socket write failed");
                        break ConnectionEvent::Closed { code: CLOSE_ABNORMAL, was_clean: false };
                    }
                }
                // Every handle is gone; close politely.
                None => {
                    let _ = ws.close(None).await;
                    break ConnectionEvent::Closed { code: close::NORMAL, was_clean: true };
                }
            },
            incoming = ws.next() => match incoming {
                Some(Ok(Message::Text(text))) => match WireMessage::decode(text.as_str()) {
                    Ok(msg) => {
                        if events.send(ConnectionEvent::Message(msg)).await.is_err() {
                            debug!(url = %url, "event receiver dropped");
                        }
                    }
                    Err(e) => warn!(url = %url, error = %e, "dropping malformed frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    let code = frame.map_or(CLOSE_NO_STATUS, |f| u16::from(f.code));
                    break ConnectionEvent::Closed { code, was_clean: code == close::NORMAL };
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(url = %url, error = %e, "socket read failed");
                    break ConnectionEvent::Closed { code: CLOSE_ABNORMAL, was_clean: false };
                }
                None => break ConnectionEvent::Closed { code: CLOSE_ABNORMAL, was_clean: false },
            },
        }
    };
    open.store(false, Ordering::Release);
    debug!(url = %url, event = ?closed, "socket closed");
    let _ = events.send(closed).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_fails_fast_when_nothing_listens() {
        // Bind then drop to get a port with no listener.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = Connection::open(&format!("ws://{addr}/chat/r1"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "transport_error");
    }

    #[tokio::test]
    async fn echo_server_round_trip_and_clean_close() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            while let Some(Ok(msg)) = ws.next().await {
                if msg.is_text() {
                    ws.send(msg).await.unwrap();
                }
            }
        });

        let mut conn = Connection::open(&format!("ws://{addr}/")).await.unwrap();
        assert_eq!(conn.next_event().await, Some(ConnectionEvent::Opened));

        let frame = WireMessage {
            text: Some("hi".into()),
            ..Default::default()
        };
        conn.send(&frame).unwrap();
        assert_eq!(conn.next_event().await, Some(ConnectionEvent::Message(frame.clone())));

        conn.close(close::NORMAL, "bye");
        assert!(conn.send(&frame).is_err());
        assert_eq!(
            conn.next_event().await,
            Some(ConnectionEvent::Closed {
                code: close::NORMAL,
                was_clean: true
            })
        );
    }
}
