// SPDX-FileCopyrightText: 2026 Relaydesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test harness for end-to-end integration testing.
//!
//! `TestHarness` boots a real [`Gateway`] on an ephemeral localhost port with
//! a temp SQLite database (or the in-memory mock store) and hands out raw
//! WebSocket clients for driving the lobby and room channels.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use relaydesk_config::model::{ChatConfig, RelaydeskConfig, StorageConfig};
use relaydesk_core::{Adapter, RelaydeskError, Role, SessionStore};
use relaydesk_gateway::Gateway;
use relaydesk_storage::SqliteSessionStore;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::mock_store::MockSessionStore;

/// Operator token configured by default.
pub const OPERATOR_TOKEN: &str = "test-operator-token";

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Builder for creating test environments with configurable options.
pub struct TestHarnessBuilder {
    operator_token: Option<String>,
    chat: ChatConfig,
    mock_store: bool,
}

impl TestHarnessBuilder {
    fn new() -> Self {
        Self {
            operator_token: Some(OPERATOR_TOKEN.to_string()),
            chat: ChatConfig::default(),
            mock_store: false,
        }
    }

    /// Overrides the operator token; `None` leaves operator access closed.
    pub fn with_operator_token(mut self, token: Option<&str>) -> Self {
        self.operator_token = token.map(str::to_string);
        self
    }

    pub fn with_chat(mut self, chat: ChatConfig) -> Self {
        self.chat = chat;
        self
    }

    pub fn require_end_metadata(mut self, required: bool) -> Self {
        self.chat.require_end_metadata = required;
        self
    }

    /// Uses [`MockSessionStore`] instead of SQLite.
    pub fn with_mock_store(mut self) -> Self {
        self.mock_store = true;
        self
    }

    /// Builds the harness and starts the gateway.
    pub async fn build(self) -> Result<TestHarness, RelaydeskError> {
        let temp_dir =
            tempfile::TempDir::new().map_err(|e| RelaydeskError::Storage { source: e.into() })?;
        let db_path = temp_dir.path().join("sessions.db");

        let mut config = RelaydeskConfig::default();
        config.server.host = "127.0.0.1".into();
        config.server.port = 0;
        config.auth.operator_token = self.operator_token;
        config.storage = StorageConfig {
            database_path: db_path.to_string_lossy().to_string(),
            wal_mode: true,
        };
        config.chat = self.chat;

        let mut mock_store = None;
        let store: Arc<dyn SessionStore> = if self.mock_store {
            let mock = Arc::new(MockSessionStore::new());
            mock_store = Some(mock.clone());
            mock
        } else {
            let sqlite = SqliteSessionStore::new(config.storage.clone());
            sqlite.initialize().await?;
            Arc::new(sqlite)
        };

        let gateway = Gateway::new(&config, store.clone());
        let addr = gateway.start().await?;
        tracing::debug!(%addr, mock_store = self.mock_store, "test gateway started");

        Ok(TestHarness {
            gateway,
            store,
            mock_store,
            config,
            addr,
            _temp_dir: temp_dir,
        })
    }
}

/// A running gateway plus the storage behind it.
pub struct TestHarness {
    pub gateway: Gateway,
    pub store: Arc<dyn SessionStore>,
    /// Set when built with [`TestHarnessBuilder::with_mock_store`].
    pub mock_store: Option<Arc<MockSessionStore>>,
    pub config: RelaydeskConfig,
    addr: SocketAddr,
    /// Temp directory kept alive for cleanup on drop.
    _temp_dir: tempfile::TempDir,
}

impl TestHarness {
    /// Create a new builder for configuring the test harness.
    pub fn builder() -> TestHarnessBuilder {
        TestHarnessBuilder::new()
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn http_base(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn ws_base(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub fn operator_token(&self) -> Option<&str> {
        self.config.auth.operator_token.as_deref()
    }

    /// Opens `/chat/master` as the given role.
    pub async fn connect_lobby(&self, role: Role) -> Result<TestSocket, RelaydeskError> {
        TestSocket::connect(&self.url_for("master", role)).await
    }

    /// Opens `/chat/{room}` as the given role.
    pub async fn connect_room(&self, room: &str, role: Role) -> Result<TestSocket, RelaydeskError> {
        TestSocket::connect(&self.url_for(room, role)).await
    }

    fn url_for(&self, channel: &str, role: Role) -> String {
        let base = self.ws_base();
        match (role, self.operator_token()) {
            (Role::Operator, Some(token)) => {
                format!("{base}/chat/{channel}?role=operator&token={token}")
            }
            (Role::Operator, None) => format!("{base}/chat/{channel}?role=operator"),
            _ => format!("{base}/chat/{channel}"),
        }
    }

    /// Stops the gateway and waits for its background tasks.
    pub async fn shutdown(&self) -> Result<(), RelaydeskError> {
        tracing::debug!(addr = %self.addr, "stopping test gateway");
        self.gateway.shutdown().await
    }
}

/// A raw WebSocket client speaking JSON frames.
pub struct TestSocket {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl TestSocket {
    pub async fn connect(url: &str) -> Result<Self, RelaydeskError> {
        let (ws, _) = connect_async(url)
            .await
            .map_err(|e| RelaydeskError::Transport {
                message: format!("failed to connect to {url}: {e}"),
                source: Some(Box::new(e)),
            })?;
        Ok(Self { ws })
    }

    pub async fn send_json(&mut self, value: Value) -> Result<(), RelaydeskError> {
        self.ws
            .send(Message::Text(value.to_string().into()))
            .await
            .map_err(|e| RelaydeskError::transport(format!("send failed: {e}")))
    }

    /// Next text frame as JSON. Fails on close or after a few seconds.
    pub async fn recv_json(&mut self) -> Result<Value, RelaydeskError> {
        loop {
            let next = tokio::time::timeout(RECV_TIMEOUT, self.ws.next())
                .await
                .map_err(|_| RelaydeskError::Timeout {
                    duration: RECV_TIMEOUT,
                })?;
            match next {
                Some(Ok(Message::Text(text))) => {
                    return serde_json::from_str(text.as_str()).map_err(|e| {
                        RelaydeskError::Protocol {
                            message: format!("server sent non-JSON frame: {e}"),
                        }
                    });
                }
                Some(Ok(Message::Close(frame))) => {
                    return Err(RelaydeskError::transport(format!(
                        "socket closed: {frame:?}"
                    )));
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    tracing::error!(error = %e, "socket error in test harness");
                    return Err(RelaydeskError::transport(format!("read failed: {e}")));
                }
                None => return Err(RelaydeskError::transport("socket ended")),
            }
        }
    }

    /// Skips frames until one matches `pred`.
    pub async fn recv_until(
        &mut self,
        pred: impl Fn(&Value) -> bool,
    ) -> Result<Value, RelaydeskError> {
        loop {
            let frame = self.recv_json().await?;
            if pred(&frame) {
                return Ok(frame);
            }
        }
    }

    /// Skips frames until the next one with `"type": kind`.
    pub async fn recv_type(&mut self, kind: &str) -> Result<Value, RelaydeskError> {
        self.recv_until(|v| v["type"] == kind).await
    }

    /// Reads until the server closes and returns its close code.
    pub async fn expect_close(&mut self) -> Result<Option<u16>, RelaydeskError> {
        loop {
            let next = tokio::time::timeout(RECV_TIMEOUT, self.ws.next())
                .await
                .map_err(|_| RelaydeskError::Timeout {
                    duration: RECV_TIMEOUT,
                })?;
            match next {
                Some(Ok(Message::Close(frame))) => return Ok(frame.map(|f| u16::from(f.code))),
                Some(Ok(_)) => continue,
                Some(Err(_)) | None => return Ok(None),
            }
        }
    }

    /// Closes with a close frame carrying `code`.
    pub async fn close(mut self, code: u16) -> Result<(), RelaydeskError> {
        let frame = CloseFrame {
            code: code.into(),
            reason: String::new().into(),
        };
        self.ws
            .close(Some(frame))
            .await
            .map_err(|e| RelaydeskError::transport(format!("close failed: {e}")))?;
        // Wait for the server's reply so the close is observed before returning.
        let _ = tokio::time::timeout(RECV_TIMEOUT, async {
            while let Some(Ok(_)) = self.ws.next().await {}
        })
        .await;
        Ok(())
    }

    /// Drops the TCP connection without a close frame.
    pub fn drop_abruptly(self) {
        drop(self.ws);
    }
}
