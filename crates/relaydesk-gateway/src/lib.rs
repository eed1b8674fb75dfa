// SPDX-FileCopyrightText: 2026 Relaydesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP/WebSocket gateway for the live-chat relay.
//!
//! The gateway owns the room registry and the lobby channel, serves the
//! `/chat/...` sockets and the `/livechat/...` HTTP boundary, and runs two
//! background tasks: the idle-room sweeper and the ordered lifecycle writer
//! that mirrors room transitions into the [`SessionStore`].

pub mod auth;
pub mod connection;
pub mod handlers;
pub mod lobby;
pub mod persist;
pub mod registry;
pub mod room;
pub mod server;
pub mod sweeper;
pub mod ws;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use relaydesk_config::model::{RelaydeskConfig, ServerConfig};
use relaydesk_core::{Adapter, AdapterType, HealthStatus, RelaydeskError, SessionStore};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::auth::OperatorAuth;
use crate::persist::{PersistQueue, StoreCommand};
use crate::server::GatewayState;

pub use crate::registry::RoomRegistry;
pub use crate::room::RoomSnapshot;

/// The running gateway: server, sweeper, and lifecycle writer.
pub struct Gateway {
    server: ServerConfig,
    state: GatewayState,
    sweep_interval: Duration,
    persist_rx: Mutex<Option<mpsc::Receiver<StoreCommand>>>,
    local_addr: Mutex<Option<SocketAddr>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("server", &self.server)
            .field("auth", &self.state.auth)
            .field("sweep_interval", &self.sweep_interval)
            .finish()
    }
}

impl Gateway {
    pub fn new(config: &RelaydeskConfig, store: Arc<dyn SessionStore>) -> Self {
        let (queue, persist_rx) = PersistQueue::channel();
        let cancel = CancellationToken::new();
        let state = GatewayState::new(
            config.chat.clone(),
            OperatorAuth::new(config.auth.operator_token.clone()),
            store,
            queue,
        )
        .with_shutdown(cancel.child_token());
        Self {
            server: config.server.clone(),
            state,
            sweep_interval: Duration::from_secs(config.chat.sweep_interval_secs.max(1)),
            persist_rx: Mutex::new(Some(persist_rx)),
            local_addr: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            cancel,
        }
    }

    pub fn state(&self) -> &GatewayState {
        &self.state
    }

    /// Binds the listener and spawns the background tasks.
    ///
    /// Returns the bound address; port 0 in the configuration picks a free port.
    pub async fn start(&self) -> Result<SocketAddr, RelaydeskError> {
        let persist_rx = self
            .persist_rx
            .lock()
            .await
            .take()
            .ok_or_else(|| RelaydeskError::Internal("gateway already started".into()))?;

        let addr = self.server.bind_addr();
        let listener = server::bind(&addr).await?;
        let local = listener.local_addr().map_err(|e| RelaydeskError::Transport {
            message: format!("failed to read bound address for {addr}: {e}"),
            source: Some(Box::new(e)),
        })?;

        let writer = persist::spawn_worker(
            self.state.store.clone(),
            persist_rx,
            self.cancel.child_token(),
        );
        let sweeper = sweeper::spawn(
            self.state.registry.clone(),
            self.sweep_interval,
            self.cancel.child_token(),
        );
        let state = self.state.clone();
        let cancel = self.cancel.clone();
        let server = tokio::spawn(async move {
            if let Err(e) = server::serve(listener, state, cancel).await {
                tracing::error!(error = %e, "gateway server stopped");
            }
        });

        *self.tasks.lock().await = vec![server, sweeper, writer];
        *self.local_addr.lock().await = Some(local);
        tracing::info!(addr = %local, "gateway listening");
        Ok(local)
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().await
    }

    /// Token that stops the gateway when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

#[async_trait]
impl Adapter for Gateway {
    fn name(&self) -> &str {
        "gateway"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Gateway
    }

    async fn health_check(&self) -> Result<HealthStatus, RelaydeskError> {
        if self.local_addr.lock().await.is_some() && !self.cancel.is_cancelled() {
            Ok(HealthStatus::Healthy)
        } else {
            Ok(HealthStatus::Unhealthy("server not started".to_string()))
        }
    }

    /// Stops accepting connections and waits for the background tasks. The
    /// lifecycle writer flushes what is already queued before it exits.
    async fn shutdown(&self) -> Result<(), RelaydeskError> {
        self.cancel.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        for task in tasks {
            let _ = task.await;
        }
        *self.local_addr.lock().await = None;
        tracing::info!("gateway stopped");
        Ok(())
    }
}
