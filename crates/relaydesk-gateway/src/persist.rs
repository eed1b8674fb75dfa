// SPDX-FileCopyrightText: 2026 Relaydesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Ordered background writes of room lifecycle changes.
//!
//! The registry must not await storage while holding a room lock, so
//! `connected`/`ended` transitions are queued here and applied by a single
//! worker in the order they happened.

use std::sync::Arc;

use relaydesk_core::{EndCause, RoomId, SessionStore};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const QUEUE_DEPTH: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCommand {
    Connected(RoomId),
    Ended(RoomId, EndCause),
}

/// Sending half of the lifecycle write queue.
#[derive(Debug, Clone)]
pub struct PersistQueue {
    tx: mpsc::Sender<StoreCommand>,
}

impl PersistQueue {
    pub fn channel() -> (Self, mpsc::Receiver<StoreCommand>) {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        (Self { tx }, rx)
    }

    pub fn enqueue(&self, cmd: StoreCommand) {
        if let Err(e) = self.tx.try_send(cmd) {
            tracing::warn!(error = %e, "lifecycle write dropped");
        }
    }
}

/// Applies queued commands in order. On cancellation the queue is closed
/// and whatever is already in it is still written.
pub fn spawn_worker(
    store: Arc<dyn SessionStore>,
    mut rx: mpsc::Receiver<StoreCommand>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                cmd = rx.recv() => match cmd {
                    Some(cmd) => apply(store.as_ref(), cmd).await,
                    None => break,
                },
                _ = cancel.cancelled() => {
                    rx.close();
                    while let Some(cmd) = rx.recv().await {
                        apply(store.as_ref(), cmd).await;
                    }
                    break;
                }
            }
        }
        tracing::debug!("persist worker stopped");
    })
}

async fn apply(store: &dyn SessionStore, cmd: StoreCommand) {
    let result = match &cmd {
        StoreCommand::Connected(room) => store.mark_connected(room).await,
        StoreCommand::Ended(room, cause) => store.mark_ended(room, *cause).await,
    };
    if let Err(e) = result {
        tracing::warn!(?cmd, error = %e, "lifecycle write failed");
    }
}
