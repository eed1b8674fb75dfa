// SPDX-FileCopyrightText: 2026 Relaydesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-connection outbound handle.
//!
//! Each socket owns a bounded queue drained by its writer task. The registry
//! and lobby only ever `try_send` into it, so a slow or dead peer can never
//! stall a relay. A full or closed queue marks the member dead.
//!
//! Close requests bypass the queue: they are recorded on the handle and the
//! writer picks them up ahead of any backlog, so a member dropped for a full
//! queue is still told to go away.

use std::sync::{Arc, OnceLock};

use relaydesk_core::{Role, WireMessage};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use uuid::Uuid;

/// Work item for a connection's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// A JSON text frame.
    Frame(String),
    /// Send a close frame and stop writing.
    Close { code: u16, reason: String },
}

#[derive(Debug, Default)]
struct CloseSignal {
    frame: OnceLock<(u16, String)>,
    token: CancellationToken,
}

/// Cheap, cloneable address of one participant connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: Uuid,
    role: Role,
    tx: mpsc::Sender<String>,
    close: Arc<CloseSignal>,
}

/// Receiving half drained by the writer task.
#[derive(Debug)]
pub struct Outbox {
    rx: mpsc::Receiver<String>,
    close: Arc<CloseSignal>,
    finished: bool,
}

impl ConnectionHandle {
    /// Creates a handle and the outbox its writer task drains.
    pub fn new(role: Role, buffer: usize) -> (Self, Outbox) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let close = Arc::new(CloseSignal::default());
        let handle = Self {
            id: Uuid::new_v4(),
            role,
            tx,
            close: close.clone(),
        };
        let outbox = Outbox {
            rx,
            close,
            finished: false,
        };
        (handle, outbox)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Queues a frame without waiting. `false` means the member is dead.
    pub fn deliver(&self, frame: &str) -> bool {
        !self.is_closing() && self.tx.try_send(frame.to_owned()).is_ok()
    }

    /// Serializes and queues a message. `false` means the member is dead
    /// or the message could not be encoded.
    pub fn deliver_msg(&self, msg: &WireMessage) -> bool {
        match msg.encode() {
            Ok(text) => self.deliver(&text),
            Err(e) => {
                tracing::error!(error = %e, "failed to encode outbound frame");
                false
            }
        }
    }

    /// Asks the writer to close the socket. The first request wins and is
    /// never lost to a full queue.
    pub fn close(&self, code: u16, reason: &str) {
        if self.close.frame.set((code, reason.to_string())).is_ok() {
            self.close.token.cancel();
        }
    }

    /// Whether a close has been requested.
    pub fn is_closing(&self) -> bool {
        self.close.token.is_cancelled()
    }

    /// Resolves once a close has been requested.
    pub fn closing(&self) -> WaitForCancellationFuture<'_> {
        self.close.token.cancelled()
    }
}

impl Outbox {
    fn close_item(&mut self) -> Option<Outbound> {
        self.finished = true;
        self.close
            .frame
            .get()
            .map(|(code, reason)| Outbound::Close {
                code: *code,
                reason: reason.clone(),
            })
    }

    /// Next item for the writer. A pending close comes first and ends the
    /// stream; queued frames behind it are discarded.
    pub async fn recv(&mut self) -> Option<Outbound> {
        if self.finished {
            return None;
        }
        let close = self.close.clone();
        tokio::select! {
            biased;
            _ = close.token.cancelled() => self.close_item(),
            frame = self.rx.recv() => frame.map(Outbound::Frame),
        }
    }

    pub fn try_recv(&mut self) -> Result<Outbound, TryRecvError> {
        if self.finished {
            return Err(TryRecvError::Disconnected);
        }
        if self.close.token.is_cancelled() {
            return self.close_item().ok_or(TryRecvError::Disconnected);
        }
        self.rx.try_recv().map(Outbound::Frame)
    }
}
