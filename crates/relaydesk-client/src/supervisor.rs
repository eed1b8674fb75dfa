// SPDX-FileCopyrightText: 2026 Relaydesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Reconnecting wrapper around [`Connection`].
//!
//! A supervisor owns one logical link (the lobby or one room). After an
//! unclean close it waits out the [`Backoff`] delay and reconnects, then
//! re-sends its registration frames so the server sees the same joins as
//! on the first open. Cancelling its token, or dropping it, stops the link
//! and any pending retry timer. An explicit end or a successful save stops
//! reconnecting once the current socket closes.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use relaydesk_core::protocol::close;
use relaydesk_core::{RelaydeskError, RoomEvent, WireMessage};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backoff::Backoff;
use crate::connection::{CLOSE_ABNORMAL, Connection, ConnectionEvent};

const COMMAND_DEPTH: usize = 64;
const EVENT_DEPTH: usize = 256;
const CLOSE_WAIT: Duration = Duration::from_secs(2);

/// Link status shown to the participant as a persistent indicator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkStatus {
    Connecting,
    Connected,
    Retrying { attempt: u32, delay: Duration },
    Disconnected,
    GaveUp,
}

#[derive(Debug)]
pub struct Supervisor {
    url: String,
    status: watch::Receiver<LinkStatus>,
    commands: mpsc::Sender<WireMessage>,
    events: mpsc::Receiver<ConnectionEvent>,
    reconnect: Arc<AtomicBool>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Supervisor {
    /// Starts the link. `registration` is sent after every successful open.
    /// The link stops when `parent` is cancelled.
    pub fn spawn(
        url: impl Into<String>,
        backoff: Backoff,
        registration: Vec<WireMessage>,
        parent: &CancellationToken,
    ) -> Self {
        let url = url.into();
        let (status_tx, status) = watch::channel(LinkStatus::Connecting);
        let (commands, commands_rx) = mpsc::channel(COMMAND_DEPTH);
        let (events_tx, events) = mpsc::channel(EVENT_DEPTH);
        let reconnect = Arc::new(AtomicBool::new(true));
        let cancel = parent.child_token();

        let link = Link {
            url: url.clone(),
            backoff,
            registration,
            status: status_tx,
            commands: commands_rx,
            events: events_tx,
            reconnect: reconnect.clone(),
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(link.run());

        Self {
            url,
            status,
            commands,
            events,
            reconnect,
            cancel,
            task: Some(task),
        }
    }

    pub fn status(&self) -> LinkStatus {
        self.status.borrow().clone()
    }

    /// A receiver that observes every status change.
    pub fn watch_status(&self) -> watch::Receiver<LinkStatus> {
        self.status.clone()
    }

    /// Sends a frame on the live connection. Fails at once while the link
    /// is connecting, retrying, or down; nothing is queued for later.
    pub fn send(&self, msg: WireMessage) -> Result<(), RelaydeskError> {
        let status = self.status();
        if status != LinkStatus::Connected {
            return Err(RelaydeskError::transport(format!(
                "{} is not connected ({status:?})",
                self.url
            )));
        }
        self.commands
            .try_send(msg)
            .map_err(|e| RelaydeskError::transport(format!("send to {} failed: {e}", self.url)))
    }

    pub async fn next_event(&mut self) -> Option<ConnectionEvent> {
        self.events.recv().await
    }

    /// Sends a room `end` or `closed` frame. Once it is out the link does not
    /// reconnect; the final state still arrives on the open socket.
    pub fn send_end(&self, msg: WireMessage) -> Result<(), RelaydeskError> {
        let ends_room = RoomEvent::try_from(msg.clone()).is_ok_and(|event| event.is_end_signal());
        if !ends_room {
            return Err(RelaydeskError::Protocol {
                message: format!("send_end on {} needs an end or closed frame", self.url),
            });
        }
        self.send(msg)?;
        self.disable_reconnect();
        Ok(())
    }

    /// Records that the room's session was saved. A later drop is final.
    pub fn mark_saved(&self) {
        info!(url = %self.url, "session saved; reconnect disabled");
        self.disable_reconnect();
    }

    fn disable_reconnect(&self) {
        self.reconnect.store(false, Ordering::Release);
    }

    /// Closes the link cleanly and waits for the supervisor task.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

enum Exit {
    Cancelled,
    Closed { code: u16, was_clean: bool },
}

struct Link {
    url: String,
    backoff: Backoff,
    registration: Vec<WireMessage>,
    status: watch::Sender<LinkStatus>,
    commands: mpsc::Receiver<WireMessage>,
    events: mpsc::Sender<ConnectionEvent>,
    reconnect: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl Link {
    async fn run(mut self) {
        let last = loop {
            self.status.send_replace(LinkStatus::Connecting);
            let opened = tokio::select! {
                _ = self.cancel.cancelled() => break LinkStatus::Disconnected,
                opened = Connection::open(&self.url) => opened,
            };

            match opened {
                Ok(conn) => {
                    self.backoff.reset();
                    match self.pump(conn).await {
                        Exit::Cancelled => break LinkStatus::Disconnected,
                        Exit::Closed { was_clean: true, .. } => {
                            info!(url = %self.url, "link closed cleanly");
                            break LinkStatus::Disconnected;
                        }
                        Exit::Closed { code: close::INVALID_ROOM, .. } => {
                            warn!(url = %self.url, "server refused the room; not reconnecting");
                            break LinkStatus::GaveUp;
                        }
                        Exit::Closed { code, .. } => {
                            warn!(url = %self.url, code, "link dropped");
                        }
                    }
                }
                Err(e) => warn!(url = %self.url, error = %e, "connect failed"),
            }

            if !self.reconnect.load(Ordering::Acquire) {
                debug!(url = %self.url, "reconnect disabled");
                break LinkStatus::Disconnected;
            }
            let Some(delay) = self.backoff.next_delay() else {
                warn!(url = %self.url, attempts = self.backoff.attempt(), "giving up reconnect");
                break LinkStatus::GaveUp;
            };
            self.status.send_replace(LinkStatus::Retrying {
                attempt: self.backoff.attempt(),
                delay,
            });
            debug!(url = %self.url, ?delay, "reconnect scheduled");
            tokio::select! {
                _ = self.cancel.cancelled() => break LinkStatus::Disconnected,
                _ = tokio::time::sleep(delay) => {}
            }
        };
        self.status.send_replace(last);
    }

    async fn pump(&mut self, mut conn: Connection) -> Exit {
        self.status.send_replace(LinkStatus::Connected);
        for frame in &self.registration {
            if let Err(e) = conn.send(frame) {
                warn!(url = %self.url, error = %e, "registration frame not sent");
            }
        }

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    conn.close(close::NORMAL, "client shutdown");
                    let drained = tokio::time::timeout(CLOSE_WAIT, async {
                        while let Some(event) = conn.next_event().await {
                            if matches!(event, ConnectionEvent::Closed { .. }) {
                                break;
                            }
                        }
                    });
                    let _ = drained.await;
                    return Exit::Cancelled;
                }
                Some(msg) = self.commands.recv() => {
                    if let Err(e) = conn.send(&msg) {
                        warn!(url = %self.url, error = %e, "frame not sent");
                    }
                }
                event = conn.next_event() => match event {
                    Some(ConnectionEvent::Closed { code, was_clean }) => {
                        self.forward(ConnectionEvent::Closed { code, was_clean });
                        return Exit::Closed { code, was_clean };
                    }
                    Some(other) => self.forward(other),
                    None => {
                        let code = CLOSE_ABNORMAL;
                        self.forward(ConnectionEvent::Closed { code, was_clean: false });
                        return Exit::Closed { code, was_clean: false };
                    }
                },
            }
        }
    }

    fn forward(&self, event: ConnectionEvent) {
        if let Err(e) = self.events.try_send(event) {
            warn!(url = %self.url, error = %e, "link event dropped");
        }
    }
}
