// SPDX-FileCopyrightText: 2026 Relaydesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Periodic removal of idle rooms.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::registry::RoomRegistry;

/// Runs [`RoomRegistry::sweep_idle`] every `interval` until cancelled.
pub fn spawn(
    registry: Arc<RoomRegistry>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let removed = registry.sweep_idle(Instant::now());
                    if removed > 0 {
                        tracing::debug!(removed, remaining = registry.room_count(), "sweep finished");
                    }
                }
            }
        }
        tracing::debug!("room sweeper stopped");
    })
}
