// SPDX-FileCopyrightText: 2026 Relaydesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Linear reconnect backoff.
//!
//! The delay before retry `n` (counting from zero) is `initial + step * n`,
//! capped at `max`. A successful open resets the count.

use std::time::Duration;

use relaydesk_config::model::ReconnectConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    initial: Duration,
    step: Duration,
    max: Duration,
    /// 0 retries forever.
    max_attempts: u32,
    attempt: u32,
}

impl Backoff {
    pub fn new(initial: Duration, step: Duration, max: Duration, max_attempts: u32) -> Self {
        Self {
            initial,
            step,
            max: max.max(initial),
            max_attempts,
            attempt: 0,
        }
    }

    /// Lobby schedule: 2s, then +1s per failure, capped at 10s.
    pub fn lobby() -> Self {
        Self::lobby_from_config(&ReconnectConfig::default())
    }

    /// Room schedule: a fixed 1.5s between attempts.
    pub fn room() -> Self {
        Self::room_from_config(&ReconnectConfig::default())
    }

    pub fn lobby_from_config(config: &ReconnectConfig) -> Self {
        Self::new(
            Duration::from_millis(config.lobby_initial_ms),
            Duration::from_millis(config.lobby_step_ms),
            Duration::from_millis(config.lobby_max_ms),
            config.max_attempts,
        )
    }

    pub fn room_from_config(config: &ReconnectConfig) -> Self {
        let delay = Duration::from_millis(config.room_delay_ms);
        Self::new(delay, Duration::ZERO, delay, config.max_attempts)
    }

    /// Failed attempts since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Records a failure and returns how long to wait before retrying, or
    /// `None` once `max_attempts` consecutive failures have been used up.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.max_attempts != 0 && self.attempt >= self.max_attempts {
            return None;
        }
        let delay = self.delay_for(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        Some(delay)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    fn delay_for(&self, n: u32) -> Duration {
        self.initial
            .saturating_add(self.step.saturating_mul(n))
            .min(self.max)
    }
}
