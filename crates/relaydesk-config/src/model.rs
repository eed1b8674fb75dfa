// SPDX-FileCopyrightText: 2026 Relaydesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup, providing actionable error messages.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Top-level relaydesk configuration.
///
/// Loaded from TOML files following XDG hierarchy, with environment variable overrides.
/// All sections are optional and default to sensible values.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RelaydeskConfig {
    /// HTTP/WebSocket listener settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Operator authentication.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Session record storage.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Room lifecycle and relay policy.
    #[serde(default)]
    pub chat: ChatConfig,

    /// Client reconnect schedule.
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
        }
    }
}

impl ServerConfig {
    /// `host:port` suitable for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Operator authentication configuration.
///
/// Operator surfaces fail closed: with no token configured every operator
/// request is refused.
#[derive(Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    /// Shared secret presented by operator consoles.
    #[serde(default)]
    pub operator_token: Option<String>,
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field(
                "operator_token",
                &self.operator_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

/// Storage backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Enable WAL (Write-Ahead Logging) mode for SQLite.
    #[serde(default = "default_wal_mode")]
    pub wal_mode: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            wal_mode: default_wal_mode(),
        }
    }
}

fn default_database_path() -> String {
    dirs::data_dir()
        .map(|p| p.join("relaydesk").join("relaydesk.db"))
        .unwrap_or_else(|| std::path::PathBuf::from("relaydesk.db"))
        .to_string_lossy()
        .into_owned()
}

fn default_wal_mode() -> bool {
    true
}

/// Room lifecycle and relay policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ChatConfig {
    /// Refuse operator end signals that carry no type, note, or detail.
    #[serde(default = "default_require_end_metadata")]
    pub require_end_metadata: bool,

    /// Seconds a room may sit with zero connections before it is dropped.
    #[serde(default = "default_room_grace_secs")]
    pub room_grace_secs: u64,

    /// How often the idle-room sweeper runs.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Per-connection outbound queue depth. A full queue marks the member dead.
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,

    /// Upper bound on concurrently tracked rooms.
    #[serde(default = "default_max_rooms")]
    pub max_rooms: usize,

    /// Default page size for the recent-sessions list.
    #[serde(default = "default_recent_sessions_limit")]
    pub recent_sessions_limit: usize,

    /// Text returned to a visitor whose chat request was accepted.
    #[serde(default = "default_greeting")]
    pub greeting: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            require_end_metadata: default_require_end_metadata(),
            room_grace_secs: default_room_grace_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            outbound_buffer: default_outbound_buffer(),
            max_rooms: default_max_rooms(),
            recent_sessions_limit: default_recent_sessions_limit(),
            greeting: default_greeting(),
        }
    }
}

fn default_require_end_metadata() -> bool {
    true
}

fn default_room_grace_secs() -> u64 {
    300
}

fn default_sweep_interval_secs() -> u64 {
    30
}

fn default_outbound_buffer() -> usize {
    64
}

fn default_max_rooms() -> usize {
    256
}

fn default_recent_sessions_limit() -> usize {
    30
}

fn default_greeting() -> String {
    "Hello! An operator will be with you shortly. How can we help?".to_string()
}

/// Reconnect schedule used by lobby and room clients.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ReconnectConfig {
    /// First lobby retry delay.
    #[serde(default = "default_lobby_initial_ms")]
    pub lobby_initial_ms: u64,

    /// Added to the lobby delay after each consecutive failure.
    #[serde(default = "default_lobby_step_ms")]
    pub lobby_step_ms: u64,

    /// Lobby delay cap.
    #[serde(default = "default_lobby_max_ms")]
    pub lobby_max_ms: u64,

    /// Fixed delay between room reconnect attempts.
    #[serde(default = "default_room_delay_ms")]
    pub room_delay_ms: u64,

    /// Consecutive failures after which a client gives up. 0 retries forever.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            lobby_initial_ms: default_lobby_initial_ms(),
            lobby_step_ms: default_lobby_step_ms(),
            lobby_max_ms: default_lobby_max_ms(),
            room_delay_ms: default_room_delay_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

fn default_lobby_initial_ms() -> u64 {
    2000
}

fn default_lobby_step_ms() -> u64 {
    1000
}

fn default_lobby_max_ms() -> u64 {
    10_000
}

fn default_room_delay_ms() -> u64 {
    1500
}

fn default_max_attempts() -> u32 {
    50
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_debug_redacts_token() {
        let auth = AuthConfig {
            operator_token: Some("s3cret".into()),
        };
        let debug = format!("{auth:?}");
        assert!(!debug.contains("s3cret"));
        assert!(debug.contains("REDACTED"));
    }

    #[test]
    fn bind_addr_joins_host_and_port() {
        let server = ServerConfig {
            host: "0.0.0.0".into(),
            port: 9000,
            ..Default::default()
        };
        assert_eq!(server.bind_addr(), "0.0.0.0:9000");
    }

    #[test]
    fn partial_chat_section_keeps_other_defaults() {
        let config: RelaydeskConfig = toml::from_str("[chat]\nroom_grace_secs = 60\n").unwrap();
        assert_eq!(config.chat.room_grace_secs, 60);
        assert_eq!(config.chat.outbound_buffer, 64);
        assert!(config.chat.require_end_metadata);
    }
}
