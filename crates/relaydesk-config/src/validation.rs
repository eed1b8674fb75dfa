// SPDX-FileCopyrightText: 2026 Relaydesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Validates semantic constraints that cannot be expressed via serde attributes,
//! such as valid bind hosts, non-empty paths, and ordered delay bounds.

use crate::diagnostic::ConfigError;
use crate::model::RelaydeskConfig;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Validate a deserialized configuration for semantic correctness.
///
/// Returns `Ok(())` if all validations pass, or `Err(Vec<ConfigError>)` with
/// all collected validation errors (does not fail fast).
pub fn validate_config(config: &RelaydeskConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();
    let mut fail = |message: String| errors.push(ConfigError::Validation { message });

    let host = config.server.host.trim();
    if host.is_empty() {
        fail("server.host must not be empty".to_string());
    } else {
        let is_valid_ip = host.parse::<std::net::IpAddr>().is_ok();
        let is_valid_hostname = host
            .chars()
            .all(|c| c.is_alphanumeric() || c == '.' || c == '-' || c == ':');
        if !is_valid_ip && !is_valid_hostname {
            fail(format!(
                "server.host `{host}` is not a valid IP address or hostname"
            ));
        }
    }

    if !LOG_LEVELS.contains(&config.server.log_level.as_str()) {
        fail(format!(
            "server.log_level must be one of {}, got `{}`",
            LOG_LEVELS.join(", "),
            config.server.log_level
        ));
    }

    if let Some(token) = &config.auth.operator_token
        && token.trim().is_empty()
    {
        fail("auth.operator_token must not be empty when set".to_string());
    }

    if config.storage.database_path.trim().is_empty() {
        fail("storage.database_path must not be empty".to_string());
    }

    if config.chat.outbound_buffer < 1 {
        fail("chat.outbound_buffer must be at least 1".to_string());
    }

    if config.chat.sweep_interval_secs < 1 {
        fail("chat.sweep_interval_secs must be at least 1".to_string());
    }

    if config.chat.max_rooms < 1 {
        fail("chat.max_rooms must be at least 1".to_string());
    }

    if config.reconnect.lobby_initial_ms > config.reconnect.lobby_max_ms {
        fail(format!(
            "reconnect.lobby_initial_ms ({}) must not exceed reconnect.lobby_max_ms ({})",
            config.reconnect.lobby_initial_ms, config.reconnect.lobby_max_ms
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
