// SPDX-FileCopyrightText: 2026 Relaydesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loader using Figment for layered config merging.
//!
//! Supports XDG hierarchy: `./relaydesk.toml` > `~/.config/relaydesk/relaydesk.toml`
//! > `/etc/relaydesk/relaydesk.toml` with environment variable overrides via
//! the `RELAYDESK_` prefix.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};

use crate::model::RelaydeskConfig;

/// Top-level sections, in the order env keys are matched against them.
const SECTIONS: [&str; 5] = ["server", "auth", "storage", "chat", "reconnect"];

pub(crate) const SYSTEM_CONFIG: &str = "/etc/relaydesk/relaydesk.toml";
pub(crate) const LOCAL_CONFIG: &str = "relaydesk.toml";

pub(crate) fn user_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("relaydesk/relaydesk.toml"))
        .unwrap_or_default()
}

/// Load configuration from the standard XDG hierarchy with env var overrides.
///
/// Merge order (later overrides earlier):
/// 1. Compiled defaults
/// 2. `/etc/relaydesk/relaydesk.toml` (system-wide)
/// 3. `~/.config/relaydesk/relaydesk.toml` (user XDG config)
/// 4. `./relaydesk.toml` (local directory)
/// 5. `RELAYDESK_*` environment variables
pub fn load_config() -> Result<RelaydeskConfig, figment::Error> {
    build_figment().extract()
}

/// Load configuration from a TOML string only (no files, no environment).
pub fn load_config_from_str(toml_content: &str) -> Result<RelaydeskConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(RelaydeskConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load configuration from a specific file path with env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<RelaydeskConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(RelaydeskConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// Build the Figment used for config loading, before extraction.
pub fn build_figment() -> Figment {
    Figment::new()
        .merge(Serialized::defaults(RelaydeskConfig::default()))
        .merge(Toml::file(SYSTEM_CONFIG))
        .merge(Toml::file(user_config_path()))
        .merge(Toml::file(LOCAL_CONFIG))
        .merge(env_provider())
}

/// Environment provider with explicit section mapping.
///
/// Uses `Env::map()` and not `Env::split("_")`: `RELAYDESK_CHAT_ROOM_GRACE_SECS`
/// must map to `chat.room_grace_secs`, not `chat.room.grace.secs`.
fn env_provider() -> Env {
    Env::prefixed("RELAYDESK_").map(|key| env_key(key.as_str()).into())
}

/// Maps a lowercased, prefix-stripped env var name to a dotted config key.
pub(crate) fn env_key(key: &str) -> String {
    for section in SECTIONS {
        if let Some(rest) = key
            .strip_prefix(section)
            .and_then(|r| r.strip_prefix('_'))
            .filter(|r| !r.is_empty())
        {
            return format!("{section}.{rest}");
        }
    }
    key.to_string()
}
