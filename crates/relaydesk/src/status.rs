// SPDX-FileCopyrightText: 2026 Relaydesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `relaydesk status` command implementation.
//!
//! Queries the running relay's `/health` and `/livechat/availability`
//! endpoints. Falls back gracefully when nothing is listening.

use std::io::IsTerminal;
use std::time::Duration;

use relaydesk_client::{Availability, GatewayHealth, HttpGateway};
use relaydesk_config::model::RelaydeskConfig;
use relaydesk_core::RelaydeskError;
use serde::Serialize;

const STATUS_TIMEOUT: Duration = Duration::from_secs(3);

/// Structured status output for `--json` mode.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub running: bool,
    pub status: String,
    pub uptime_secs: Option<u64>,
    pub uptime_human: Option<String>,
    pub rooms: Option<usize>,
    pub operators: Option<usize>,
    pub accepting_chats: Option<bool>,
    pub storage: Option<String>,
    pub endpoint: String,
}

/// Format seconds into a human-readable duration string.
fn format_uptime(secs: u64) -> String {
    let days = secs / 86400;
    let hours = (secs % 86400) / 3600;
    let minutes = (secs % 3600) / 60;

    if days > 0 {
        format!("{days}d {hours}h {minutes}m")
    } else if hours > 0 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m")
    }
}

/// Base URL for reaching a relay bound to `host`; wildcard binds are
/// reached over loopback.
fn endpoint_for(host: &str, port: u16) -> String {
    let host = match host {
        "0.0.0.0" | "" => "127.0.0.1",
        "::" | "[::]" => "[::1]",
        other => other,
    };
    format!("http://{host}:{port}")
}

fn build_status(
    endpoint: String,
    health: Option<GatewayHealth>,
    availability: Option<Availability>,
) -> StatusResponse {
    match health {
        Some(health) => StatusResponse {
            running: true,
            uptime_human: Some(format_uptime(health.uptime_secs)),
            uptime_secs: Some(health.uptime_secs),
            status: health.status,
            rooms: Some(health.rooms),
            operators: Some(health.operators),
            accepting_chats: availability.map(|a| a.available),
            storage: Some(health.storage),
            endpoint,
        },
        None => StatusResponse {
            running: false,
            status: "not running".to_string(),
            uptime_secs: None,
            uptime_human: None,
            rooms: None,
            operators: None,
            accepting_chats: None,
            storage: None,
            endpoint,
        },
    }
}

/// Run the `relaydesk status` command.
pub async fn run_status(
    config: &RelaydeskConfig,
    json: bool,
    plain: bool,
) -> Result<(), RelaydeskError> {
    let endpoint = endpoint_for(&config.server.host, config.server.port);
    let client = HttpGateway::with_timeout(vec![endpoint.clone()], None, STATUS_TIMEOUT)?;

    let health = client.health().await.ok();
    let availability = match health {
        Some(_) => client.availability().await.ok(),
        None => None,
    };
    let status = build_status(endpoint, health, availability);

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&status).unwrap_or_else(|_| "{}".to_string())
        );
    } else {
        let use_color = !plain && std::io::stdout().is_terminal();
        print_status(&status, use_color);
    }
    Ok(())
}

fn print_status(status: &StatusResponse, use_color: bool) {
    println!();
    println!("  relaydesk status");
    println!("  {}", "-".repeat(35));

    if !status.running {
        if use_color {
            use colored::Colorize;
            println!("    State:     {} {}", "✗".red(), "not running".red());
        } else {
            println!("    State:     [FAIL] not running");
        }
        println!("    Endpoint:  {}/health", status.endpoint);
        println!();
        println!("  Start with: relaydesk serve");
        println!();
        return;
    }

    let uptime = status.uptime_human.as_deref().unwrap_or("-");
    if use_color {
        use colored::Colorize;
        let state = if status.status == "ok" {
            format!("{} {}", "✓".green(), status.status.green())
        } else {
            format!("{} {}", "!".yellow(), status.status.yellow())
        };
        println!("    State:     {state} (uptime: {uptime})");
    } else {
        let tag = if status.status == "ok" { "[OK]" } else { "[WARN]" };
        println!("    State:     {tag} {} (uptime: {uptime})", status.status);
    }
    println!("    Rooms:     {}", status.rooms.unwrap_or(0));
    println!("    Operators: {}", status.operators.unwrap_or(0));
    match status.accepting_chats {
        Some(true) => println!("    Chats:     accepting"),
        Some(false) => println!("    Chats:     no operator online"),
        None => println!("    Chats:     unknown"),
    }
    if let Some(storage) = &status.storage {
        println!("    Storage:   {storage}");
    }
    println!();
}
