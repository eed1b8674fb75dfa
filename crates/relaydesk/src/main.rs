// SPDX-FileCopyrightText: 2026 Relaydesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Relaydesk - live-chat handoff relay between website visitors and operators.
//!
//! This is the binary entry point for the relay server.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

mod serve;
mod shutdown;
mod status;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use relaydesk_config::model::RelaydeskConfig;

/// Relaydesk - live-chat handoff relay.
#[derive(Parser, Debug)]
#[command(name = "relaydesk", version, about, long_about = None)]
struct Cli {
    /// Load configuration from this file instead of the standard locations.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the relay server.
    Serve,
    /// Show whether a relay is running and what it is doing.
    Status {
        /// Output machine-readable JSON.
        #[arg(long)]
        json: bool,
        /// Disable colors.
        #[arg(long)]
        plain: bool,
    },
    /// Inspect configuration.
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Validate the configuration and print the effective settings.
    Check,
}

fn load_config(path: Option<&PathBuf>) -> RelaydeskConfig {
    let loaded = match path {
        Some(path) => relaydesk_config::load_and_validate_path(path),
        None => relaydesk_config::load_and_validate(),
    };
    match loaded {
        Ok(config) => config,
        Err(errors) => {
            relaydesk_config::render_errors(&errors);
            std::process::exit(1);
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref());

    match cli.command {
        Some(Commands::Serve) => {
            if let Err(e) = serve::run_serve(config).await {
                eprintln!("error: {e}");
                std::process::exit(1);
            }
        }
        Some(Commands::Status { json, plain }) => {
            if let Err(e) = status::run_status(&config, json, plain).await {
                eprintln!("error: {e}");
                std::process::exit(1);
            }
        }
        Some(Commands::Config {
            action: ConfigCommands::Check,
        }) => {
            print_config_summary(&config);
        }
        None => {
            println!("relaydesk: use --help for available commands");
        }
    }
}

fn print_config_summary(config: &RelaydeskConfig) {
    println!("relaydesk: configuration is valid");
    println!("  listen:          {}", config.server.bind_addr());
    println!("  log level:       {}", config.server.log_level);
    println!("  database:        {}", config.storage.database_path);
    println!(
        "  operator access: {}",
        if config.auth.operator_token.is_some() {
            "token configured"
        } else {
            "disabled (no operator_token)"
        }
    );
    println!(
        "  end metadata:    {}",
        if config.chat.require_end_metadata {
            "required"
        } else {
            "optional"
        }
    );
}
