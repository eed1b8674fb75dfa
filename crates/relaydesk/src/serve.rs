// SPDX-FileCopyrightText: 2026 Relaydesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `relaydesk serve` command implementation.
//!
//! Opens the session store, starts the gateway, and runs until SIGINT or
//! SIGTERM. On shutdown the gateway drains its lifecycle writer before the
//! store is checkpointed.

use std::sync::Arc;

use relaydesk_config::model::RelaydeskConfig;
use relaydesk_core::{Adapter, RelaydeskError, SessionStore};
use relaydesk_gateway::Gateway;
use relaydesk_storage::SqliteSessionStore;
use tracing::{info, warn};

use crate::shutdown;

/// Runs the relay until a shutdown signal arrives.
pub async fn run_serve(config: RelaydeskConfig) -> Result<(), RelaydeskError> {
    init_tracing(&config.server.log_level);

    if config.auth.operator_token.is_none() {
        warn!("no operator_token configured, operator connections will be refused");
    }

    let store = Arc::new(SqliteSessionStore::new(config.storage.clone()));
    store.initialize().await?;

    let gateway = Gateway::new(&config, store.clone() as Arc<dyn SessionStore>);
    let addr = gateway.start().await?;
    info!(
        addr = %addr,
        version = env!("CARGO_PKG_VERSION"),
        "relaydesk ready"
    );

    let cancel = shutdown::install_signal_handler();
    let gateway_cancel = gateway.cancel_token();
    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = gateway_cancel.cancelled() => {
            warn!("gateway stopped on its own");
        }
    }

    gateway.shutdown().await?;
    if let Err(e) = store.shutdown().await {
        warn!(error = %e, "session store shutdown failed");
    }
    info!("relaydesk stopped");
    Ok(())
}

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured level.
fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("relaydesk={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .init();
}
