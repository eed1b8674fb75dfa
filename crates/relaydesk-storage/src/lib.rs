// SPDX-FileCopyrightText: 2026 Relaydesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite persistence for live-chat session records.
//!
//! WAL-mode SQLite with embedded migrations and a single-writer model via
//! `tokio-rusqlite`: [`Database`] wraps the only connection, and every query
//! in [`queries`] runs as a closure on its background thread.

pub mod adapter;
pub mod database;
pub mod migrations;
pub mod queries;

pub use adapter::SqliteSessionStore;
pub use database::Database;
