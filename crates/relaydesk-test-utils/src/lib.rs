// SPDX-FileCopyrightText: 2026 Relaydesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for relaydesk integration tests.
//!
//! # Components
//!
//! - [`TestHarness`] - a gateway on an ephemeral port with temp storage
//! - [`TestSocket`] - raw JSON WebSocket client for the lobby and rooms
//! - [`MockSessionStore`] - in-memory session store with failure injection

pub mod harness;
pub mod mock_store;

pub use harness::{OPERATOR_TOKEN, TestHarness, TestSocket};
pub use mock_store::MockSessionStore;
