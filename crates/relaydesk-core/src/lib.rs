// SPDX-FileCopyrightText: 2026 Relaydesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the relaydesk live-chat relay.
//!
//! This crate provides the error type, identifiers, the wire protocol, the
//! per-room session state machine, and the persistence traits used
//! throughout the relaydesk workspace. It performs no I/O of its own.

pub mod error;
pub mod protocol;
pub mod session;
pub mod traits;
pub mod types;

// Re-export key items at crate root for ergonomic imports.
pub use error::{PolicyViolation, RelaydeskError};
pub use protocol::{ChatMessage, LobbyEvent, RoomEvent, SessionSaved, WireMessage};
pub use session::{EndOutcome, SessionMachine, Transition};
pub use types::{
    AdapterType, EndCause, EndMetadata, HandoffRequest, HealthStatus, PageInfo, Role, RoomId,
    RoomState, SaveSession, SessionId, SessionRecord,
};

pub use traits::{Adapter, PersistenceGateway, SessionStore};
