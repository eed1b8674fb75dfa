// SPDX-FileCopyrightText: 2026 Relaydesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Persistence traits for finalized and in-flight session records.

use async_trait::async_trait;

use crate::error::RelaydeskError;
use crate::traits::adapter::Adapter;
use crate::types::{EndCause, PageInfo, RoomId, SaveSession, SessionId, SessionRecord};

/// The save/delete/list contract the chat core depends on.
///
/// Implemented by the SQLite store on the server and by the HTTP client on
/// the console side. Callers only invoke `save` for rooms that have ended and
/// broadcast `session_saved` on the lobby after it succeeds.
#[async_trait]
pub trait PersistenceGateway: Adapter {
    /// Saves the operator's final metadata and returns the stored record.
    ///
    /// Repeated saves for the same session update one record.
    async fn save(&self, record: &SaveSession) -> Result<SessionRecord, RelaydeskError>;

    /// Deletes one record. Returns the number of rows removed (0 or 1).
    async fn delete(&self, id: SessionId) -> Result<u64, RelaydeskError>;

    /// Most recent records, newest first.
    async fn list_recent(&self, limit: usize) -> Result<Vec<SessionRecord>, RelaydeskError>;
}

/// Server-side store that also tracks records while a room is live.
#[async_trait]
pub trait SessionStore: PersistenceGateway {
    /// Returns the newest not-ended record for `room`, creating a waiting one
    /// when none exists.
    async fn open_request(
        &self,
        room: &RoomId,
        page: &PageInfo,
        requester_url: Option<&str>,
    ) -> Result<SessionRecord, RelaydeskError>;

    /// Records that an operator joined the room.
    async fn mark_connected(&self, room: &RoomId) -> Result<(), RelaydeskError>;

    /// Records that the room ended. Does not touch already-ended records.
    async fn mark_ended(&self, room: &RoomId, cause: EndCause) -> Result<(), RelaydeskError>;

    async fn get(&self, id: SessionId) -> Result<Option<SessionRecord>, RelaydeskError>;

    /// Ends every record created today that has not ended. Returns the count.
    async fn cleanup_today(&self) -> Result<u64, RelaydeskError>;
}
