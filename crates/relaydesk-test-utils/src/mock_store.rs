// SPDX-FileCopyrightText: 2026 Relaydesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory [`SessionStore`] with failure injection.
//!
//! Follows the same targeting rules as the SQLite store so gateway tests can
//! swap it in, and can be told to fail every call to exercise error paths.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use relaydesk_core::types::now_iso;
use relaydesk_core::{
    Adapter, AdapterType, EndCause, EndMetadata, HealthStatus, PageInfo, PersistenceGateway,
    RelaydeskError, RoomId, RoomState, SaveSession, SessionId, SessionRecord, SessionStore,
};
use tokio::sync::Mutex;

#[derive(Debug, Default)]
pub struct MockSessionStore {
    records: Mutex<Vec<SessionRecord>>,
    next_id: AtomicUsize,
    failing: AtomicBool,
    saves: AtomicUsize,
}

impl MockSessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following call fail with a storage error until reset.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of successful `save` calls.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub async fn records(&self) -> Vec<SessionRecord> {
        self.records.lock().await.clone()
    }

    fn check(&self) -> Result<(), RelaydeskError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(RelaydeskError::storage("injected failure"));
        }
        Ok(())
    }

    fn insert(&self, records: &mut Vec<SessionRecord>, room: &str, status: RoomState) -> usize {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) as i64 + 1;
        records.push(SessionRecord {
            id: SessionId(id),
            room: room.to_string(),
            source: "web".into(),
            status,
            page_title: None,
            page_path: None,
            requester_url: None,
            metadata: EndMetadata::default(),
            end_cause: None,
            created_at: now_iso(),
            connected_at: None,
            ended_at: None,
            saved_at: None,
        });
        records.len() - 1
    }
}

fn newest_open(records: &[SessionRecord], room: &str) -> Option<usize> {
    records
        .iter()
        .rposition(|r| r.room == room && r.status != RoomState::Ended)
}

#[async_trait]
impl Adapter for MockSessionStore {
    fn name(&self) -> &str {
        "mock-store"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Storage
    }

    async fn health_check(&self) -> Result<HealthStatus, RelaydeskError> {
        if self.failing.load(Ordering::SeqCst) {
            Ok(HealthStatus::Unhealthy("injected failure".into()))
        } else {
            Ok(HealthStatus::Healthy)
        }
    }

    async fn shutdown(&self) -> Result<(), RelaydeskError> {
        Ok(())
    }
}

#[async_trait]
impl PersistenceGateway for MockSessionStore {
    async fn save(&self, save: &SaveSession) -> Result<SessionRecord, RelaydeskError> {
        self.check()?;
        let mut records = self.records.lock().await;
        let by_id = save
            .session_id
            .and_then(|id| records.iter().position(|r| r.id == id));
        let idx = match (by_id, save.room.as_deref()) {
            (Some(idx), _) => idx,
            (None, Some(room)) => match records.iter().rposition(|r| r.room == room) {
                Some(idx) => idx,
                None => self.insert(&mut records, room, RoomState::Ended),
            },
            (None, None) => {
                return Err(match save.session_id {
                    Some(id) => RelaydeskError::NotFound {
                        kind: "session",
                        id: id.to_string(),
                    },
                    None => RelaydeskError::Protocol {
                        message: "save requires a session_id or a room".into(),
                    },
                });
            }
        };
        let now = now_iso();
        let record = &mut records[idx];
        record.status = RoomState::Ended;
        record.metadata = save.metadata.clone();
        record.end_cause = record.end_cause.or(save.end_cause);
        if record.ended_at.is_none() {
            record.ended_at = Some(now.clone());
        }
        record.saved_at = Some(now);
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(record.clone())
    }

    async fn delete(&self, id: SessionId) -> Result<u64, RelaydeskError> {
        self.check()?;
        let mut records = self.records.lock().await;
        let before = records.len();
        records.retain(|r| r.id != id);
        Ok((before - records.len()) as u64)
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<SessionRecord>, RelaydeskError> {
        self.check()?;
        let records = self.records.lock().await;
        Ok(records.iter().rev().take(limit).cloned().collect())
    }
}

#[async_trait]
impl SessionStore for MockSessionStore {
    async fn open_request(
        &self,
        room: &RoomId,
        page: &PageInfo,
        requester_url: Option<&str>,
    ) -> Result<SessionRecord, RelaydeskError> {
        self.check()?;
        let mut records = self.records.lock().await;
        let idx = match newest_open(&records, room.as_str()) {
            Some(idx) => idx,
            None => self.insert(&mut records, room.as_str(), RoomState::Waiting),
        };
        let record = &mut records[idx];
        if page.title.is_some() {
            record.page_title = page.title.clone();
        }
        if page.path.is_some() {
            record.page_path = page.path.clone();
        }
        if let Some(url) = requester_url {
            record.requester_url = Some(url.to_string());
        }
        Ok(record.clone())
    }

    async fn mark_connected(&self, room: &RoomId) -> Result<(), RelaydeskError> {
        self.check()?;
        let mut records = self.records.lock().await;
        let idx = match newest_open(&records, room.as_str()) {
            Some(idx) => idx,
            None => self.insert(&mut records, room.as_str(), RoomState::Active),
        };
        let record = &mut records[idx];
        record.status = RoomState::Active;
        if record.connected_at.is_none() {
            record.connected_at = Some(now_iso());
        }
        Ok(())
    }

    async fn mark_ended(&self, room: &RoomId, cause: EndCause) -> Result<(), RelaydeskError> {
        self.check()?;
        let mut records = self.records.lock().await;
        if let Some(idx) = newest_open(&records, room.as_str()) {
            let record = &mut records[idx];
            record.status = RoomState::Ended;
            record.end_cause = Some(cause);
            record.ended_at = Some(now_iso());
        }
        Ok(())
    }

    async fn get(&self, id: SessionId) -> Result<Option<SessionRecord>, RelaydeskError> {
        self.check()?;
        let records = self.records.lock().await;
        Ok(records.iter().find(|r| r.id == id).cloned())
    }

    async fn cleanup_today(&self) -> Result<u64, RelaydeskError> {
        self.check()?;
        let today = chrono::Utc::now().format("%Y-%m-%d").to_string();
        let now = now_iso();
        let mut records = self.records.lock().await;
        let mut updated = 0;
        for record in records
            .iter_mut()
            .filter(|r| r.status != RoomState::Ended && r.created_at.starts_with(&today))
        {
            record.status = RoomState::Ended;
            if record.ended_at.is_none() {
                record.ended_at = Some(now.clone());
            }
            updated += 1;
        }
        Ok(updated)
    }
}
