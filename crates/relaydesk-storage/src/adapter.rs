// SPDX-FileCopyrightText: 2026 Relaydesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite implementation of the session store traits.

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use relaydesk_config::model::StorageConfig;
use relaydesk_core::{
    Adapter, AdapterType, EndCause, HealthStatus, PageInfo, PersistenceGateway, RelaydeskError,
    RoomId, SaveSession, SessionId, SessionRecord, SessionStore,
};

use crate::database::{map_tr_err, Database};
use crate::queries::sessions;

/// SQLite-backed session store.
///
/// The database is opened by [`SqliteSessionStore::initialize`]; every other
/// operation fails with a storage error until then.
pub struct SqliteSessionStore {
    config: StorageConfig,
    db: OnceCell<Database>,
}

impl SqliteSessionStore {
    /// Create a new store. The database is not opened until [`initialize`](Self::initialize).
    pub fn new(config: StorageConfig) -> Self {
        Self {
            config,
            db: OnceCell::new(),
        }
    }

    /// Opens the database and applies migrations.
    pub async fn initialize(&self) -> Result<(), RelaydeskError> {
        let db = Database::open(&self.config.database_path, self.config.wal_mode).await?;
        self.db
            .set(db)
            .map_err(|_| RelaydeskError::storage("storage already initialized"))?;
        info!(path = %self.config.database_path, "session store initialized");
        Ok(())
    }

    fn db(&self) -> Result<&Database, RelaydeskError> {
        self.db
            .get()
            .ok_or_else(|| RelaydeskError::storage("storage not initialized -- call initialize() first"))
    }

    async fn checkpoint(&self, db: &Database) -> Result<(), RelaydeskError> {
        db.connection()
            .call(|conn| -> Result<(), rusqlite::Error> {
                conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")
            })
            .await
            .map_err(map_tr_err)
    }
}

#[async_trait]
impl Adapter for SqliteSessionStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Storage
    }

    async fn health_check(&self) -> Result<HealthStatus, RelaydeskError> {
        let Ok(db) = self.db() else {
            return Ok(HealthStatus::Unhealthy("storage not initialized".into()));
        };
        let probe = db
            .connection()
            .call(|conn| -> Result<(), rusqlite::Error> { conn.execute_batch("SELECT 1;") })
            .await;
        Ok(match probe {
            Ok(()) => HealthStatus::Healthy,
            Err(e) => HealthStatus::Unhealthy(e.to_string()),
        })
    }

    async fn shutdown(&self) -> Result<(), RelaydeskError> {
        if let Some(db) = self.db.get() {
            self.checkpoint(db).await?;
            debug!("shutdown: WAL checkpoint complete");
        }
        Ok(())
    }
}

#[async_trait]
impl PersistenceGateway for SqliteSessionStore {
    async fn save(&self, record: &SaveSession) -> Result<SessionRecord, RelaydeskError> {
        sessions::save(self.db()?, record).await
    }

    async fn delete(&self, id: SessionId) -> Result<u64, RelaydeskError> {
        sessions::delete(self.db()?, id).await
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<SessionRecord>, RelaydeskError> {
        sessions::list_recent(self.db()?, limit).await
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn open_request(
        &self,
        room: &RoomId,
        page: &PageInfo,
        requester_url: Option<&str>,
    ) -> Result<SessionRecord, RelaydeskError> {
        sessions::open_request(self.db()?, room, page, requester_url).await
    }

    async fn mark_connected(&self, room: &RoomId) -> Result<(), RelaydeskError> {
        sessions::mark_connected(self.db()?, room).await
    }

    async fn mark_ended(&self, room: &RoomId, cause: EndCause) -> Result<(), RelaydeskError> {
        sessions::mark_ended(self.db()?, room, cause).await
    }

    async fn get(&self, id: SessionId) -> Result<Option<SessionRecord>, RelaydeskError> {
        sessions::get(self.db()?, id).await
    }

    async fn cleanup_today(&self) -> Result<u64, RelaydeskError> {
        sessions::cleanup_today(self.db()?).await
    }
}
