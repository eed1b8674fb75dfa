// SPDX-FileCopyrightText: 2026 Relaydesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Live-chat session record operations.

use std::str::FromStr;

use relaydesk_core::{
    EndCause, EndMetadata, PageInfo, RelaydeskError, RoomId, RoomState, SaveSession, SessionId,
    SessionRecord,
};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::database::{map_tr_err, Database};

const NOW: &str = "strftime('%Y-%m-%dT%H:%M:%fZ', 'now')";

const COLUMNS: &str = "id, room, source, status, page_title, page_path, requester_url,
     session_type, session_note, session_detail, end_cause,
     created_at, connected_at, ended_at, saved_at";

fn parse_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<SessionRecord> {
    let end_cause = match row.get::<_, Option<String>>(10)? {
        Some(_) => Some(parse_column::<EndCause>(row, 10)?),
        None => None,
    };
    Ok(SessionRecord {
        id: SessionId(row.get(0)?),
        room: row.get(1)?,
        source: row.get(2)?,
        status: parse_column::<RoomState>(row, 3)?,
        page_title: row.get(4)?,
        page_path: row.get(5)?,
        requester_url: row.get(6)?,
        metadata: EndMetadata {
            session_type: row.get(7)?,
            session_note: row.get(8)?,
            session_detail: row.get(9)?,
        },
        end_cause,
        created_at: row.get(11)?,
        connected_at: row.get(12)?,
        ended_at: row.get(13)?,
        saved_at: row.get(14)?,
    })
}

fn select_by_id(conn: &Connection, id: i64) -> rusqlite::Result<Option<SessionRecord>> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM live_chat_sessions WHERE id = ?1"),
        params![id],
        row_to_record,
    )
    .optional()
}

fn newest_open_id(conn: &Connection, room: &str) -> rusqlite::Result<Option<i64>> {
    conn.query_row(
        "SELECT id FROM live_chat_sessions
         WHERE room = ?1 AND status != 'ended'
         ORDER BY id DESC LIMIT 1",
        params![room],
        |row| row.get(0),
    )
    .optional()
}

fn newest_id(conn: &Connection, room: &str) -> rusqlite::Result<Option<i64>> {
    conn.query_row(
        "SELECT id FROM live_chat_sessions WHERE room = ?1 ORDER BY id DESC LIMIT 1",
        params![room],
        |row| row.get(0),
    )
    .optional()
}

fn insert(conn: &Connection, room: &str, status: RoomState) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO live_chat_sessions (room, status) VALUES (?1, ?2)",
        params![room, status.to_string()],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Returns the newest not-ended record for `room`, or creates a waiting one.
///
/// Page details are refreshed on the reused record when provided.
pub async fn open_request(
    db: &Database,
    room: &RoomId,
    page: &PageInfo,
    requester_url: Option<&str>,
) -> Result<SessionRecord, RelaydeskError> {
    let room = room.to_string();
    let page = page.clone();
    let requester_url = requester_url.map(str::to_string);
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let id = match newest_open_id(&tx, &room)? {
                Some(id) => id,
                None => insert(&tx, &room, RoomState::Waiting)?,
            };
            tx.execute(
                "UPDATE live_chat_sessions SET
                    page_title = COALESCE(?2, page_title),
                    page_path = COALESCE(?3, page_path),
                    requester_url = COALESCE(?4, requester_url)
                 WHERE id = ?1",
                params![id, page.title, page.path, requester_url],
            )?;
            let record = select_by_id(&tx, id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)?;
            tx.commit()?;
            Ok(record)
        })
        .await
        .map_err(map_tr_err)
}

/// Marks the room's open record active, creating one if the visitor never
/// filed a request.
pub async fn mark_connected(db: &Database, room: &RoomId) -> Result<(), RelaydeskError> {
    let room = room.to_string();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let id = match newest_open_id(&tx, &room)? {
                Some(id) => id,
                None => insert(&tx, &room, RoomState::Active)?,
            };
            tx.execute(
                &format!(
                    "UPDATE live_chat_sessions SET status = 'active',
                        connected_at = COALESCE(connected_at, {NOW})
                     WHERE id = ?1"
                ),
                params![id],
            )?;
            tx.commit()
        })
        .await
        .map_err(map_tr_err)
}

/// Ends the room's open record. Already-ended records are left untouched.
pub async fn mark_ended(
    db: &Database,
    room: &RoomId,
    cause: EndCause,
) -> Result<(), RelaydeskError> {
    let room = room.to_string();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            if let Some(id) = newest_open_id(&tx, &room)? {
                tx.execute(
                    &format!(
                        "UPDATE live_chat_sessions SET status = 'ended',
                            ended_at = COALESCE(ended_at, {NOW}),
                            end_cause = COALESCE(end_cause, ?2)
                         WHERE id = ?1"
                    ),
                    params![id, cause.to_string()],
                )?;
            }
            tx.commit()
        })
        .await
        .map_err(map_tr_err)
}

/// Stores the operator's final metadata.
///
/// Targets the record named by `session_id`, else the newest record for
/// `room`, else inserts a new one. Saving again overwrites the metadata of
/// the same record.
pub async fn save(db: &Database, save: &SaveSession) -> Result<SessionRecord, RelaydeskError> {
    if save.session_id.is_none() && save.room.is_none() {
        return Err(RelaydeskError::Protocol {
            message: "save requires a session_id or a room".into(),
        });
    }
    let save = save.clone();
    let target = save.session_id;
    let record = db
        .connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let by_id = match save.session_id {
                Some(SessionId(id)) => tx
                    .query_row(
                        "SELECT id FROM live_chat_sessions WHERE id = ?1",
                        params![id],
                        |row| row.get::<_, i64>(0),
                    )
                    .optional()?,
                None => None,
            };
            let id = match (by_id, save.room.as_deref()) {
                (Some(id), _) => id,
                (None, Some(room)) => match newest_id(&tx, room)? {
                    Some(id) => id,
                    None => insert(&tx, room, RoomState::Ended)?,
                },
                (None, None) => return Ok(None),
            };
            tx.execute(
                &format!(
                    "UPDATE live_chat_sessions SET status = 'ended',
                        session_type = ?2, session_note = ?3, session_detail = ?4,
                        end_cause = COALESCE(end_cause, ?5),
                        ended_at = COALESCE(ended_at, {NOW}),
                        saved_at = {NOW}
                     WHERE id = ?1"
                ),
                params![
                    id,
                    save.metadata.session_type,
                    save.metadata.session_note,
                    save.metadata.session_detail,
                    save.end_cause.map(|c| c.to_string()),
                ],
            )?;
            let record = select_by_id(&tx, id)?;
            tx.commit()?;
            Ok(record)
        })
        .await
        .map_err(map_tr_err)?;

    record.ok_or_else(|| RelaydeskError::NotFound {
        kind: "session",
        id: target.map(|id| id.to_string()).unwrap_or_default(),
    })
}

pub async fn get(db: &Database, id: SessionId) -> Result<Option<SessionRecord>, RelaydeskError> {
    db.connection()
        .call(move |conn| select_by_id(conn, id.0))
        .await
        .map_err(map_tr_err)
}

/// Newest records first.
pub async fn list_recent(db: &Database, limit: usize) -> Result<Vec<SessionRecord>, RelaydeskError> {
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM live_chat_sessions ORDER BY id DESC LIMIT ?1"
            ))?;
            let rows = stmt.query_map(params![limit], row_to_record)?;
            rows.collect::<Result<Vec<_>, _>>()
        })
        .await
        .map_err(map_tr_err)
}

/// Deletes one record. Returns the number of rows removed.
pub async fn delete(db: &Database, id: SessionId) -> Result<u64, RelaydeskError> {
    db.connection()
        .call(move |conn| {
            conn.execute("DELETE FROM live_chat_sessions WHERE id = ?1", params![id.0])
        })
        .await
        .map(|n| n as u64)
        .map_err(map_tr_err)
}

/// Ends every record created today (UTC) that has not ended yet.
pub async fn cleanup_today(db: &Database) -> Result<u64, RelaydeskError> {
    db.connection()
        .call(|conn| {
            conn.execute(
                &format!(
                    "UPDATE live_chat_sessions SET status = 'ended',
                        ended_at = COALESCE(ended_at, {NOW})
                     WHERE status != 'ended'
                       AND substr(created_at, 1, 10) = strftime('%Y-%m-%d', 'now')"
                ),
                [],
            )
        })
        .await
        .map(|n| n as u64)
        .map_err(map_tr_err)
}
