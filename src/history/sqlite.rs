use super::store::HistoryStore;
use super::types::{Role, Session, Turn};
use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Error as SqlError, OptionalExtension, params, types::Type};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Durable session store over a single sqlite file.
///
/// `open` only establishes the connection; schema creation lives in
/// [`SqliteHistoryStore::migrate`], which the surrounding composition code
/// runs once at process startup.
pub struct SqliteHistoryStore {
    conn: Mutex<Connection>,
}

impl SqliteHistoryStore {
    pub fn open(db_path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Creates tables and indexes if they do not exist yet.
    pub fn migrate(&self) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS sessions (
                 id TEXT PRIMARY KEY,
                 owner_id TEXT NOT NULL,
                 title TEXT NOT NULL,
                 created_at TEXT NOT NULL,
                 last_message_at TEXT NOT NULL
             );

             CREATE TABLE IF NOT EXISTS turns (
                 id TEXT PRIMARY KEY,
                 session_id TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
                 role TEXT NOT NULL,
                 content TEXT NOT NULL,
                 metadata TEXT,
                 created_at TEXT NOT NULL
             );

             CREATE INDEX IF NOT EXISTS idx_turns_session
                 ON turns(session_id, created_at);

             CREATE INDEX IF NOT EXISTS idx_sessions_owner
                 ON sessions(owner_id, last_message_at);",
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn parse_timestamp(value: &str, column_index: usize) -> rusqlite::Result<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(value)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(|error| {
                SqlError::FromSqlConversionFailure(column_index, Type::Text, Box::new(error))
            })
    }

    fn map_session_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Session> {
        let created_raw: String = row.get(3)?;
        let last_raw: String = row.get(4)?;
        Ok(Session {
            id: row.get(0)?,
            owner_id: row.get(1)?,
            title: row.get(2)?,
            created_at: Self::parse_timestamp(&created_raw, 3)?,
            last_message_at: Self::parse_timestamp(&last_raw, 4)?,
            turns: Vec::new(),
        })
    }

    fn map_turn_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Turn> {
        let role_raw: String = row.get(1)?;
        let role = Role::from_wire(&role_raw);
        if role == Role::Assistant && role_raw != "assistant" {
            // Tolerated by contract; logged so a genuinely corrupt row is
            // still visible.
            tracing::warn!(role = %role_raw, "unrecognized stored role, treating as assistant");
        }

        let metadata_raw: Option<String> = row.get(3)?;
        let metadata = metadata_raw
            .map(|value| {
                serde_json::from_str::<serde_json::Value>(&value).map_err(|error| {
                    SqlError::FromSqlConversionFailure(3, Type::Text, Box::new(error))
                })
            })
            .transpose()?;

        let created_raw: String = row.get(4)?;
        Ok(Turn {
            id: row.get(0)?,
            role,
            content: row.get(2)?,
            metadata,
            timestamp: Self::parse_timestamp(&created_raw, 4)?,
        })
    }

    fn load_turns(conn: &Connection, session_id: &str) -> Result<Vec<Turn>, StoreError> {
        let mut stmt = conn.prepare(
            "SELECT id, role, content, metadata, created_at
             FROM turns
             WHERE session_id = ?1
             ORDER BY created_at ASC",
        )?;
        let rows = stmt.query_map(params![session_id], Self::map_turn_row)?;

        let mut turns = Vec::new();
        for row in rows {
            turns.push(row?);
        }
        Ok(turns)
    }
}

#[async_trait]
impl HistoryStore for SqliteHistoryStore {
    async fn create_session(&self, owner_id: &str, title: &str) -> Result<Session, StoreError> {
        let session = Session::new(owner_id, title);
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO sessions (id, owner_id, title, created_at, last_message_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            params![
                session.id,
                session.owner_id,
                session.title,
                session.created_at.to_rfc3339()
            ],
        )?;
        Ok(session)
    }

    async fn get_session(&self, id: &str) -> Result<Option<Session>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, owner_id, title, created_at, last_message_at
             FROM sessions
             WHERE id = ?1",
        )?;

        let session = stmt
            .query_row(params![id], Self::map_session_row)
            .optional()?;
        drop(stmt);

        match session {
            Some(mut session) => {
                session.turns = Self::load_turns(&conn, id)?;
                Ok(Some(session))
            }
            None => Ok(None),
        }
    }

    async fn list_sessions(
        &self,
        owner_id: &str,
        limit: usize,
    ) -> Result<Vec<Session>, StoreError> {
        let conn = self.lock()?;
        let limit_i64 = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut stmt = conn.prepare(
            "SELECT id, owner_id, title, created_at, last_message_at
             FROM sessions
             WHERE owner_id = ?1
             ORDER BY last_message_at DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![owner_id, limit_i64], Self::map_session_row)?;

        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(row?);
        }
        drop(stmt);

        for session in &mut sessions {
            session.turns = Self::load_turns(&conn, &session.id)?;
        }
        Ok(sessions)
    }

    async fn append_turn(
        &self,
        session_id: &str,
        role: Role,
        content: &str,
        metadata: Option<serde_json::Value>,
    ) -> Result<Turn, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM sessions WHERE id = ?1)",
            params![session_id],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(StoreError::SessionNotFound(session_id.to_string()));
        }

        let mut turn = Turn::new(role, content);
        turn.metadata = metadata;
        let timestamp = turn.timestamp.to_rfc3339();
        let metadata_json = turn
            .metadata
            .as_ref()
            .map(serde_json::Value::to_string);

        tx.execute(
            "INSERT INTO turns (id, session_id, role, content, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                turn.id,
                session_id,
                turn.role.as_str(),
                turn.content,
                metadata_json,
                timestamp
            ],
        )?;
        tx.execute(
            "UPDATE sessions SET last_message_at = ?1 WHERE id = ?2",
            params![timestamp, session_id],
        )?;
        tx.commit()?;

        Ok(turn)
    }

    async fn update_session(&self, session: &Session) -> Result<(), StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let updated = tx.execute(
            "UPDATE sessions SET title = ?1, last_message_at = ?2 WHERE id = ?3",
            params![
                session.title,
                session.last_message_at.to_rfc3339(),
                session.id
            ],
        )?;
        if updated == 0 {
            return Err(StoreError::SessionNotFound(session.id.clone()));
        }

        tx.execute("DELETE FROM turns WHERE session_id = ?1", params![session.id])?;
        for turn in &session.turns {
            let metadata_json = turn.metadata.as_ref().map(serde_json::Value::to_string);
            tx.execute(
                "INSERT INTO turns (id, session_id, role, content, metadata, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    turn.id,
                    session.id,
                    turn.role.as_str(),
                    turn.content,
                    metadata_json,
                    turn.timestamp.to_rfc3339()
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    async fn delete_session(&self, id: &str) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let deleted = conn.execute("DELETE FROM sessions WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }

    async fn session_exists(&self, id: &str) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sessions WHERE id = ?1)",
            params![id],
            |row| row.get(0),
        )?;
        Ok(exists)
    }
}
