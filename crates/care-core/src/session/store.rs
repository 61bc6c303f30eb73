//! Session persistence using SQLite

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::constants::{ConversationState, MessageDirection, UserType};
use crate::session::{BotMessage, UserSession};
use crate::Result;

const SESSION_COLUMNS: &str = "whatsapp_id, user_type, current_state, session_data, \
     is_authenticated, auth_token, care_token, care_refresh_token, last_activity, created_at";

/// SQLite-based session and message store
pub struct SessionStore {
    conn: Connection,
}

impl SessionStore {
    /// Open (or create) the database at `db_path`
    pub fn new(db_path: &str) -> Result<Self> {
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(db_path)?;
        let store = Self { conn };
        store.init_tables()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init_tables()?;
        Ok(store)
    }

    fn init_tables(&self) -> Result<()> {
        self.conn.execute_batch(
            "PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS user_sessions (
                whatsapp_id TEXT PRIMARY KEY,
                user_type TEXT NOT NULL DEFAULT 'unknown',
                current_state TEXT NOT NULL DEFAULT 'new',
                session_data TEXT NOT NULL DEFAULT '{}',
                is_authenticated INTEGER NOT NULL DEFAULT 0,
                auth_token TEXT,
                care_token TEXT,
                care_refresh_token TEXT,
                last_activity TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS bot_messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                whatsapp_id TEXT NOT NULL
                    REFERENCES user_sessions(whatsapp_id) ON DELETE CASCADE,
                message_type TEXT NOT NULL,
                message_content TEXT NOT NULL,
                timestamp TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_bot_messages_whatsapp_id
                ON bot_messages(whatsapp_id, timestamp);",
        )?;
        Ok(())
    }

    /// Insert or update a session
    pub fn save(&self, session: &UserSession) -> Result<()> {
        let data_json = serde_json::to_string(&session.data)?;
        self.conn.execute(
            "INSERT INTO user_sessions (whatsapp_id, user_type, current_state, session_data,
                is_authenticated, auth_token, care_token, care_refresh_token, last_activity, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(whatsapp_id) DO UPDATE SET
                user_type = excluded.user_type,
                current_state = excluded.current_state,
                session_data = excluded.session_data,
                is_authenticated = excluded.is_authenticated,
                auth_token = excluded.auth_token,
                care_token = excluded.care_token,
                care_refresh_token = excluded.care_refresh_token,
                last_activity = excluded.last_activity",
            params![
                session.whatsapp_id,
                session.user_type.as_str(),
                session.state.as_str(),
                data_json,
                session.is_authenticated,
                session.auth_token,
                session.care_token,
                session.care_refresh_token,
                session.last_activity.to_rfc3339(),
                session.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Load the session for a sender
    pub fn get(&self, whatsapp_id: &str) -> Result<Option<UserSession>> {
        let sql = format!("SELECT {} FROM user_sessions WHERE whatsapp_id = ?1", SESSION_COLUMNS);
        let session = self
            .conn
            .query_row(&sql, params![whatsapp_id], row_to_session)
            .optional()?;
        Ok(session)
    }

    /// All sessions, most recently active first
    pub fn list(&self) -> Result<Vec<UserSession>> {
        let sql = format!(
            "SELECT {} FROM user_sessions ORDER BY last_activity DESC",
            SESSION_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let sessions = stmt
            .query_map([], row_to_session)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(sessions)
    }

    /// Delete a session and its messages; returns whether it existed
    pub fn delete(&self, whatsapp_id: &str) -> Result<bool> {
        let affected = self.conn.execute(
            "DELETE FROM user_sessions WHERE whatsapp_id = ?1",
            params![whatsapp_id],
        )?;
        Ok(affected > 0)
    }

    /// Append a message to the log
    pub fn insert_message(
        &self,
        whatsapp_id: &str,
        direction: MessageDirection,
        content: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO bot_messages (whatsapp_id, message_type, message_content, timestamp)
             VALUES (?1, ?2, ?3, ?4)",
            params![whatsapp_id, direction.as_str(), content, timestamp.to_rfc3339()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Newest messages for a sender, newest first
    pub fn recent_messages(&self, whatsapp_id: &str, limit: usize) -> Result<Vec<BotMessage>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, whatsapp_id, message_type, message_content, timestamp FROM bot_messages
             WHERE whatsapp_id = ?1 ORDER BY timestamp DESC, id DESC LIMIT ?2",
        )?;
        let messages = stmt
            .query_map(params![whatsapp_id, limit as i64], |row| {
                let direction: String = row.get(2)?;
                Ok(BotMessage {
                    id: row.get(0)?,
                    whatsapp_id: row.get(1)?,
                    direction: MessageDirection::parse(&direction).ok_or_else(|| {
                        rusqlite::Error::InvalidColumnType(2, direction.clone(), Type::Text)
                    })?,
                    content: row.get(3)?,
                    timestamp: parse_timestamp(row, 4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(messages)
    }

    pub fn count_messages(&self, whatsapp_id: &str) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM bot_messages WHERE whatsapp_id = ?1",
            params![whatsapp_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

fn row_to_session(row: &Row<'_>) -> rusqlite::Result<UserSession> {
    let user_type: String = row.get(1)?;
    let state: String = row.get(2)?;
    let data_json: String = row.get(3)?;
    let data = serde_json::from_str(&data_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?;

    Ok(UserSession {
        whatsapp_id: row.get(0)?,
        user_type: UserType::parse(&user_type),
        state: ConversationState::parse(&state),
        data,
        is_authenticated: row.get(4)?,
        auth_token: row.get(5)?,
        care_token: row.get(6)?,
        care_refresh_token: row.get(7)?,
        last_activity: parse_timestamp(row, 8)?,
        created_at: parse_timestamp(row, 9)?,
    })
}

fn parse_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}
