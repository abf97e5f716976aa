//! Session services: turn history storage behind a backend.

use super::{ChatMessage, ChatRole, RuntimeError, Session, SessionId};
use crate::agent::AgentId;
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

const SCHEMA_VERSION: i32 = 1;

pub trait SessionService: Send + Sync {
    fn create(&self, app_id: &str, primary_agent: AgentId) -> Result<Session, RuntimeError>;

    fn history(&self, id: &SessionId) -> Result<Vec<ChatMessage>, RuntimeError>;

    fn append(&self, id: &SessionId, message: &ChatMessage) -> Result<(), RuntimeError>;
}

fn poisoned() -> RuntimeError {
    RuntimeError::Storage("Session lock poisoned".into())
}

/// Sessions that live as long as the backend.
#[derive(Debug, Default)]
pub struct InMemorySessions {
    sessions: Mutex<HashMap<SessionId, Vec<ChatMessage>>>,
}

impl SessionService for InMemorySessions {
    fn create(&self, app_id: &str, primary_agent: AgentId) -> Result<Session, RuntimeError> {
        let id = SessionId::generate();
        self.sessions
            .lock()
            .map_err(|_| poisoned())?
            .insert(id.clone(), Vec::new());
        Ok(Session {
            id,
            app_id: app_id.to_string(),
            primary_agent,
        })
    }

    fn history(&self, id: &SessionId) -> Result<Vec<ChatMessage>, RuntimeError> {
        self.sessions
            .lock()
            .map_err(|_| poisoned())?
            .get(id)
            .cloned()
            .ok_or_else(|| RuntimeError::SessionNotFound(id.to_string()))
    }

    fn append(&self, id: &SessionId, message: &ChatMessage) -> Result<(), RuntimeError> {
        self.sessions
            .lock()
            .map_err(|_| poisoned())?
            .get_mut(id)
            .map(|messages| messages.push(message.clone()))
            .ok_or_else(|| RuntimeError::SessionNotFound(id.to_string()))
    }
}

/// Sessions persisted in `SQLite`.
pub struct SqliteSessions {
    db: Mutex<Connection>,
}

impl SqliteSessions {
    pub fn open(path: &Path) -> Result<Self, RuntimeError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                RuntimeError::Storage(format!(
                    "Failed to create session directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let db = Connection::open(path)?;
        db.execute_batch("PRAGMA journal_mode=WAL;")?;
        init_schema(&db)?;

        Ok(Self { db: Mutex::new(db) })
    }
}

fn init_schema(db: &Connection) -> Result<(), RuntimeError> {
    let version: i32 = db.query_row("PRAGMA user_version", [], |row| row.get(0))?;

    if version < SCHEMA_VERSION {
        db.execute_batch(
            r"
            CREATE TABLE IF NOT EXISTS sessions (
                id            TEXT PRIMARY KEY,
                app_id        TEXT NOT NULL,
                primary_agent TEXT NOT NULL,
                created_at    INTEGER NOT NULL,
                updated_at    INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS messages (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id  TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
                role        TEXT NOT NULL,
                content     TEXT NOT NULL,
                created_at  INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_messages_session
                ON messages(session_id, id);

            PRAGMA user_version = 1;
            ",
        )?;
    }

    db.execute("PRAGMA foreign_keys = ON", [])?;
    Ok(())
}

impl SessionService for SqliteSessions {
    fn create(&self, app_id: &str, primary_agent: AgentId) -> Result<Session, RuntimeError> {
        let id = SessionId::generate();
        let now = chrono::Utc::now().timestamp();
        let db = self.db.lock().map_err(|_| poisoned())?;
        db.execute(
            r"
            INSERT INTO sessions (id, app_id, primary_agent, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?4)
            ",
            params![id.as_str(), app_id, primary_agent.name(), now],
        )?;
        Ok(Session {
            id,
            app_id: app_id.to_string(),
            primary_agent,
        })
    }

    fn history(&self, id: &SessionId) -> Result<Vec<ChatMessage>, RuntimeError> {
        let db = self.db.lock().map_err(|_| poisoned())?;
        ensure_exists(&db, id)?;

        let mut stmt =
            db.prepare("SELECT role, content FROM messages WHERE session_id = ?1 ORDER BY id")?;
        let rows = stmt.query_map(params![id.as_str()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut messages = Vec::new();
        for row in rows {
            let (role, content) = row?;
            messages.push(ChatMessage {
                role: role.parse::<ChatRole>()?,
                content,
                images: Vec::new(),
            });
        }
        Ok(messages)
    }

    fn append(&self, id: &SessionId, message: &ChatMessage) -> Result<(), RuntimeError> {
        let now = chrono::Utc::now().timestamp();
        let db = self.db.lock().map_err(|_| poisoned())?;

        db.execute("BEGIN IMMEDIATE", [])?;
        let result = (|| {
            ensure_exists(&db, id)?;
            db.execute(
                r"
                INSERT INTO messages (session_id, role, content, created_at)
                VALUES (?1, ?2, ?3, ?4)
                ",
                params![id.as_str(), message.role.as_str(), message.content, now],
            )?;
            db.execute(
                "UPDATE sessions SET updated_at = ?2 WHERE id = ?1",
                params![id.as_str(), now],
            )?;
            Ok::<(), RuntimeError>(())
        })();

        match result {
            Ok(()) => {
                db.execute("COMMIT", [])?;
                Ok(())
            }
            Err(e) => {
                let _ = db.execute("ROLLBACK", []);
                Err(e)
            }
        }
    }
}

fn ensure_exists(db: &Connection, id: &SessionId) -> Result<(), RuntimeError> {
    let found: Option<i64> = db
        .query_row(
            "SELECT 1 FROM sessions WHERE id = ?1",
            params![id.as_str()],
            |row| row.get(0),
        )
        .optional()?;
    found
        .map(|_| ())
        .ok_or_else(|| RuntimeError::SessionNotFound(id.to_string()))
}
