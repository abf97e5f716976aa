//! Append-only action log.

use crate::store::StoreError;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use std::fmt;
use std::path::Path;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogRole {
    User,
    Agent,
    System,
    Error,
}

impl LogRole {
    pub fn tag(self) -> &'static str {
        match self {
            LogRole::User => "USER",
            LogRole::Agent => "AGENT",
            LogRole::System => "SYSTEM",
            LogRole::Error => "ERROR",
        }
    }
}

impl fmt::Display for LogRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub role: String,
    pub text: String,
}

/// One agent invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentStat {
    pub timestamp: DateTime<Utc>,
    pub agent: String,
    pub provider: String,
    pub model: String,
    pub duration_ms: u64,
    pub success: bool,
    /// Characters sent.
    pub input_len: usize,
    /// Characters received.
    pub output_len: usize,
}

pub trait ActionLog: Send + Sync {
    /// Best-effort append; failures are reported through tracing only.
    fn log(&self, role: LogRole, text: &str);

    /// Most recent `limit` entries, oldest first.
    fn recent(&self, _limit: usize) -> Result<Vec<LogEntry>, StoreError> {
        Ok(Vec::new())
    }

    /// Best-effort, like [`ActionLog::log`].
    fn record_stat(&self, _stat: &AgentStat) {}

    /// Every recorded invocation, oldest first.
    fn stats(&self) -> Result<Vec<AgentStat>, StoreError> {
        Ok(Vec::new())
    }
}

/// Action log stored in `SQLite`.
pub struct SqliteActionLog {
    db: Mutex<Connection>,
}

impl SqliteActionLog {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::InvalidData(format!(
                    "Failed to create log directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let db = Connection::open(path)?;
        db.execute_batch(
            r"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS actions (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp   INTEGER NOT NULL,
                role        TEXT NOT NULL,
                text        TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS agent_stats (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp   INTEGER NOT NULL,
                agent       TEXT NOT NULL,
                provider    TEXT NOT NULL,
                model       TEXT NOT NULL,
                duration_ms INTEGER NOT NULL,
                success     INTEGER NOT NULL,
                input_len   INTEGER NOT NULL,
                output_len  INTEGER NOT NULL
            );
            ",
        )?;
        Ok(Self { db: Mutex::new(db) })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.db
            .lock()
            .map_err(|_| StoreError::InvalidData("Action log lock poisoned".into()))
    }

    fn insert_stat(&self, stat: &AgentStat) -> Result<(), StoreError> {
        let db = self.lock()?;
        db.execute(
            "INSERT INTO agent_stats
                (timestamp, agent, provider, model, duration_ms, success, input_len, output_len)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                stat.timestamp.timestamp_millis(),
                stat.agent,
                stat.provider,
                stat.model,
                i64::try_from(stat.duration_ms).unwrap_or(i64::MAX),
                stat.success,
                i64::try_from(stat.input_len).unwrap_or(i64::MAX),
                i64::try_from(stat.output_len).unwrap_or(i64::MAX),
            ],
        )?;
        Ok(())
    }

    fn insert(&self, role: LogRole, text: &str) -> Result<(), StoreError> {
        let db = self.lock()?;
        db.execute(
            "INSERT INTO actions (timestamp, role, text) VALUES (?1, ?2, ?3)",
            params![Utc::now().timestamp_millis(), role.tag(), text],
        )?;
        Ok(())
    }
}

impl ActionLog for SqliteActionLog {
    fn log(&self, role: LogRole, text: &str) {
        if let Err(e) = self.insert(role, text) {
            tracing::warn!(role = %role, "Failed to write action log: {e}");
        }
    }

    fn recent(&self, limit: usize) -> Result<Vec<LogEntry>, StoreError> {
        let db = self.lock()?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let mut stmt = db.prepare(
            "SELECT timestamp, role, text FROM actions ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (millis, role, text) = row?;
            let timestamp = DateTime::from_timestamp_millis(millis)
                .ok_or_else(|| StoreError::InvalidData(format!("Bad timestamp: {millis}")))?;
            entries.push(LogEntry {
                timestamp,
                role,
                text,
            });
        }
        entries.reverse();
        Ok(entries)
    }

    fn record_stat(&self, stat: &AgentStat) {
        if let Err(e) = self.insert_stat(stat) {
            tracing::warn!(agent = %stat.agent, "Failed to record agent stat: {e}");
        }
    }

    fn stats(&self) -> Result<Vec<AgentStat>, StoreError> {
        let db = self.lock()?;
        let mut stmt = db.prepare(
            "SELECT timestamp, agent, provider, model, duration_ms, success, input_len, output_len
             FROM agent_stats ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, bool>(5)?,
                row.get::<_, i64>(6)?,
                row.get::<_, i64>(7)?,
            ))
        })?;

        let mut stats = Vec::new();
        for row in rows {
            let (millis, agent, provider, model, duration, success, input, output) = row?;
            let timestamp = DateTime::from_timestamp_millis(millis)
                .ok_or_else(|| StoreError::InvalidData(format!("Bad timestamp: {millis}")))?;
            stats.push(AgentStat {
                timestamp,
                agent,
                provider,
                model,
                duration_ms: u64::try_from(duration).unwrap_or(0),
                success,
                input_len: usize::try_from(input).unwrap_or(0),
                output_len: usize::try_from(output).unwrap_or(0),
            });
        }
        Ok(stats)
    }
}

/// Used when the log database cannot be opened.
#[derive(Debug, Default)]
pub struct TracingActionLog;

impl ActionLog for TracingActionLog {
    fn log(&self, role: LogRole, text: &str) {
        tracing::info!(target: "crewctl::action", role = %role, "{text}");
    }
}
