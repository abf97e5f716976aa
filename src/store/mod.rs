//! Durable key-value store with `SQLite`.
//!
//! Two namespaces live in one table: project memories keyed by absolute
//! project path, and agent configs keyed by agent name. Every public call
//! opens its own connection and transaction; nothing is shared between calls
//! or threads.

pub mod record;

use crate::agent::{AgentConfig, AgentId};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub use record::RecordError;

const SCHEMA_VERSION: i32 = 1;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// Logical key spaces of the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    ProjectMemories,
    AgentConfigs,
}

impl Namespace {
    pub fn as_str(self) -> &'static str {
        match self {
            Namespace::ProjectMemories => "project_memories",
            Namespace::AgentConfigs => "agent_configs",
        }
    }
}

/// An agent config row, decoded at the store boundary.
#[derive(Debug, Clone)]
pub struct StoredAgentConfig {
    /// Key as stored; not guaranteed to be on the roster.
    pub agent: String,
    pub config: Result<AgentConfig, RecordError>,
}

/// The `--- Saved: <instant> ---` header that precedes each memory block.
pub fn saved_marker(at: DateTime<Utc>) -> String {
    format!(
        "--- Saved: {} ---",
        at.to_rfc3339_opts(SecondsFormat::AutoSi, true)
    )
}

/// New memory value after appending `text` at `at` to `existing`.
fn append_block(existing: Option<&str>, at: DateTime<Utc>, text: &str) -> String {
    let block = format!("{}\n{text}", saved_marker(at));
    match existing {
        Some(prior) => format!("{prior}\n\n{block}"),
        None => block,
    }
}

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    /// Store backed by the database file at `path`. Nothing is opened until
    /// the first operation; the parent directory is created then.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> Result<Connection, StoreError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::InvalidData(format!(
                    "Failed to create store directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let db = Connection::open(&self.path)?;
        db.busy_timeout(BUSY_TIMEOUT)?;
        init_schema(&db)?;
        Ok(db)
    }

    /// Run `f` inside `BEGIN IMMEDIATE`; commit on success, roll back otherwise.
    fn with_transaction<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let db = self.connect()?;
        db.execute("BEGIN IMMEDIATE", [])?;

        match f(&db) {
            Ok(value) => {
                db.execute("COMMIT", [])?;
                Ok(value)
            }
            Err(e) => {
                let _ = db.execute("ROLLBACK", []);
                Err(e)
            }
        }
    }

    pub fn put(&self, namespace: Namespace, key: &str, value: &str) -> Result<(), StoreError> {
        self.with_transaction(|db| {
            write_entry(db, namespace, key, value)?;
            Ok(())
        })
    }

    pub fn get(&self, namespace: Namespace, key: &str) -> Result<Option<String>, StoreError> {
        let db = self.connect()?;
        let value = db
            .query_row(
                "SELECT value FROM entries WHERE namespace = ?1 AND key = ?2",
                params![namespace.as_str(), key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Point-in-time copy of a whole namespace.
    pub fn get_all(&self, namespace: Namespace) -> Result<BTreeMap<String, String>, StoreError> {
        let db = self.connect()?;
        let mut stmt = db.prepare("SELECT key, value FROM entries WHERE namespace = ?1")?;
        let entries: Result<BTreeMap<String, String>, _> = stmt
            .query_map(params![namespace.as_str()], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?
            .collect();
        Ok(entries?)
    }

    /// Append a timestamped block to a project's memory, in one transaction.
    pub fn append_memory(&self, project_path: &str, text: &str) -> Result<(), StoreError> {
        self.with_transaction(|db| {
            let existing: Option<String> = db
                .query_row(
                    "SELECT value FROM entries WHERE namespace = ?1 AND key = ?2",
                    params![Namespace::ProjectMemories.as_str(), project_path],
                    |row| row.get(0),
                )
                .optional()?;

            let value = append_block(existing.as_deref(), Utc::now(), text);
            write_entry(db, Namespace::ProjectMemories, project_path, &value)?;
            Ok(())
        })
    }

    pub fn project_memory(&self, project_path: &str) -> Result<Option<String>, StoreError> {
        self.get(Namespace::ProjectMemories, project_path)
    }

    /// Number of projects with stored memory.
    pub fn project_count(&self) -> Result<usize, StoreError> {
        let db = self.connect()?;
        let count: i64 = db.query_row(
            "SELECT COUNT(*) FROM entries WHERE namespace = ?1",
            params![Namespace::ProjectMemories.as_str()],
            |row| row.get(0),
        )?;
        usize::try_from(count).map_err(|_| StoreError::InvalidData(format!("Bad count: {count}")))
    }

    pub fn save_agent_config(&self, agent: AgentId, config: &AgentConfig) -> Result<(), StoreError> {
        self.put(Namespace::AgentConfigs, agent.name(), &record::encode(config))
    }

    /// Every stored agent config, each decoded independently.
    pub fn agent_configs(&self) -> Result<Vec<StoredAgentConfig>, StoreError> {
        Ok(self
            .get_all(Namespace::AgentConfigs)?
            .into_iter()
            .map(|(agent, raw)| StoredAgentConfig {
                config: record::decode(&raw),
                agent,
            })
            .collect())
    }
}

fn init_schema(db: &Connection) -> Result<(), StoreError> {
    db.execute_batch("PRAGMA journal_mode=WAL;")?;

    let version: i32 = db.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if version < SCHEMA_VERSION {
        db.execute_batch(
            r"
            CREATE TABLE IF NOT EXISTS entries (
                namespace   TEXT NOT NULL,
                key         TEXT NOT NULL,
                value       TEXT NOT NULL,
                updated_at  INTEGER NOT NULL,
                PRIMARY KEY (namespace, key)
            );

            PRAGMA user_version = 1;
            ",
        )?;
    }
    Ok(())
}

fn write_entry(
    db: &Connection,
    namespace: Namespace,
    key: &str,
    value: &str,
) -> Result<(), StoreError> {
    db.execute(
        r"
        INSERT INTO entries (namespace, key, value, updated_at)
        VALUES (?1, ?2, ?3, ?4)
        ON CONFLICT(namespace, key) DO UPDATE SET
            value = excluded.value,
            updated_at = excluded.updated_at
        ",
        params![namespace.as_str(), key, value, Utc::now().timestamp()],
    )?;
    Ok(())
}
