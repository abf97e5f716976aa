//! Execution runtime contract: backends, sessions and fragment streams.
//!
//! A [`Runtime`] builds one [`Backend`] per runner kind from a registry
//! snapshot. The backend owns session state; a turn submitted to it yields a
//! [`FragmentStream`] fed by a producer task until a terminal signal or until
//! the consumer disposes it.

pub mod local;
pub mod sessions;
pub mod stream;

pub use local::{LocalRuntime, RuntimeSettings};
pub use sessions::{InMemorySessions, SessionService, SqliteSessions};
pub use stream::{FragmentSink, FragmentStream, StreamEvent, fragment_channel};

use crate::agent::{AgentId, RegistrySnapshot};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Cannot build backend: {0}")]
    Build(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session storage error: {0}")]
    Storage(String),

    #[error("Agent unavailable: {0}")]
    Unavailable(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// Closed set of execution backend kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunnerKind {
    InMemory,
    Sqlite,
}

impl RunnerKind {
    pub const ALL: &'static [RunnerKind] = &[RunnerKind::InMemory, RunnerKind::Sqlite];

    pub fn as_str(self) -> &'static str {
        match self {
            RunnerKind::InMemory => "IN_MEMORY",
            RunnerKind::Sqlite => "SQLITE",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            RunnerKind::InMemory => "turn history kept in process memory",
            RunnerKind::Sqlite => "turn history persisted to sessions.db",
        }
    }
}

impl fmt::Display for RunnerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown runner: {0}")]
pub struct UnknownRunner(pub String);

impl FromStr for RunnerKind {
    type Err = UnknownRunner;

    /// Accepts `IN_MEMORY`, `in-memory`, `memory`, `SQLITE`, `sqlite`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        match normalized.as_str() {
            "IN_MEMORY" | "INMEMORY" | "MEMORY" => Ok(RunnerKind::InMemory),
            "SQLITE" => Ok(RunnerKind::Sqlite),
            _ => Err(UnknownRunner(s.trim().to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Handle to a conversation owned by one backend instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: SessionId,
    pub app_id: String,
    pub primary_agent: AgentId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(self) -> &'static str {
        match self {
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        }
    }
}

impl FromStr for ChatRole {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(ChatRole::User),
            "assistant" => Ok(ChatRole::Assistant),
            other => Err(RuntimeError::Storage(format!("Unknown role: {other}"))),
        }
    }
}

/// An inline image sent alongside a user turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePart {
    /// `image/png`, `image/jpeg` or `image/webp`.
    pub media_type: String,
    /// Base64 (standard alphabet) of the file bytes.
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    pub images: Vec<ImagePart>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
            images: Vec::new(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
            images: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_images(mut self, images: Vec<ImagePart>) -> Self {
        self.images = images;
        self
    }

    /// The same message with its images dropped, as kept in session history.
    #[must_use]
    pub fn text_only(&self) -> Self {
        Self {
            role: self.role,
            content: self.content.clone(),
            images: Vec::new(),
        }
    }
}

impl From<&str> for ChatMessage {
    fn from(content: &str) -> Self {
        ChatMessage::user(content)
    }
}

/// An execution backend ("runner").
#[async_trait]
pub trait Backend: Send + Sync {
    fn kind(&self) -> RunnerKind;

    /// Registry snapshot the backend was built from.
    fn snapshot(&self) -> &RegistrySnapshot;

    async fn create_session(
        &self,
        app_id: &str,
        primary_agent: AgentId,
    ) -> Result<Session, RuntimeError>;

    /// Submit `message` as the next user turn for `agent` in `session`.
    async fn submit_turn(
        &self,
        agent: AgentId,
        session: &SessionId,
        message: ChatMessage,
    ) -> Result<FragmentStream, RuntimeError>;
}

/// Builds backends.
pub trait Runtime: Send + Sync {
    fn build(
        &self,
        kind: RunnerKind,
        snapshot: RegistrySnapshot,
    ) -> Result<Arc<dyn Backend>, RuntimeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runner_kind_parse() {
        assert_eq!("IN_MEMORY".parse::<RunnerKind>().unwrap(), RunnerKind::InMemory);
        assert_eq!("in-memory".parse::<RunnerKind>().unwrap(), RunnerKind::InMemory);
        assert_eq!(" sqlite ".parse::<RunnerKind>().unwrap(), RunnerKind::Sqlite);
        assert!("postgres".parse::<RunnerKind>().is_err());
    }

    #[test]
    fn test_runner_kind_serde_matches_display() {
        for kind in RunnerKind::ALL {
            let json = serde_json::to_string(kind).unwrap();
            assert_eq!(json, format!("\"{kind}\""));
        }
    }

    #[test]
    fn test_session_ids_are_unique() {
        assert_ne!(SessionId::generate(), SessionId::generate());
    }

    #[test]
    fn test_chat_role_round_trip() {
        for role in [ChatRole::User, ChatRole::Assistant] {
            assert_eq!(role.as_str().parse::<ChatRole>().unwrap(), role);
        }
        assert!("system".parse::<ChatRole>().is_err());
    }
}
