//! The agent roster and per-agent model bindings.

mod registry;

pub use registry::{AgentRegistry, ConfigChange, LoadReport, RegistrySnapshot};

use crate::provider::Provider;
use std::fmt;
use std::str::FromStr;

/// The fixed set of named agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AgentId {
    Coordinator,
    Coder,
    SysAdmin,
    Tester,
    DocWriter,
    SecurityAuditor,
    Architect,
    DatabaseAdmin,
    DevOps,
    DataAnalyst,
    GoalTracker,
    CodeEditor,
}

impl AgentId {
    pub const ALL: &'static [AgentId] = &[
        AgentId::Coordinator,
        AgentId::Coder,
        AgentId::SysAdmin,
        AgentId::Tester,
        AgentId::DocWriter,
        AgentId::SecurityAuditor,
        AgentId::Architect,
        AgentId::DatabaseAdmin,
        AgentId::DevOps,
        AgentId::DataAnalyst,
        AgentId::GoalTracker,
        AgentId::CodeEditor,
    ];

    /// Agent name as shown to users and used as the store key.
    pub fn name(self) -> &'static str {
        match self {
            AgentId::Coordinator => "Coordinator",
            AgentId::Coder => "Coder",
            AgentId::SysAdmin => "SysAdmin",
            AgentId::Tester => "Tester",
            AgentId::DocWriter => "DocWriter",
            AgentId::SecurityAuditor => "SecurityAuditor",
            AgentId::Architect => "Architect",
            AgentId::DatabaseAdmin => "DatabaseAdmin",
            AgentId::DevOps => "DevOps",
            AgentId::DataAnalyst => "DataAnalyst",
            AgentId::GoalTracker => "GoalTracker",
            AgentId::CodeEditor => "CodeEditor",
        }
    }

    /// One-line role used in the agent's system instruction.
    pub fn role(self) -> &'static str {
        match self {
            AgentId::Coordinator => "coordinate the team and answer the user directly",
            AgentId::Coder => "write and refactor code",
            AgentId::SysAdmin => "operate the local system and shell",
            AgentId::Tester => "design and run tests",
            AgentId::DocWriter => "write documentation",
            AgentId::SecurityAuditor => "review code and configuration for security issues",
            AgentId::Architect => "design system structure",
            AgentId::DatabaseAdmin => "design schemas and queries",
            AgentId::DevOps => "build, deploy and automate",
            AgentId::DataAnalyst => "analyze data",
            AgentId::GoalTracker => "track goals and progress",
            AgentId::CodeEditor => "apply precise edits to files",
        }
    }

    /// The agent that receives every user turn.
    pub fn is_coordinator(self) -> bool {
        self == AgentId::Coordinator
    }

    /// Roster names sorted alphabetically, for listings.
    pub fn sorted() -> Vec<AgentId> {
        let mut agents = AgentId::ALL.to_vec();
        agents.sort_by_key(|a| a.name());
        agents
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A name that is not on the roster.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown agent: {0}")]
pub struct UnknownAgent(pub String);

impl FromStr for AgentId {
    type Err = UnknownAgent;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        AgentId::ALL
            .iter()
            .copied()
            .find(|a| a.name().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| UnknownAgent(trimmed.to_string()))
    }
}

/// Provider and model an agent runs on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    pub provider: Provider,
    pub model: String,
}

impl AgentConfig {
    pub fn new(provider: Provider, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }

    /// The provider's default model.
    pub fn provider_default(provider: Provider) -> Self {
        Self::new(provider, provider.default_model())
    }
}

impl fmt::Display for AgentConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.provider, self.model)
    }
}
