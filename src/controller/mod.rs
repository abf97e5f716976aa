//! Execution Backend Manager.
//!
//! The [`Controller`] owns the active backend, its session, the agent
//! registry and any summary waiting to seed the next turn. It is mutated only
//! through `&mut self`, so no command can interleave with a running turn.

use crate::action_log::{ActionLog, AgentStat, LogRole};
use crate::agent::{AgentConfig, AgentId, AgentRegistry, ConfigChange};
use crate::error::{Error, Result};
use crate::runtime::local::SESSION_SUMMARY_FILE;
use crate::runtime::{Backend, ChatMessage, RunnerKind, Runtime, Session, SessionId};
use crate::store::ConfigStore;
use crate::turn::{self, CancelSource, TurnOutcome, TurnSink, TurnTiming};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

pub const SUMMARY_REQUEST: &str = "Summarize our conversation so far.";
pub const SUMMARY_PREAMBLE: &str = "Here is the summary of the previous session:";

/// Request sent by `/summarize`; the recent action log is appended to it.
pub const SESSION_SUMMARY_REQUEST: &str = "Summarize the key technical context, user \
preferences, and important decisions from the action log below. Reply with the summary only.";

/// Action-log entries handed to `/summarize`.
pub const SESSION_SUMMARY_LOG_LIMIT: usize = 50;

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub app_id: String,
    /// Key of the current project's memory record.
    pub project_path: String,
    pub timing: TurnTiming,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwitchOutcome {
    AlreadyActive,
    Declined,
    Switched(SessionId),
}

/// Point-in-time view for `/status`.
#[derive(Debug, Clone)]
pub struct Status {
    pub kind: RunnerKind,
    /// `None` while the session is pending re-creation.
    pub session: Option<SessionId>,
    pub agents: Vec<(AgentId, AgentConfig)>,
    pub store_path: String,
    pub projects: std::result::Result<usize, String>,
    pub summary_pending: bool,
}

struct Active {
    kind: RunnerKind,
    backend: Arc<dyn Backend>,
    session: Option<Session>,
}

pub struct Controller {
    runtime: Arc<dyn Runtime>,
    store: ConfigStore,
    registry: AgentRegistry,
    log: Arc<dyn ActionLog>,
    active: Active,
    pending_preamble: Option<String>,
    settings: ControllerSettings,
}

impl Controller {
    /// Build the `kind` backend and open its first session.
    pub async fn start(
        runtime: Arc<dyn Runtime>,
        store: ConfigStore,
        registry: AgentRegistry,
        log: Arc<dyn ActionLog>,
        kind: RunnerKind,
        settings: ControllerSettings,
    ) -> Result<Self> {
        let backend = runtime.build(kind, registry.snapshot())?;
        let session = backend
            .create_session(&settings.app_id, AgentId::Coordinator)
            .await?;
        info!(kind = %kind, session = %session.id, "Controller started");

        Ok(Self {
            runtime,
            store,
            registry,
            log,
            active: Active {
                kind,
                backend,
                session: Some(session),
            },
            pending_preamble: None,
            settings,
        })
    }

    pub fn kind(&self) -> RunnerKind {
        self.active.kind
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        self.active.session.as_ref().map(|s| &s.id)
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    pub fn action_log(&self) -> &dyn ActionLog {
        self.log.as_ref()
    }

    pub fn project_path(&self) -> &str {
        &self.settings.project_path
    }

    pub fn pending_preamble(&self) -> Option<&str> {
        self.pending_preamble.as_deref()
    }

    /// Current session, created on demand after a coordinator rebuild.
    async fn session(&mut self) -> Result<Session> {
        if let Some(session) = &self.active.session {
            return Ok(session.clone());
        }
        let session = self
            .active
            .backend
            .create_session(&self.settings.app_id, AgentId::Coordinator)
            .await?;
        debug!(session = %session.id, "Created deferred session");
        self.active.session = Some(session.clone());
        Ok(session)
    }

    /// Replace the backend with one of `kind` and a fresh session.
    ///
    /// `confirm` is asked only when `kind` differs from the active kind. A
    /// declined request or a failed build leaves everything as it was.
    pub async fn request_switch(
        &mut self,
        kind: RunnerKind,
        confirm: impl FnOnce(RunnerKind) -> bool,
    ) -> Result<SwitchOutcome> {
        if kind == self.active.kind {
            return Ok(SwitchOutcome::AlreadyActive);
        }
        if !confirm(kind) {
            return Ok(SwitchOutcome::Declined);
        }

        let backend = self.runtime.build(kind, self.registry.snapshot())?;
        let session = backend
            .create_session(&self.settings.app_id, AgentId::Coordinator)
            .await?;
        let id = session.id.clone();

        self.active = Active {
            kind,
            backend,
            session: Some(session),
        };
        self.pending_preamble = None;
        self.log
            .log(LogRole::System, &format!("Switched runner to {kind}."));
        info!(kind = %kind, session = %id, "Switched runner");
        Ok(SwitchOutcome::Switched(id))
    }

    /// Start a fresh session under the current backend.
    pub async fn reset(&mut self) -> Result<SessionId> {
        let session = self
            .active
            .backend
            .create_session(&self.settings.app_id, AgentId::Coordinator)
            .await?;
        let id = session.id.clone();

        self.active.session = Some(session);
        self.pending_preamble = None;
        self.log.log(LogRole::System, "Session reset by user.");
        Ok(id)
    }

    /// Summarize the conversation, then continue in a fresh session seeded
    /// with the summary on its next turn.
    ///
    /// A session still pending after a coordinator rebuild has no history, so
    /// it is left uncreated and any pending summary stays pending.
    pub async fn compact(&mut self) -> Result<SessionId> {
        let Some(session) = self.active.session.clone() else {
            return Err(Error::NothingToCompact);
        };
        let request = self.with_preamble(SUMMARY_REQUEST);

        let summary = turn::drain_turn(self.active.backend.as_ref(), &session, &request)
            .await
            .map_err(Error::Compaction)?;
        let summary = summary.trim();
        if summary.is_empty() {
            return Err(Error::EmptySummary);
        }

        let fresh = self
            .active
            .backend
            .create_session(&self.settings.app_id, AgentId::Coordinator)
            .await?;
        let id = fresh.id.clone();

        self.active.session = Some(fresh);
        self.pending_preamble = Some(format!("{SUMMARY_PREAMBLE}\n\n{summary}"));
        self.log.log(LogRole::System, "Session compacted.");
        Ok(id)
    }

    /// Bind `agent` to `config` in the registry and the store.
    ///
    /// For the coordinator the replacement backend is built first; the old
    /// session is dropped and a new one is created on next use. Any failure
    /// leaves registry, store and backend unchanged.
    pub fn apply_agent_config(&mut self, agent: AgentId, config: AgentConfig) -> Result<ConfigChange> {
        let rebuilt = if agent.is_coordinator() {
            let snapshot = self.registry.with_override(agent, &config);
            Some(self.runtime.build(self.active.kind, snapshot)?)
        } else {
            None
        };

        let change = self.registry.set(&self.store, agent, config)?;

        if let Some(backend) = rebuilt {
            self.active.backend = backend;
            self.active.session = None;
            self.log.log(
                LogRole::System,
                &format!("{agent} now runs {}; backend rebuilt.", change.current),
            );
            info!(agent = %agent, config = %change.current, "Rebuilt backend");
        }
        Ok(change)
    }

    fn with_preamble(&self, text: &str) -> String {
        match &self.pending_preamble {
            Some(preamble) => format!("{preamble}\n\n{text}"),
            None => text.to_string(),
        }
    }

    /// Run one user turn against the active session.
    pub async fn run_turn(
        &mut self,
        text: &str,
        cancel: &mut dyn CancelSource,
        sink: &mut dyn TurnSink,
    ) -> TurnOutcome {
        self.submit(ChatMessage::user(text), cancel, sink).await
    }

    /// Run `message`, images included, as one user turn.
    pub async fn submit(
        &mut self,
        message: ChatMessage,
        cancel: &mut dyn CancelSource,
        sink: &mut dyn TurnSink,
    ) -> TurnOutcome {
        let session = match self.session().await {
            Ok(session) => session,
            Err(e) => {
                let reason = e.to_string();
                self.log.log(LogRole::Error, &reason);
                return TurnOutcome::Failed {
                    reason,
                    partial: String::new(),
                };
            }
        };

        let message = ChatMessage {
            content: self.with_preamble(&message.content),
            ..message
        };
        let input_len = message.content.chars().count();
        let started = Instant::now();
        let outcome = turn::run_turn(
            self.active.backend.as_ref(),
            &session,
            message,
            cancel,
            sink,
            self.log.as_ref(),
            self.settings.timing,
        )
        .await;
        self.record_stat(&session, started, input_len, &outcome);

        if !matches!(outcome, TurnOutcome::Failed { .. }) {
            self.pending_preamble = None;
        }
        outcome
    }

    fn record_stat(
        &self,
        session: &Session,
        started: Instant,
        input_len: usize,
        outcome: &TurnOutcome,
    ) {
        let agent = session.primary_agent;
        let config = self
            .active
            .backend
            .snapshot()
            .get(&agent)
            .cloned()
            .unwrap_or_else(|| self.registry.get(agent).clone());
        self.log.record_stat(&AgentStat {
            timestamp: chrono::Utc::now(),
            agent: agent.to_string(),
            provider: config.provider.id().to_string(),
            model: config.model,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            success: matches!(outcome, TurnOutcome::Completed(_)),
            input_len,
            output_len: outcome.text().chars().count(),
        });
    }

    /// Where `/summarize` writes, and where the next session reads it back.
    pub fn summary_path(&self) -> PathBuf {
        PathBuf::from(&self.settings.project_path).join(SESSION_SUMMARY_FILE)
    }

    /// Ask the coordinator to summarize the recent action log and write the
    /// reply to [`Controller::summary_path`].
    ///
    /// The file is written only for a completed, non-empty reply.
    pub async fn summarize(
        &mut self,
        cancel: &mut dyn CancelSource,
        sink: &mut dyn TurnSink,
    ) -> Result<TurnOutcome> {
        let mut request = SESSION_SUMMARY_REQUEST.to_string();
        let entries = self.log.recent(SESSION_SUMMARY_LOG_LIMIT)?;
        if !entries.is_empty() {
            request.push_str("\n\nAction log:");
            for entry in &entries {
                request.push_str(&format!("\n[{}] {}", entry.role, entry.text));
            }
        }

        let outcome = self.run_turn(&request, cancel, sink).await;
        if let TurnOutcome::Completed(text) = &outcome {
            let summary = text.trim();
            if summary.is_empty() {
                return Err(Error::EmptySummary);
            }
            let path = self.summary_path();
            std::fs::write(&path, format!("{summary}\n"))?;
            self.log.log(
                LogRole::System,
                &format!("Session summary written to {}.", path.display()),
            );
            info!(path = %path.display(), "Wrote session summary");
        }
        Ok(outcome)
    }

    pub fn stats(&self) -> Result<Vec<AgentStat>> {
        Ok(self.log.stats()?)
    }

    /// Append a note to the current project's memory.
    pub fn remember(&self, note: &str) -> Result<()> {
        self.store.append_memory(&self.settings.project_path, note)?;
        self.log.log(LogRole::System, "Saved note to project memory.");
        Ok(())
    }

    pub fn memory(&self) -> Result<Option<String>> {
        Ok(self.store.project_memory(&self.settings.project_path)?)
    }

    pub fn status(&self) -> Status {
        Status {
            kind: self.active.kind,
            session: self.session_id().cloned(),
            agents: self
                .registry
                .entries()
                .into_iter()
                .map(|(agent, config)| (agent, config.clone()))
                .collect(),
            store_path: self.store.path().display().to_string(),
            projects: self.store.project_count().map_err(|e| e.to_string()),
            summary_pending: self.pending_preamble.is_some(),
        }
    }
}
