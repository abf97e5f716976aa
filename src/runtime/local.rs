//! Local runtime: sessions in process or in `SQLite`, chat over the providers.

use super::sessions::{InMemorySessions, SessionService, SqliteSessions};
use super::stream::{self, CHANNEL_CAPACITY, FragmentSink, FragmentStream};
use super::{Backend, ChatMessage, Runtime, RunnerKind, RuntimeError, Session, SessionId};
use crate::agent::{AgentConfig, AgentId, RegistrySnapshot};
use crate::provider::{self, GeminiClient, OllamaClient, Provider};
use crate::store::ConfigStore;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// File in the project directory carried over as previous-session context.
pub const SESSION_SUMMARY_FILE: &str = "session_summary.txt";

#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    /// Directory holding `sessions.db`.
    pub data_dir: PathBuf,
    pub ollama_host: Option<String>,
    /// Absolute path of the project the user is working in.
    pub project_dir: PathBuf,
    pub store: ConfigStore,
}

pub struct LocalRuntime {
    settings: RuntimeSettings,
    ollama: OllamaClient,
}

impl LocalRuntime {
    pub fn new(settings: RuntimeSettings) -> Self {
        let ollama = OllamaClient::new(settings.ollama_host.as_deref());
        Self { settings, ollama }
    }

    fn sessions(&self, kind: RunnerKind) -> Result<Arc<dyn SessionService>, RuntimeError> {
        match kind {
            RunnerKind::InMemory => Ok(Arc::new(InMemorySessions::default())),
            RunnerKind::Sqlite => {
                let path = self.settings.data_dir.join("sessions.db");
                let sessions = SqliteSessions::open(&path)
                    .map_err(|e| RuntimeError::Build(format!("{}: {e}", path.display())))?;
                Ok(Arc::new(sessions))
            }
        }
    }
}

impl Runtime for LocalRuntime {
    fn build(
        &self,
        kind: RunnerKind,
        snapshot: RegistrySnapshot,
    ) -> Result<Arc<dyn Backend>, RuntimeError> {
        let gemini = GeminiClient::from_env().ok();

        let coordinator = snapshot
            .get(&AgentId::Coordinator)
            .ok_or_else(|| RuntimeError::Build("No configuration for Coordinator".into()))?;
        let clients = Clients {
            ollama: self.ollama.clone(),
            gemini,
        };
        clients
            .resolve(coordinator)
            .map_err(|e| RuntimeError::Build(format!("Coordinator {coordinator}: {e}")))?;

        let sessions = self.sessions(kind)?;
        debug!(kind = %kind, coordinator = %coordinator, "Built local backend");

        Ok(Arc::new(LocalBackend {
            kind,
            snapshot,
            sessions,
            clients,
            recall: MemoryRecall {
                store: self.settings.store.clone(),
                project_dir: self.settings.project_dir.clone(),
            },
        }))
    }
}

#[derive(Clone)]
struct Clients {
    ollama: OllamaClient,
    gemini: Option<GeminiClient>,
}

impl Clients {
    fn resolve(&self, config: &AgentConfig) -> Result<ChatClient, RuntimeError> {
        match config.provider {
            Provider::Ollama => Ok(ChatClient::Ollama(self.ollama.clone())),
            Provider::Gemini => self.gemini.clone().map(ChatClient::Gemini).ok_or_else(|| {
                RuntimeError::Unavailable(format!(
                    "GEMINI needs one of {}",
                    Provider::Gemini.env_vars().join(", ")
                ))
            }),
            Provider::Bedrock => Err(RuntimeError::Unavailable(
                "BEDROCK is not available in the local runtime".into(),
            )),
        }
    }
}

enum ChatClient {
    Ollama(OllamaClient),
    Gemini(GeminiClient),
}

impl ChatClient {
    async fn stream_chat(
        &self,
        model: &str,
        system: &str,
        history: &[ChatMessage],
        sink: &FragmentSink,
    ) -> Result<String, provider::Error> {
        match self {
            ChatClient::Ollama(client) => client.stream_chat(model, system, history, sink).await,
            ChatClient::Gemini(client) => client.stream_chat(model, system, history, sink).await,
        }
    }
}

/// Project memory and previous-session context for system instructions.
#[derive(Clone)]
struct MemoryRecall {
    store: ConfigStore,
    project_dir: PathBuf,
}

impl MemoryRecall {
    fn project_memory(&self) -> Option<String> {
        let key = self.project_dir.display().to_string();
        match self.store.project_memory(&key) {
            Ok(memory) => memory.filter(|m| !m.trim().is_empty()),
            Err(e) => {
                warn!("Project memory unavailable: {e}");
                None
            }
        }
    }

    fn session_summary(&self) -> Option<String> {
        std::fs::read_to_string(self.project_dir.join(SESSION_SUMMARY_FILE))
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    fn system_instruction(&self, agent: AgentId) -> String {
        system_instruction(agent, self.project_memory(), self.session_summary())
    }
}

fn system_instruction(agent: AgentId, memory: Option<String>, summary: Option<String>) -> String {
    let mut prompt = format!(
        "You are {agent}, one agent of a crew working in the user's project. Your role: {}.",
        agent.role()
    );
    if let Some(memory) = memory {
        prompt.push_str("\n\nProject memory:\n");
        prompt.push_str(&memory);
    }
    if let Some(summary) = summary {
        prompt.push_str("\n\nPrevious session context:\n");
        prompt.push_str(&summary);
    }
    prompt
}

pub struct LocalBackend {
    kind: RunnerKind,
    snapshot: RegistrySnapshot,
    sessions: Arc<dyn SessionService>,
    clients: Clients,
    recall: MemoryRecall,
}

#[async_trait]
impl Backend for LocalBackend {
    fn kind(&self) -> RunnerKind {
        self.kind
    }

    fn snapshot(&self) -> &RegistrySnapshot {
        &self.snapshot
    }

    async fn create_session(
        &self,
        app_id: &str,
        primary_agent: AgentId,
    ) -> Result<Session, RuntimeError> {
        let session = self.sessions.create(app_id, primary_agent)?;
        debug!(session = %session.id, kind = %self.kind, "Created session");
        Ok(session)
    }

    async fn submit_turn(
        &self,
        agent: AgentId,
        session: &SessionId,
        message: ChatMessage,
    ) -> Result<FragmentStream, RuntimeError> {
        let config = self
            .snapshot
            .get(&agent)
            .cloned()
            .ok_or_else(|| RuntimeError::Unavailable(format!("No configuration for {agent}")))?;
        let client = self.clients.resolve(&config)?;

        // The user message stays in history even if the turn later fails or
        // is cancelled. Images only travel with the turn that attached them.
        let mut history = self.sessions.history(session)?;
        self.sessions.append(session, &message.text_only())?;
        history.push(message);

        let system = self.recall.system_instruction(agent);
        let sessions = self.sessions.clone();
        let session = session.clone();

        Ok(stream::spawn(CHANNEL_CAPACITY, move |sink| async move {
            let result = tokio::select! {
                biased;
                () = sink.disposed() => {
                    debug!(session = %session, "Turn disposed before the provider finished");
                    return;
                }
                result = client.stream_chat(&config.model, &system, &history, &sink) => result,
            };

            match result {
                Ok(reply) => {
                    if !reply.is_empty()
                        && let Err(e) = sessions.append(&session, &ChatMessage::assistant(&reply))
                    {
                        warn!(session = %session, "Failed to record reply: {e}");
                    }
                    sink.complete().await;
                }
                Err(e) => {
                    error!(agent = %agent, model = %config.model, "Stream error: {e}");
                    sink.fail(e.to_string()).await;
                }
            }
        }))
    }
}
