//! Test doubles for the runtime, the turn sink, the cancel source and the log.

use crate::action_log::{ActionLog, AgentStat, LogEntry, LogRole};
use crate::agent::{AgentConfig, AgentId, AgentRegistry, RegistrySnapshot};
use crate::provider::Provider;
use crate::repl::terminal::{Line, LineInput};
use crate::runtime::stream::{self, CHANNEL_CAPACITY};
use crate::runtime::{
    Backend, ChatMessage, FragmentStream, Runtime, RunnerKind, RuntimeError, Session, SessionId,
};
use crate::store::StoreError;
use crate::turn::{CancelSource, TurnSink};
use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

pub fn test_snapshot() -> RegistrySnapshot {
    AgentRegistry::defaults(&AgentConfig::provider_default(Provider::Ollama)).snapshot()
}

/// One scripted producer action.
#[derive(Debug, Clone)]
pub enum Step {
    Text(String),
    Empty,
    Pause(Duration),
    Complete,
    Fail(String),
}

impl Step {
    pub fn text(text: &str) -> Self {
        Step::Text(text.to_string())
    }
}

#[derive(Default)]
struct Shared {
    scripts: Mutex<VecDeque<Vec<Step>>>,
    submitted: Mutex<Vec<ChatMessage>>,
    builds: Mutex<Vec<(RunnerKind, RegistrySnapshot)>>,
    fail_builds: AtomicBool,
    disposals: AtomicUsize,
}

/// Runtime whose backends replay queued scripts, one per submitted turn.
#[derive(Default, Clone)]
pub struct ScriptedRuntime {
    shared: Arc<Shared>,
}

impl ScriptedRuntime {
    pub fn push_script(&self, script: Vec<Step>) {
        self.shared.scripts.lock().unwrap().push_back(script);
    }

    pub fn fail_builds(&self, fail: bool) {
        self.shared.fail_builds.store(fail, Ordering::SeqCst);
    }

    /// Content of every submitted turn, in order.
    pub fn submitted(&self) -> Vec<String> {
        self.submitted_messages()
            .into_iter()
            .map(|m| m.content)
            .collect()
    }

    pub fn submitted_messages(&self) -> Vec<ChatMessage> {
        self.shared.submitted.lock().unwrap().clone()
    }

    pub fn builds(&self) -> Vec<(RunnerKind, RegistrySnapshot)> {
        self.shared.builds.lock().unwrap().clone()
    }

    pub fn disposals(&self) -> usize {
        self.shared.disposals.load(Ordering::SeqCst)
    }

    pub async fn wait_for_disposals(&self, n: usize) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while self.disposals() < n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("producer never observed disposal");
    }
}

impl Runtime for ScriptedRuntime {
    fn build(
        &self,
        kind: RunnerKind,
        snapshot: RegistrySnapshot,
    ) -> Result<Arc<dyn Backend>, RuntimeError> {
        if self.shared.fail_builds.load(Ordering::SeqCst) {
            return Err(RuntimeError::Build("scripted build failure".into()));
        }
        self.shared
            .builds
            .lock()
            .unwrap()
            .push((kind, snapshot.clone()));
        Ok(Arc::new(ScriptedBackend {
            kind,
            snapshot,
            shared: self.shared.clone(),
            sessions: Mutex::new(HashSet::new()),
        }))
    }
}

struct ScriptedBackend {
    kind: RunnerKind,
    snapshot: RegistrySnapshot,
    shared: Arc<Shared>,
    sessions: Mutex<HashSet<SessionId>>,
}

#[async_trait]
impl Backend for ScriptedBackend {
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
        let id = SessionId::generate();
        self.sessions.lock().unwrap().insert(id.clone());
        Ok(Session {
            id,
            app_id: app_id.to_string(),
            primary_agent,
        })
    }

    async fn submit_turn(
        &self,
        _agent: AgentId,
        session: &SessionId,
        message: ChatMessage,
    ) -> Result<FragmentStream, RuntimeError> {
        if !self.sessions.lock().unwrap().contains(session) {
            return Err(RuntimeError::SessionNotFound(session.to_string()));
        }
        self.shared.submitted.lock().unwrap().push(message);
        let script = self
            .shared
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| vec![Step::text("ok"), Step::Complete]);
        let shared = self.shared.clone();

        Ok(stream::spawn(CHANNEL_CAPACITY, move |sink| async move {
            let disposed = || shared.disposals.fetch_add(1, Ordering::SeqCst);
            for step in script {
                match step {
                    Step::Text(text) => {
                        if !sink.text(text).await {
                            disposed();
                            return;
                        }
                    }
                    Step::Empty => {
                        if !sink.empty().await {
                            disposed();
                            return;
                        }
                    }
                    Step::Pause(delay) => {
                        tokio::select! {
                            biased;
                            () = sink.disposed() => {
                                disposed();
                                return;
                            }
                            () = tokio::time::sleep(delay) => {}
                        }
                    }
                    Step::Complete => {
                        sink.complete().await;
                        return;
                    }
                    Step::Fail(reason) => {
                        sink.fail(reason).await;
                        return;
                    }
                }
            }
        }))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    Waiting(usize),
    Clear,
    Fragment(String),
}

pub struct RecordingSink {
    events: Vec<SinkEvent>,
    seen: watch::Sender<usize>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            seen: watch::channel(0).0,
        }
    }

    pub fn events(&self) -> Vec<SinkEvent> {
        self.events.clone()
    }

    pub fn fragments(&self) -> Vec<String> {
        self.events
            .iter()
            .filter_map(|e| match e {
                SinkEvent::Fragment(text) => Some(text.clone()),
                _ => None,
            })
            .collect()
    }
}

impl TurnSink for RecordingSink {
    fn waiting(&mut self, frame: usize) {
        self.events.push(SinkEvent::Waiting(frame));
    }

    fn clear_waiting(&mut self) {
        self.events.push(SinkEvent::Clear);
    }

    fn fragment(&mut self, text: &str) {
        self.events.push(SinkEvent::Fragment(text.to_string()));
        self.seen.send_modify(|n| *n += 1);
    }
}

/// Fires once the watched sink has forwarded a number of fragments, or
/// once a fixed delay has passed.
pub struct CancelAfter {
    seen: Option<watch::Receiver<usize>>,
    after: usize,
    deadline: Option<tokio::time::Instant>,
}

impl CancelAfter {
    pub fn never() -> Self {
        Self {
            seen: None,
            after: 0,
            deadline: None,
        }
    }

    pub fn fragments(after: usize, sink: &RecordingSink) -> Self {
        Self {
            seen: Some(sink.seen.subscribe()),
            after,
            deadline: None,
        }
    }

    pub fn delay(delay: Duration) -> Self {
        Self {
            seen: None,
            after: 0,
            deadline: Some(tokio::time::Instant::now() + delay),
        }
    }
}

#[async_trait]
impl CancelSource for CancelAfter {
    async fn cancelled(&mut self) {
        if let Some(deadline) = self.deadline {
            return tokio::time::sleep_until(deadline).await;
        }
        let after = self.after;
        let Some(seen) = self.seen.as_mut() else {
            return std::future::pending().await;
        };
        loop {
            if *seen.borrow_and_update() >= after {
                return;
            }
            if seen.changed().await.is_err() {
                return std::future::pending().await;
            }
        }
    }
}

#[derive(Default)]
pub struct MemoryLog {
    entries: Mutex<Vec<(LogRole, String)>>,
    stats: Mutex<Vec<AgentStat>>,
}

impl MemoryLog {
    pub fn entries(&self) -> Vec<(LogRole, String)> {
        self.entries.lock().unwrap().clone()
    }
}

impl ActionLog for MemoryLog {
    fn log(&self, role: LogRole, text: &str) {
        self.entries.lock().unwrap().push((role, text.to_string()));
    }

    fn recent(&self, limit: usize) -> Result<Vec<LogEntry>, StoreError> {
        let entries = self.entries.lock().unwrap();
        let skip = entries.len().saturating_sub(limit);
        Ok(entries
            .iter()
            .skip(skip)
            .map(|(role, text)| LogEntry {
                timestamp: chrono::Utc::now(),
                role: role.tag().to_string(),
                text: text.clone(),
            })
            .collect())
    }

    fn record_stat(&self, stat: &AgentStat) {
        self.stats.lock().unwrap().push(stat.clone());
    }

    fn stats(&self) -> Result<Vec<AgentStat>, StoreError> {
        Ok(self.stats.lock().unwrap().clone())
    }
}

/// Line input that replays fixed answers, then reports EOF.
pub struct ScriptedInput {
    lines: VecDeque<String>,
    pub prompts: Vec<String>,
}

impl ScriptedInput {
    pub fn new(lines: &[&str]) -> Self {
        Self {
            lines: lines.iter().map(|l| (*l).to_string()).collect(),
            prompts: Vec::new(),
        }
    }
}

impl LineInput for ScriptedInput {
    fn read_line(&mut self, prompt: &str) -> std::io::Result<Line> {
        self.prompts.push(prompt.to_string());
        Ok(self.lines.pop_front().map_or(Line::Eof, Line::Text))
    }
}
