//! Turn execution: submit one user utterance and consume its fragment stream.
//!
//! The engine selects over three sources each iteration, in priority order:
//! the cancel source, the fragment stream, and a bounded tick that drives the
//! waiting indicator. Cancellation therefore wins over any fragment that is
//! ready at the same time. A fragment the producer had already queued when
//! the cancel key was read may still be forwarded by the iteration that
//! was running; at most one can be.

use crate::action_log::{ActionLog, LogRole};
use crate::runtime::{Backend, ChatMessage, Session, StreamEvent};
use async_trait::async_trait;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tracing::debug;

pub const INTERRUPTED_MESSAGE: &str = "User interrupted the agent.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed(String),
    Cancelled(String),
    /// `partial` is the text streamed before the failure, kept for diagnostics.
    Failed { reason: String, partial: String },
}

impl TurnOutcome {
    pub fn text(&self) -> &str {
        match self {
            TurnOutcome::Completed(text) | TurnOutcome::Cancelled(text) => text,
            TurnOutcome::Failed { .. } => "",
        }
    }
}

/// Where a turn's output goes.
pub trait TurnSink: Send {
    /// Show or advance the waiting indicator.
    fn waiting(&mut self, frame: usize);

    /// Remove the waiting indicator. Called once per turn.
    fn clear_waiting(&mut self);

    fn fragment(&mut self, text: &str);
}

/// The single cancellation signal for an in-flight turn.
#[async_trait]
pub trait CancelSource: Send {
    /// Resolves when the user asks to cancel. Must be cancel-safe.
    async fn cancelled(&mut self);
}

#[derive(Debug, Clone, Copy)]
pub struct TurnTiming {
    /// Upper bound between two checks of the cancel source and the indicator.
    pub poll_interval: Duration,
    /// Time per indicator frame.
    pub spinner_interval: Duration,
}

impl Default for TurnTiming {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
            spinner_interval: Duration::from_millis(100),
        }
    }
}

impl TurnTiming {
    fn frame(&self, started: Instant) -> usize {
        let per_frame = self.spinner_interval.as_millis().max(1);
        usize::try_from(started.elapsed().as_millis() / per_frame).unwrap_or(0)
    }
}

/// Indicator bookkeeping: cleared once, never shown again after that.
struct Indicator {
    cleared: bool,
}

impl Indicator {
    fn clear(&mut self, sink: &mut dyn TurnSink) {
        if !self.cleared {
            sink.clear_waiting();
            self.cleared = true;
        }
    }
}

/// Run one turn of `session` to its outcome and report it to `log`.
///
/// Collaborator failures become [`TurnOutcome::Failed`]; nothing is raised.
pub async fn run_turn(
    backend: &dyn Backend,
    session: &Session,
    message: impl Into<ChatMessage>,
    cancel: &mut dyn CancelSource,
    sink: &mut dyn TurnSink,
    log: &dyn ActionLog,
    timing: TurnTiming,
) -> TurnOutcome {
    let message = message.into();
    log.log(LogRole::User, &message.content);

    let outcome = stream_turn(backend, session, message, cancel, sink, timing).await;

    match &outcome {
        TurnOutcome::Completed(text) => log.log(LogRole::Agent, text),
        TurnOutcome::Cancelled(partial) => {
            if !partial.is_empty() {
                log.log(LogRole::Agent, partial);
            }
            log.log(LogRole::System, INTERRUPTED_MESSAGE);
        }
        TurnOutcome::Failed { reason, .. } => log.log(LogRole::Error, reason),
    }
    outcome
}

async fn stream_turn(
    backend: &dyn Backend,
    session: &Session,
    message: ChatMessage,
    cancel: &mut dyn CancelSource,
    sink: &mut dyn TurnSink,
    timing: TurnTiming,
) -> TurnOutcome {
    let mut indicator = Indicator { cleared: false };
    let mut accumulated = String::new();

    let mut stream = match backend
        .submit_turn(session.primary_agent, &session.id, message)
        .await
    {
        Ok(stream) => stream,
        Err(e) => {
            return TurnOutcome::Failed {
                reason: e.to_string(),
                partial: accumulated,
            };
        }
    };

    let started = Instant::now();
    let mut ticker = tokio::time::interval(timing.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let outcome = loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                stream.dispose();
                debug!(session = %session.id, chars = accumulated.len(), "Turn cancelled");
                break TurnOutcome::Cancelled(accumulated);
            }
            event = stream.next() => match event {
                Some(StreamEvent::Fragment(Some(text))) if !text.is_empty() => {
                    indicator.clear(sink);
                    sink.fragment(&text);
                    accumulated.push_str(&text);
                }
                Some(StreamEvent::Fragment(_)) => {}
                Some(StreamEvent::Complete) | None => {
                    break TurnOutcome::Completed(accumulated);
                }
                Some(StreamEvent::Error(reason)) => {
                    debug!(session = %session.id, "Turn failed: {reason}");
                    break TurnOutcome::Failed { reason, partial: accumulated };
                }
            },
            _ = ticker.tick() => {
                if accumulated.is_empty() && !indicator.cleared {
                    sink.waiting(timing.frame(started));
                }
            }
        }
    };

    indicator.clear(sink);
    outcome
}

/// Submit `content` and collect the whole reply without streaming it anywhere.
pub async fn drain_turn(
    backend: &dyn Backend,
    session: &Session,
    content: &str,
) -> Result<String, String> {
    let mut stream = backend
        .submit_turn(session.primary_agent, &session.id, ChatMessage::user(content))
        .await
        .map_err(|e| e.to_string())?;

    let mut text = String::new();
    while let Some(event) = stream.next().await {
        match event {
            StreamEvent::Fragment(Some(fragment)) => text.push_str(&fragment),
            StreamEvent::Fragment(None) => {}
            StreamEvent::Complete => break,
            StreamEvent::Error(reason) => return Err(reason),
        }
    }
    Ok(text)
}
