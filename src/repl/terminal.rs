//! Terminal collaborators: line input, the ESC cancel source and the
//! streaming output sink.

use crate::turn::{CancelSource, TurnSink};
use async_trait::async_trait;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::io::{self, Stdout, Write};
use std::time::Duration;

pub const BLUE: &str = "\x1b[94m";
pub const GREEN: &str = "\x1b[92m";
pub const ORANGE: &str = "\x1b[38;5;208m";
pub const YELLOW: &str = "\x1b[93m";
pub const RED: &str = "\x1b[91m";
pub const DIM: &str = "\x1b[2m";
pub const BOLD: &str = "\x1b[1m";
pub const RESET: &str = "\x1b[0m";

const SPINNER: [char; 4] = ['|', '/', '-', '\\'];

/// Result of one line read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    Text(String),
    /// Ctrl-C at the prompt.
    Interrupted,
    Eof,
}

/// Blocking source of completed input lines.
pub trait LineInput {
    fn read_line(&mut self, prompt: &str) -> io::Result<Line>;

    fn add_history(&mut self, _line: &str) {}
}

pub struct RustylineInput {
    editor: DefaultEditor,
}

impl RustylineInput {
    pub fn new() -> Result<Self, ReadlineError> {
        Ok(Self {
            editor: DefaultEditor::new()?,
        })
    }
}

impl LineInput for RustylineInput {
    fn read_line(&mut self, prompt: &str) -> io::Result<Line> {
        let result = tokio::task::block_in_place(|| self.editor.readline(prompt));
        match result {
            Ok(line) => Ok(Line::Text(line)),
            Err(ReadlineError::Interrupted) => Ok(Line::Interrupted),
            Err(ReadlineError::Eof) => Ok(Line::Eof),
            Err(ReadlineError::Io(e)) => Err(e),
            Err(e) => Err(io::Error::other(e)),
        }
    }

    fn add_history(&mut self, line: &str) {
        let _ = self.editor.add_history_entry(line);
    }
}

/// Raw mode for the duration of a turn, so a bare ESC arrives as a key event.
pub struct RawModeGuard;

impl RawModeGuard {
    pub fn enable() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        // Keys pressed during the turn (a late ESC) must not reach the next prompt.
        if let Err(e) = drain_pending_events() {
            tracing::debug!("Failed to drain terminal events: {e}");
        }
        let _ = terminal::disable_raw_mode();
    }
}

/// Discard every terminal event already queued. Returns how many were dropped.
pub fn drain_pending_events() -> io::Result<usize> {
    let mut dropped = 0;
    while event::poll(Duration::ZERO)? {
        event::read()?;
        dropped += 1;
    }
    Ok(dropped)
}

/// Resolves on a bare ESC key press, checked every `poll_interval`.
pub struct EscCancel {
    poll_interval: Duration,
}

impl EscCancel {
    pub fn new(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }
}

fn is_cancel_key(event: &Event) -> bool {
    matches!(
        event,
        Event::Key(key) if key.code == KeyCode::Esc && key.kind == KeyEventKind::Press
    )
}

#[async_trait]
impl CancelSource for EscCancel {
    async fn cancelled(&mut self) {
        loop {
            match event::poll(Duration::ZERO) {
                Ok(true) => match event::read() {
                    Ok(event) if is_cancel_key(&event) => return,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!("Terminal read failed, ESC disabled: {e}");
                        return std::future::pending().await;
                    }
                },
                Ok(false) => tokio::time::sleep(self.poll_interval).await,
                Err(e) => {
                    tracing::warn!("Terminal poll failed, ESC disabled: {e}");
                    return std::future::pending().await;
                }
            }
        }
    }
}

/// Streams a turn to stdout with a "Thinking" pulse until text arrives.
///
/// `label` is printed once the pulse is cleared, ahead of the reply.
pub struct TerminalSink {
    out: Stdout,
    raw: bool,
    label: String,
}

impl TerminalSink {
    pub fn new(raw: bool, label: impl Into<String>) -> Self {
        Self {
            out: io::stdout(),
            raw,
            label: label.into(),
        }
    }
}

fn spinner_line(frame: usize) -> String {
    format!("\r{ORANGE}Thinking {}{RESET}", SPINNER[frame % SPINNER.len()])
}

/// Raw mode does not translate `\n`; restore the carriage return.
fn for_terminal(text: &str, raw: bool) -> std::borrow::Cow<'_, str> {
    if raw && text.contains('\n') {
        std::borrow::Cow::Owned(text.replace("\r\n", "\n").replace('\n', "\r\n"))
    } else {
        std::borrow::Cow::Borrowed(text)
    }
}

impl TurnSink for TerminalSink {
    fn waiting(&mut self, frame: usize) {
        let _ = write!(self.out, "{}", spinner_line(frame));
        let _ = self.out.flush();
    }

    fn clear_waiting(&mut self) {
        let _ = write!(self.out, "\r\x1b[2K{}", self.label);
        let _ = self.out.flush();
    }

    fn fragment(&mut self, text: &str) {
        let _ = write!(self.out, "{}", for_terminal(text, self.raw));
        let _ = self.out.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossterm::event::{KeyEvent, KeyModifiers};

    #[test]
    fn test_spinner_cycles() {
        assert_eq!(spinner_line(0), spinner_line(4));
        assert!(spinner_line(1).contains("Thinking /"));
    }

    #[test]
    fn test_newlines_in_raw_mode() {
        assert_eq!(for_terminal("a\nb", true), "a\r\nb");
        assert_eq!(for_terminal("a\r\nb", true), "a\r\nb");
        assert_eq!(for_terminal("a\nb", false), "a\nb");
    }

    #[test]
    fn test_only_bare_esc_press_cancels() {
        let esc = Event::Key(KeyEvent::new(KeyCode::Esc, KeyModifiers::NONE));
        let other = Event::Key(KeyEvent::new(KeyCode::Char('q'), KeyModifiers::NONE));
        assert!(is_cancel_key(&esc));
        assert!(!is_cancel_key(&other));
    }
}
