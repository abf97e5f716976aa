//! Interactive command loop.
//!
//! Plain lines go to the coordinator as a streamed turn; slash commands
//! drive the controller. Errors from a command are reported and the loop
//! continues.

pub mod commands;
pub mod editor;
pub mod images;
pub mod terminal;

pub use commands::Command;

use crate::action_log::AgentStat;
use crate::agent::{AgentConfig, AgentId};
use crate::controller::{Controller, Status, SwitchOutcome};
use crate::error::{Error, Result};
use crate::provider::{ModelCatalog, Provider};
use crate::runtime::{ChatMessage, RunnerKind};
use crate::turn::TurnOutcome;
use std::io::{self, Write};
use std::path::Path;
use std::time::Duration;
use terminal::{
    BLUE, BOLD, DIM, EscCancel, GREEN, Line, LineInput, RED, RESET, RawModeGuard, TerminalSink,
    YELLOW,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

/// Run until `exit` or EOF.
pub async fn run(
    controller: &mut Controller,
    input: &mut dyn LineInput,
    catalog: &dyn ModelCatalog,
    poll_interval: Duration,
) -> Result<()> {
    let mut out = io::stdout();
    print_banner(&mut out, controller)?;

    loop {
        let prompt = format!("{BLUE}You>{RESET} ");
        let line = match input.read_line(&prompt)? {
            Line::Text(line) => line,
            Line::Interrupted => {
                writeln!(out, "{DIM}^C{RESET}")?;
                continue;
            }
            Line::Eof => break,
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        input.add_history(line);

        match Command::parse(line) {
            Command::Message(text) => run_message(controller, &text, poll_interval).await,
            Command::Summarize => run_summarize(controller, poll_interval).await,
            command => match handle(controller, command, input, &mut out, catalog).await {
                Ok(Flow::Exit) => break,
                Ok(Flow::Continue) => {}
                Err(e) => report_error(&mut out, &e)?,
            },
        }
    }

    writeln!(out, "{DIM}Goodbye!{RESET}")?;
    Ok(())
}

/// Raw mode, the terminal sink and the ESC watcher for one streamed turn.
struct TerminalTurn {
    raw: Option<RawModeGuard>,
    sink: TerminalSink,
    cancel: EscCancel,
}

impl TerminalTurn {
    fn begin(poll_interval: Duration) -> Self {
        let raw = match RawModeGuard::enable() {
            Ok(guard) => Some(guard),
            Err(e) => {
                tracing::warn!("Raw mode unavailable, ESC cancel may not work: {e}");
                None
            }
        };
        let label = format!("{GREEN}{}:{RESET} ", AgentId::Coordinator);
        Self {
            sink: TerminalSink::new(raw.is_some(), label),
            cancel: EscCancel::new(poll_interval),
            raw,
        }
    }

    /// Leave raw mode, discarding keys pressed during the turn.
    fn end(self) {
        drop(self.raw);
    }
}

fn print_outcome(outcome: &TurnOutcome) {
    match outcome {
        TurnOutcome::Completed(_) => println!(),
        TurnOutcome::Cancelled(_) => println!("\n{YELLOW}[!] Interrupted by user.{RESET}"),
        TurnOutcome::Failed { reason, .. } => println!("\n{RED}Error:{RESET} {reason}"),
    }
}

async fn run_message(controller: &mut Controller, text: &str, poll_interval: Duration) {
    let attachments = images::attach_images(text, Path::new(controller.project_path()));
    for attachment in &attachments {
        println!("{DIM}[Attached {}]{RESET}", attachment.path.display());
    }
    let message = ChatMessage::user(text)
        .with_images(attachments.into_iter().map(|a| a.image).collect());

    let mut turn = TerminalTurn::begin(poll_interval);
    let outcome = controller
        .submit(message, &mut turn.cancel, &mut turn.sink)
        .await;
    turn.end();
    print_outcome(&outcome);
}

async fn run_summarize(controller: &mut Controller, poll_interval: Duration) {
    println!("{DIM}Requesting session summary...{RESET}");
    let mut turn = TerminalTurn::begin(poll_interval);
    let result = controller.summarize(&mut turn.cancel, &mut turn.sink).await;
    turn.end();

    match result {
        Ok(outcome) => {
            print_outcome(&outcome);
            if matches!(outcome, TurnOutcome::Completed(_)) {
                println!(
                    "{GREEN}Summary written to {}{RESET}",
                    controller.summary_path().display()
                );
            }
        }
        Err(e) => {
            println!();
            if let Err(write_err) = report_error(&mut io::stdout(), &e) {
                tracing::warn!("Failed to report error: {write_err}");
            }
        }
    }
}

fn report_error(out: &mut dyn Write, error: &Error) -> io::Result<()> {
    match error {
        Error::Store(_) => writeln!(out, "{YELLOW}Warning:{RESET} {error}. Nothing was changed."),
        Error::InvalidSelection(_) => writeln!(out, "{YELLOW}{error}{RESET}"),
        Error::BackendBuild(_) => {
            writeln!(out, "{RED}Error:{RESET} {error}. The previous backend is still active.")
        }
        Error::NothingToCompact => writeln!(out, "{YELLOW}{error}.{RESET}"),
        Error::EmptySummary | Error::Compaction(_) => {
            writeln!(out, "{RED}Error:{RESET} {error}. The session is unchanged.")
        }
        _ => writeln!(out, "{RED}Error:{RESET} {error}"),
    }
}

/// Execute one non-message command.
pub async fn handle(
    controller: &mut Controller,
    command: Command,
    input: &mut dyn LineInput,
    out: &mut dyn Write,
    catalog: &dyn ModelCatalog,
) -> Result<Flow> {
    match command {
        Command::Exit => return Ok(Flow::Exit),
        Command::Help => print_help(out)?,
        Command::Status => print_status(out, &controller.status())?,
        Command::Runner(arg) => switch_runner(controller, arg, input, out).await?,
        Command::Reset => {
            let id = controller.reset().await?;
            writeln!(out, "{GREEN}Session reset.{RESET} New session: {id}")?;
        }
        Command::Compact => {
            writeln!(out, "{DIM}Summarizing conversation...{RESET}")?;
            let id = controller.compact().await?;
            writeln!(
                out,
                "{GREEN}Session compacted.{RESET} New session: {id}. The summary will be sent with your next message."
            )?;
        }
        Command::Config(args) => {
            let selection = if args.is_empty() {
                editor::interactive(input, out, controller.registry(), catalog).await?
            } else {
                Some(editor::resolve_positional(controller.registry(), &args)?)
            };
            if let Some((agent, config)) = selection {
                apply(controller, out, agent, config)?;
            }
        }
        Command::Provider(None) => {
            let current = controller.registry().get(AgentId::Coordinator);
            writeln!(out, "Coordinator provider: {}", current.provider)?;
            writeln!(out, "{DIM}Usage: /provider <{}>{RESET}", Provider::valid_list())?;
        }
        Command::Provider(Some(name)) => {
            let provider: Provider = name.parse().map_err(|_| editor::invalid_provider(&name))?;
            apply(
                controller,
                out,
                AgentId::Coordinator,
                AgentConfig::provider_default(provider),
            )?;
        }
        Command::Model(None) => {
            let current = controller.registry().get(AgentId::Coordinator);
            writeln!(out, "Coordinator model: {}", current.model)?;
            writeln!(out, "{DIM}Usage: /model <name>{RESET}")?;
        }
        Command::Model(Some(model)) => {
            let provider = controller.registry().get(AgentId::Coordinator).provider;
            if !provider.is_valid_model(&model) {
                writeln!(
                    out,
                    "{YELLOW}Note:{RESET} {model} is not a known {provider} model; using it anyway."
                )?;
            }
            apply(
                controller,
                out,
                AgentId::Coordinator,
                AgentConfig::new(provider, model),
            )?;
        }
        Command::Models => {
            let current = controller.registry().get(AgentId::Coordinator).clone();
            match catalog.models(current.provider).await {
                Ok(models) if models.is_empty() => {
                    writeln!(out, "No models found for {}.", current.provider)?;
                }
                Ok(models) => {
                    writeln!(out, "{BOLD}{} models:{RESET}", current.provider)?;
                    for model in models {
                        let marker = if model == current.model { " (active)" } else { "" };
                        writeln!(out, "  {model}{marker}")?;
                    }
                }
                Err(e) => writeln!(
                    out,
                    "{YELLOW}Could not list {} models:{RESET} {e}",
                    current.provider
                )?,
            }
        }
        Command::Remember(note) => {
            controller.remember(&note)?;
            writeln!(out, "{GREEN}Saved to project memory.{RESET}")?;
        }
        Command::Memory => match controller.memory()? {
            Some(memory) => writeln!(out, "{memory}")?,
            None => writeln!(out, "No memory saved for {}.", controller.project_path())?,
        },
        Command::Log(limit) => {
            let entries = controller.action_log().recent(limit)?;
            if entries.is_empty() {
                writeln!(out, "Action log is empty.")?;
            }
            for entry in entries {
                writeln!(
                    out,
                    "{DIM}{}{RESET} {:<6} {}",
                    entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    entry.role,
                    entry.text
                )?;
            }
        }
        Command::Stats => print_stats(out, &controller.stats()?)?,
        Command::Invalid(message) => writeln!(out, "{YELLOW}{message}{RESET}")?,
        Command::Unknown(name) => {
            writeln!(out, "Unknown command: {name}. Type /help for commands.")?;
        }
        Command::Message(_) | Command::Summarize => {}
    }
    Ok(Flow::Continue)
}

fn apply(
    controller: &mut Controller,
    out: &mut dyn Write,
    agent: AgentId,
    config: AgentConfig,
) -> Result<()> {
    let change = controller.apply_agent_config(agent, config)?;
    write!(out, "{GREEN}{} set to {}{RESET}", change.agent, change.current)?;
    if change.rebuild_required {
        writeln!(out, " {DIM}(backend rebuilt, new session on next message){RESET}")?;
    } else {
        writeln!(out)?;
    }
    Ok(())
}

fn parse_runner_choice(choice: &str) -> Result<RunnerKind> {
    if let Ok(index) = choice.parse::<usize>() {
        return index
            .checked_sub(1)
            .and_then(|i| RunnerKind::ALL.get(i))
            .copied()
            .ok_or_else(|| Error::InvalidSelection(format!("Invalid selection: {index}.")));
    }
    choice
        .parse()
        .map_err(|e| Error::InvalidSelection(format!("{e}. Available: IN_MEMORY, SQLITE")))
}

async fn switch_runner(
    controller: &mut Controller,
    arg: Option<String>,
    input: &mut dyn LineInput,
    out: &mut dyn Write,
) -> Result<()> {
    let kind = match arg {
        Some(name) => parse_runner_choice(&name)?,
        None => {
            writeln!(out, "{BOLD}Runners:{RESET}")?;
            for (i, kind) in RunnerKind::ALL.iter().enumerate() {
                let active = if *kind == controller.kind() { " (active)" } else { "" };
                writeln!(
                    out,
                    "  [{}] {:<10} {}{active}",
                    i + 1,
                    kind.as_str(),
                    kind.description()
                )?;
            }
            let choice = match input.read_line("Select runner: ")? {
                Line::Text(text) if !text.trim().is_empty() => text.trim().to_string(),
                _ => return Ok(()),
            };
            parse_runner_choice(&choice)?
        }
    };

    let outcome = controller
        .request_switch(kind, |kind| confirm_switch(input, out, kind))
        .await?;
    match outcome {
        SwitchOutcome::AlreadyActive => writeln!(out, "Already using {kind}.")?,
        SwitchOutcome::Declined => writeln!(out, "Runner unchanged.")?,
        SwitchOutcome::Switched(id) => {
            writeln!(out, "{GREEN}Switched to {kind}.{RESET} New session: {id}")?;
        }
    }
    Ok(())
}

fn confirm_switch(input: &mut dyn LineInput, out: &mut dyn Write, kind: RunnerKind) -> bool {
    let _ = writeln!(
        out,
        "{YELLOW}Switching to {kind} discards the current conversation.{RESET}"
    );
    match input.read_line("Continue? [y/N]: ") {
        Ok(Line::Text(answer)) => {
            matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
        }
        _ => false,
    }
}

fn print_banner(out: &mut dyn Write, controller: &Controller) -> io::Result<()> {
    writeln!(out)?;
    writeln!(out, "{BOLD}crewctl{RESET} - a crew of agents at your terminal")?;
    writeln!(
        out,
        "{DIM}Coordinator:{RESET} {}  {DIM}Runner:{RESET} {}",
        controller.registry().get(AgentId::Coordinator),
        controller.kind()
    )?;
    writeln!(out, "Type {BLUE}/help{RESET} for commands. Press ESC to interrupt a reply.")?;
    writeln!(out)
}

fn print_help(out: &mut dyn Write) -> io::Result<()> {
    writeln!(out, "{BOLD}Commands:{RESET}")?;
    for (command, description) in [
        ("/status", "Show runner, session and agent configuration"),
        ("/runner [kind]", "List runners or switch to another one"),
        ("/reset", "Start a new, empty session"),
        ("/compact", "Summarize and continue in a new session"),
        ("/config", "Edit an agent's provider and model"),
        ("/config <agent> <provider> [model]", "Set an agent's config directly"),
        ("/provider <name>", "Switch the coordinator's provider"),
        ("/model <name>", "Switch the coordinator's model"),
        ("/models", "List the coordinator provider's models"),
        ("/remember <note>", "Save a note to this project's memory"),
        ("/memory", "Show this project's memory"),
        ("/log [n]", "Show the last n action log entries"),
        ("/stats", "Show recent agent invocations"),
        ("/summarize", "Write a session summary for the next session"),
        ("/help", "Show this help"),
        ("exit", "Quit"),
    ] {
        writeln!(out, "  {BLUE}{command:<36}{RESET} {description}")?;
    }
    writeln!(out, "{DIM}ESC interrupts the agent while it is replying.{RESET}")
}

/// Invocations shown by `/stats`.
const STATS_ROWS: usize = 20;

fn truncate_model(model: &str) -> String {
    if model.chars().count() > 25 {
        let head: String = model.chars().take(22).collect();
        format!("{head}...")
    } else {
        model.to_string()
    }
}

fn print_stats(out: &mut dyn Write, stats: &[AgentStat]) -> io::Result<()> {
    if stats.is_empty() {
        return writeln!(out, "No statistics available yet.");
    }
    writeln!(
        out,
        "{BOLD}{:<16} {:<8} {:<25} {:>9} {:<7} {}{RESET}",
        "Agent", "Provider", "Model", "Duration", "Success", "In/Out"
    )?;
    for stat in &stats[stats.len().saturating_sub(STATS_ROWS)..] {
        let success = if stat.success {
            format!("{GREEN}{:<7}{RESET}", "yes")
        } else {
            format!("{RED}{:<7}{RESET}", "no")
        };
        writeln!(
            out,
            "{:<16} {:<8} {:<25} {:>7}ms {success} {}/{}",
            stat.agent,
            stat.provider,
            truncate_model(&stat.model),
            stat.duration_ms,
            stat.input_len,
            stat.output_len
        )?;
    }
    writeln!(out, "Total Invocations: {}", stats.len())
}

fn print_status(out: &mut dyn Write, status: &Status) -> io::Result<()> {
    writeln!(out, "{BOLD}Runner:{RESET}  {}", status.kind)?;
    match &status.session {
        Some(id) => writeln!(out, "{BOLD}Session:{RESET} {id}")?,
        None => writeln!(out, "{BOLD}Session:{RESET} pending (created on next message)")?,
    }
    match &status.projects {
        Ok(count) => writeln!(
            out,
            "{BOLD}Store:{RESET}   {} ({count} projects with memory)",
            status.store_path
        )?,
        Err(e) => writeln!(
            out,
            "{BOLD}Store:{RESET}   {} {YELLOW}(unavailable: {e}){RESET}",
            status.store_path
        )?,
    }
    if status.summary_pending {
        writeln!(out, "{BOLD}Summary:{RESET} will be sent with the next message")?;
    }
    writeln!(out, "{BOLD}Agents:{RESET}")?;
    for (agent, config) in &status.agents {
        writeln!(
            out,
            "  {:<16} {:<8} {}",
            agent.name(),
            config.provider.id(),
            config.model
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentRegistry;
    use crate::controller::ControllerSettings;
    use crate::provider::{OllamaClient, ProviderCatalog};
    use crate::store::ConfigStore;
    use crate::testing::{MemoryLog, ScriptedInput, ScriptedRuntime};
    use crate::turn::TurnTiming;
    use std::sync::Arc;
    use tempfile::{TempDir, tempdir};

    struct Harness {
        _dir: TempDir,
        controller: Controller,
        catalog: ProviderCatalog,
    }

    impl Harness {
        async fn new() -> Self {
            let dir = tempdir().unwrap();
            let controller = Controller::start(
                Arc::new(ScriptedRuntime::default()),
                ConfigStore::new(dir.path().join("central_memory.db")),
                AgentRegistry::defaults(&AgentConfig::provider_default(Provider::Ollama)),
                Arc::new(MemoryLog::default()),
                RunnerKind::InMemory,
                ControllerSettings {
                    app_id: "crewctl".into(),
                    project_path: "/work/project".into(),
                    timing: TurnTiming::default(),
                },
            )
            .await
            .unwrap();
            Self {
                _dir: dir,
                controller,
                catalog: ProviderCatalog::new(OllamaClient::new(Some("127.0.0.1:9"))),
            }
        }

        async fn run(&mut self, line: &str, answers: &[&str]) -> (Result<Flow>, String) {
            let mut input = ScriptedInput::new(answers);
            let mut out = Vec::<u8>::new();
            let flow = handle(
                &mut self.controller,
                Command::parse(line),
                &mut input,
                &mut out,
                &self.catalog,
            )
            .await;
            (flow, String::from_utf8(out).unwrap())
        }
    }

    #[tokio::test]
    async fn test_exit_and_unknown() {
        let mut h = Harness::new().await;
        assert!(matches!(h.run("exit", &[]).await.0, Ok(Flow::Exit)));
        let (flow, out) = h.run("/bogus", &[]).await;
        assert!(matches!(flow, Ok(Flow::Continue)));
        assert!(out.contains("Unknown command: /bogus"));
    }

    #[tokio::test]
    async fn test_status_lists_agents_and_runner() {
        let mut h = Harness::new().await;
        let (_, out) = h.run("/status", &[]).await;
        assert!(out.contains("IN_MEMORY"));
        assert!(out.contains("DatabaseAdmin"));
        assert!(out.contains("0 projects with memory"));
        let architect = out.find("Architect").unwrap();
        let tester = out.find("Tester").unwrap();
        assert!(architect < tester);
    }

    #[tokio::test]
    async fn test_positional_config_writes_through() {
        let mut h = Harness::new().await;
        let (flow, out) = h.run("/config coder gemini", &[]).await;
        assert!(flow.is_ok());
        assert!(out.contains("Coder set to [GEMINI] gemini-2.5-flash"));
        assert_eq!(
            h.controller.registry().get(AgentId::Coder),
            &AgentConfig::provider_default(Provider::Gemini)
        );
    }

    #[tokio::test]
    async fn test_bad_config_is_invalid_selection() {
        let mut h = Harness::new().await;
        let (flow, _) = h.run("/config nobody ollama", &[]).await;
        assert!(matches!(flow, Err(Error::InvalidSelection(_))));
    }

    #[tokio::test]
    async fn test_provider_shortcut_rebuilds() {
        let mut h = Harness::new().await;
        let (_, out) = h.run("/provider gemini", &[]).await;
        assert!(out.contains("backend rebuilt"));
        assert!(h.controller.session_id().is_none());

        let (_, out) = h.run("/model gemini-2.5-pro", &[]).await;
        assert!(!out.contains("not a known"));
        assert_eq!(
            h.controller.registry().get(AgentId::Coordinator),
            &AgentConfig::new(Provider::Gemini, "gemini-2.5-pro")
        );
    }

    #[tokio::test]
    async fn test_runner_switch_requires_yes() {
        let mut h = Harness::new().await;
        let before = h.controller.session_id().cloned();

        let (_, out) = h.run("/runner sqlite", &["n"]).await;
        assert!(out.contains("Runner unchanged."));
        assert_eq!(h.controller.session_id().cloned(), before);

        let (_, out) = h.run("/runner", &["2", "yes"]).await;
        assert!(out.contains("Switched to SQLITE."));
        assert_eq!(h.controller.kind(), RunnerKind::Sqlite);

        let (_, out) = h.run("/runner sqlite", &[]).await;
        assert!(out.contains("Already using SQLITE."));
    }

    #[tokio::test]
    async fn test_runner_bad_choice() {
        let mut h = Harness::new().await;
        let (flow, _) = h.run("/runner postgres", &[]).await;
        assert!(matches!(flow, Err(Error::InvalidSelection(_))));
        let (flow, _) = h.run("/runner", &["9"]).await;
        assert!(matches!(flow, Err(Error::InvalidSelection(_))));
    }

    #[tokio::test]
    async fn test_remember_memory_and_log() {
        let mut h = Harness::new().await;
        let (_, out) = h.run("/memory", &[]).await;
        assert!(out.contains("No memory saved for /work/project."));

        h.run("/remember the API lives in src/api", &[]).await;
        let (_, out) = h.run("/memory", &[]).await;
        assert!(out.contains("--- Saved: "));
        assert!(out.contains("the API lives in src/api"));

        h.run("/reset", &[]).await;
        let (_, out) = h.run("/log 1", &[]).await;
        assert!(out.contains("SYSTEM"));
        assert!(out.contains("Session reset by user."));
        assert!(!out.contains("Saved note"));
    }

    #[tokio::test]
    async fn test_stats_table() {
        let mut h = Harness::new().await;
        let (_, out) = h.run("/stats", &[]).await;
        assert!(out.contains("No statistics available yet."));

        let mut sink = crate::testing::RecordingSink::new();
        let mut cancel = crate::testing::CancelAfter::never();
        for _ in 0..3 {
            h.controller.run_turn("hi", &mut cancel, &mut sink).await;
        }

        let (_, out) = h.run("/stats", &[]).await;
        assert!(out.contains("Agent"));
        assert!(out.contains("In/Out"));
        assert_eq!(out.matches("Coordinator").count(), 3);
        assert!(out.contains("2/2"));
        assert!(out.contains("Total Invocations: 3"));
    }

    #[test]
    fn test_stats_show_last_rows_and_truncate_models() {
        let stat = AgentStat {
            timestamp: chrono::Utc::now(),
            agent: "Coder".into(),
            provider: "OLLAMA".into(),
            model: "hf.co/some-org/a-very-long-model-name:q4".into(),
            duration_ms: 900,
            success: false,
            input_len: 1,
            output_len: 0,
        };
        let stats = vec![stat; STATS_ROWS + 5];
        let mut out = Vec::<u8>::new();
        print_stats(&mut out, &stats).unwrap();
        let out = String::from_utf8(out).unwrap();

        assert_eq!(out.matches("Coder").count(), STATS_ROWS);
        assert!(out.contains("hf.co/some-org/a-very-..."));
        assert!(out.contains(&format!("Total Invocations: {}", STATS_ROWS + 5)));
        assert_eq!(truncate_model("llama3:8b"), "llama3:8b");
    }

    #[tokio::test]
    async fn test_help_lists_summary_commands() {
        let mut h = Harness::new().await;
        let (_, out) = h.run("/help", &[]).await;
        assert!(out.contains("/stats"));
        assert!(out.contains("/summarize"));
    }

    #[test]
    fn test_store_errors_are_warnings() {
        let mut out = Vec::<u8>::new();
        let error = Error::Store(crate::store::StoreError::InvalidData("disk full".into()));
        report_error(&mut out, &error).unwrap();
        assert!(String::from_utf8(out).unwrap().contains("Warning:"));
    }
}
