use anyhow::{Context, Result};
use clap::Parser;
use crewctl::action_log::{ActionLog, SqliteActionLog, TracingActionLog};
use crewctl::agent::{AgentConfig, AgentRegistry};
use crewctl::cli::Cli;
use crewctl::config::Config;
use crewctl::controller::{Controller, ControllerSettings};
use crewctl::provider::{OllamaClient, ProviderCatalog};
use crewctl::repl::{self, terminal::Line, terminal::LineInput, terminal::RustylineInput};
use crewctl::runtime::{LocalRuntime, RunnerKind, RuntimeSettings};
use crewctl::store::ConfigStore;
use crewctl::turn::TurnTiming;
use std::process::ExitCode;
use std::sync::Arc;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading config: {e}");
            return ExitCode::FAILURE;
        }
    };

    init_logging(&cli, &config);

    match run(cli, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(cli: &Cli, config: &Config) {
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::prelude::*;

    if cli.verbose {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::new("crewctl=debug"))
            .with_writer(std::io::stderr)
            .try_init();
    } else if std::env::var("CREWCTL_LOG").is_ok() {
        let path = config.log_file_path();
        let file = std::fs::create_dir_all(&config.data_dir)
            .and_then(|()| std::fs::File::create(&path));
        match file {
            Ok(file) => {
                let file_layer = tracing_subscriber::fmt::layer()
                    .with_writer(file)
                    .with_ansi(false);
                let _ = tracing_subscriber::registry()
                    .with(file_layer.with_filter(EnvFilter::new("crewctl=debug")))
                    .try_init();
            }
            Err(err) => eprintln!("Failed to create log file {}: {err}", path.display()),
        }
    } else if std::env::var("RUST_LOG").is_ok() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_writer(std::io::stderr)
            .try_init();
    }
}

/// Ask once; anything but `2`/`SQLITE` selects the in-memory runner.
fn prompt_runner(input: &mut dyn LineInput) -> Result<RunnerKind> {
    println!("Select a runner:");
    println!("  [1] IN_MEMORY");
    println!("  [2] SQLITE");
    let kind = match input.read_line("Runner [1]: ")? {
        Line::Text(choice) => match choice.trim() {
            "2" => RunnerKind::Sqlite,
            other => other.parse().unwrap_or(RunnerKind::InMemory),
        },
        Line::Interrupted | Line::Eof => RunnerKind::InMemory,
    };
    Ok(kind)
}

async fn run(cli: Cli, config: Config) -> Result<()> {
    let mut input = RustylineInput::new().context("Failed to initialize line input")?;

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("Failed to create {}", config.data_dir.display()))?;

    let project_dir = match &cli.project {
        Some(path) => path.clone(),
        None => std::env::current_dir().context("Failed to read the current directory")?,
    };
    let project_dir = project_dir.canonicalize().unwrap_or(project_dir);

    let store = ConfigStore::new(config.store_path());
    let (provider, model) = cli.default_agent(&config);
    let mut registry = AgentRegistry::defaults(&AgentConfig::new(provider, model));
    match registry.load_overrides(&store) {
        Ok(report) => tracing::debug!(
            applied = report.applied,
            skipped = report.skipped,
            "Loaded agent overrides"
        ),
        Err(e) => eprintln!("Warning: could not read saved agent configs: {e}. Using defaults."),
    }

    let log: Arc<dyn ActionLog> = match SqliteActionLog::open(&config.action_log_path()) {
        Ok(log) => Arc::new(log),
        Err(e) => {
            tracing::warn!("Action log unavailable, logging to tracing only: {e}");
            Arc::new(TracingActionLog)
        }
    };

    let kind = match cli.runner(&config) {
        Some(kind) => kind,
        None => prompt_runner(&mut input)?,
    };

    let runtime = Arc::new(LocalRuntime::new(RuntimeSettings {
        data_dir: config.data_dir.clone(),
        ollama_host: config.ollama_host.clone(),
        project_dir: project_dir.clone(),
        store: store.clone(),
    }));

    let timing = TurnTiming {
        poll_interval: config.poll_interval(),
        spinner_interval: config.spinner_interval(),
    };
    let mut controller = Controller::start(
        runtime,
        store,
        registry,
        log,
        kind,
        ControllerSettings {
            app_id: config.app_id.clone(),
            project_path: project_dir.display().to_string(),
            timing,
        },
    )
    .await
    .context("Failed to start the execution backend")?;

    let catalog = ProviderCatalog::new(OllamaClient::new(config.ollama_host.as_deref()));
    repl::run(&mut controller, &mut input, &catalog, timing.poll_interval).await?;
    Ok(())
}
