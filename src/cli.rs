//! Command-line flags.

use crate::config::Config;
use crate::provider::Provider;
use crate::runtime::RunnerKind;
use clap::Parser;
use std::path::PathBuf;

/// Drive a crew of named LLM agents from the terminal
#[derive(Parser, Debug, Default)]
#[command(name = "crewctl", version, about)]
pub struct Cli {
    /// Coordinator provider (OLLAMA, GEMINI, BEDROCK)
    #[arg(short, long, value_parser = parse_provider)]
    pub provider: Option<Provider>,

    /// Coordinator model (defaults to the provider's default model)
    #[arg(short, long)]
    pub model: Option<String>,

    /// Execution runner (IN_MEMORY, SQLITE); prompts when unset
    #[arg(short, long, value_parser = parse_runner)]
    pub runner: Option<RunnerKind>,

    /// Debug logging on stderr
    #[arg(short, long)]
    pub verbose: bool,

    /// Project directory used for memory recall (defaults to the current directory)
    #[arg(long, value_name = "PATH")]
    pub project: Option<PathBuf>,
}

fn parse_provider(s: &str) -> Result<Provider, String> {
    s.parse().map_err(|e: crate::provider::UnknownProvider| {
        format!("{e}; expected one of {}", Provider::valid_list())
    })
}

fn parse_runner(s: &str) -> Result<RunnerKind, String> {
    s.parse().map_err(|e: crate::runtime::UnknownRunner| e.to_string())
}

impl Cli {
    /// Default agent config: flags first, then the config file, then OLLAMA.
    ///
    /// A provider without a model takes that provider's default model.
    #[must_use]
    pub fn default_agent(&self, config: &Config) -> (Provider, String) {
        let file_provider = config.default_provider();
        let provider = self.provider.or(file_provider).unwrap_or(Provider::Ollama);

        let model = match (&self.model, self.provider) {
            (Some(model), _) => model.clone(),
            // An explicit provider flag discards a model chosen for another provider.
            (None, Some(_)) if self.provider != file_provider => {
                provider.default_model().to_string()
            }
            (None, _) => config
                .default_model
                .clone()
                .unwrap_or_else(|| provider.default_model().to_string()),
        };
        (provider, model)
    }

    /// Runner named by the flag or the config file, if any.
    #[must_use]
    pub fn runner(&self, config: &Config) -> Option<RunnerKind> {
        self.runner.or_else(|| config.runner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("crewctl").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_flags_parse_case_insensitively() {
        let cli = parse(&["-p", "gemini", "-r", "sqlite", "-v"]);
        assert_eq!(cli.provider, Some(Provider::Gemini));
        assert_eq!(cli.runner, Some(RunnerKind::Sqlite));
        assert!(cli.verbose);
    }

    #[test]
    fn test_bad_provider_is_rejected() {
        let err = Cli::try_parse_from(["crewctl", "--provider", "openai"]).unwrap_err();
        assert!(err.to_string().contains("OLLAMA"));
    }

    #[test]
    fn test_provider_flag_takes_its_default_model() {
        let config = Config {
            default_provider: Some("OLLAMA".into()),
            default_model: Some("qwen3:8b".into()),
            ..Config::default()
        };
        let cli = parse(&["-p", "GEMINI"]);
        assert_eq!(
            cli.default_agent(&config),
            (Provider::Gemini, "gemini-2.5-flash".to_string())
        );

        let cli = parse(&[]);
        assert_eq!(
            cli.default_agent(&config),
            (Provider::Ollama, "qwen3:8b".to_string())
        );

        let cli = parse(&["-m", "llama3:8b"]);
        assert_eq!(cli.default_agent(&config).1, "llama3:8b");
    }

    #[test]
    fn test_runner_flag_overrides_file() {
        let config = Config {
            runner: Some("IN_MEMORY".into()),
            ..Config::default()
        };
        assert_eq!(parse(&["-r", "SQLITE"]).runner(&config), Some(RunnerKind::Sqlite));
        assert_eq!(parse(&[]).runner(&config), Some(RunnerKind::InMemory));
        assert_eq!(parse(&[]).runner(&Config::default()), None);
    }
}
