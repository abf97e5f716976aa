use crate::provider::Provider;
use crate::runtime::RunnerKind;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Upper bound on the ESC poll interval.
pub const MAX_POLL_INTERVAL_MS: u64 = 50;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Holds the config store, session and action log databases.
    pub data_dir: PathBuf,
    pub default_provider: Option<String>,
    pub default_model: Option<String>,
    /// Runner to start with. Unset means ask at startup.
    pub runner: Option<String>,
    /// Ollama host, `OLLAMA_HOST` when unset.
    pub ollama_host: Option<String>,
    pub poll_interval_ms: u64,
    pub spinner_interval_ms: u64,
    pub app_id: String,
}

fn home_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".crewctl"))
        .unwrap_or_else(|| PathBuf::from(".crewctl"))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: home_dir(),
            default_provider: None,
            default_model: None,
            runner: None,
            ollama_host: None,
            poll_interval_ms: MAX_POLL_INTERVAL_MS,
            spinner_interval_ms: 100,
            app_id: "crewctl".to_string(),
        }
    }
}

impl Config {
    /// `~/.crewctl/config.toml`.
    pub fn path() -> PathBuf {
        home_dir().join("config.toml")
    }

    pub fn load() -> crate::Result<Self> {
        Self::load_from(&Self::path())
    }

    /// A missing file yields the defaults.
    pub fn load_from(path: &Path) -> crate::Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("{}: {e}", path.display())))
    }

    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join("central_memory.db")
    }

    pub fn action_log_path(&self) -> PathBuf {
        self.data_dir.join("action_log.db")
    }

    pub fn log_file_path(&self) -> PathBuf {
        self.data_dir.join("crewctl.log")
    }

    pub fn default_provider(&self) -> Option<Provider> {
        let name = self.default_provider.as_deref()?;
        match name.parse() {
            Ok(provider) => Some(provider),
            Err(e) => {
                tracing::warn!("Ignoring default_provider in config: {e}");
                None
            }
        }
    }

    pub fn runner(&self) -> Option<RunnerKind> {
        let name = self.runner.as_deref()?;
        match name.parse() {
            Ok(kind) => Some(kind),
            Err(e) => {
                tracing::warn!("Ignoring runner in config: {e}");
                None
            }
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.clamp(1, MAX_POLL_INTERVAL_MS))
    }

    pub fn spinner_interval(&self) -> Duration {
        Duration::from_millis(self.spinner_interval_ms.max(1))
    }
}
