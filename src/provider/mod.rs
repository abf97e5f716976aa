//! Model providers.
//!
//! The provider set is closed: every agent is bound to one of [`Provider::ALL`].
//! Each provider carries a default model and, where the list is static, the
//! models it is known to serve. Ollama models are discovered at runtime.

mod catalog;
mod error;
mod gemini;
mod http;
mod ollama;

use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub use catalog::{ModelCatalog, ProviderCatalog};
pub use error::{Error, format_api_error};
pub use gemini::GeminiClient;
pub use ollama::OllamaClient;

/// Timeout for short metadata requests (model discovery).
pub const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);

const GEMINI_MODELS: &[&str] = &[
    "gemini-3-pro-preview",
    "gemini-3-flash-preview",
    "gemini-2.5-pro",
    "gemini-2.5-flash",
    "gemini-2.5-flash-lite",
    "gemini-2.5-flash-thinking",
    "gemini-2.0-pro",
    "gemini-2.0-flash",
    "gemini-2.0-flash-lite",
    "gemini-2.0-flash-thinking-exp",
    "gemini-1.5-pro",
    "gemini-1.5-flash",
    "gemini-1.5-flash-8b",
];

const BEDROCK_MODELS: &[&str] = &[
    "anthropic.claude-3-sonnet-20240229-v1:0",
    "anthropic.claude-3-haiku-20240307-v1:0",
    "anthropic.claude-3-5-sonnet-20240620-v1:0",
    "meta.llama3-70b-instruct-v1:0",
    "meta.llama3-8b-instruct-v1:0",
    "amazon.titan-text-express-v1",
];

/// Supported model providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Provider {
    Ollama,
    Gemini,
    Bedrock,
}

impl Provider {
    /// All providers, in menu order.
    pub const ALL: &'static [Provider] = &[Provider::Ollama, Provider::Gemini, Provider::Bedrock];

    /// Stable identifier, also the persisted form.
    pub fn id(self) -> &'static str {
        match self {
            Provider::Ollama => "OLLAMA",
            Provider::Gemini => "GEMINI",
            Provider::Bedrock => "BEDROCK",
        }
    }

    /// Exact, case-sensitive inverse of [`Provider::id`].
    pub fn from_id(id: &str) -> Option<Provider> {
        Provider::ALL.iter().copied().find(|p| p.id() == id)
    }

    pub fn default_model(self) -> &'static str {
        match self {
            Provider::Ollama => "devstral-small-2",
            Provider::Gemini => "gemini-2.5-flash",
            Provider::Bedrock => "anthropic.claude-3-sonnet-20240229-v1:0",
        }
    }

    /// Statically known models. Empty for Ollama, whose models are discovered.
    pub fn known_models(self) -> &'static [&'static str] {
        match self {
            Provider::Ollama => &[],
            Provider::Gemini => GEMINI_MODELS,
            Provider::Bedrock => BEDROCK_MODELS,
        }
    }

    /// Whether `model` is valid for this provider. Ollama accepts anything.
    pub fn is_valid_model(self, model: &str) -> bool {
        self == Provider::Ollama || self.known_models().contains(&model)
    }

    /// Environment variables for API keys.
    pub fn env_vars(self) -> &'static [&'static str] {
        match self {
            Provider::Ollama => &[], // No key needed
            Provider::Gemini => &["GOOGLE_API_KEY", "GEMINI_API_KEY"],
            Provider::Bedrock => &["AWS_ACCESS_KEY_ID"],
        }
    }

    /// Get API key from environment.
    pub fn api_key(self) -> Option<String> {
        for var in self.env_vars() {
            if let Ok(key) = env::var(var)
                && !key.is_empty()
            {
                return Some(key);
            }
        }
        if self == Provider::Ollama {
            return Some(String::new());
        }
        None
    }

    /// Comma-separated list of every provider id, for messages.
    pub fn valid_list() -> String {
        Provider::ALL
            .iter()
            .map(|p| p.id())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// A provider name outside the closed set.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown provider: {0}")]
pub struct UnknownProvider(pub String);

impl FromStr for Provider {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Provider::ALL
            .iter()
            .copied()
            .find(|p| p.id().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| UnknownProvider(trimmed.to_string()))
    }
}
