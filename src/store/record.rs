//! `PROVIDER|MODEL` encoding of agent config records.
//!
//! The encoded string never leaves the store: reads decode straight into
//! [`AgentConfig`].

use crate::agent::AgentConfig;
use crate::provider::Provider;
use thiserror::Error;

const SEPARATOR: char = '|';

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("Malformed agent config record: {0:?}")]
    Malformed(String),

    #[error("Invalid provider in saved config: {0}")]
    UnknownProvider(String),

    #[error("Empty model name in saved config")]
    EmptyModel,
}

pub fn encode(config: &AgentConfig) -> String {
    format!("{}{SEPARATOR}{}", config.provider.id(), config.model)
}

pub fn decode(raw: &str) -> Result<AgentConfig, RecordError> {
    let (provider, model) = raw
        .split_once(SEPARATOR)
        .ok_or_else(|| RecordError::Malformed(raw.to_string()))?;
    // Records always hold the exact identifier that encode wrote.
    let provider = Provider::from_id(provider)
        .ok_or_else(|| RecordError::UnknownProvider(provider.to_string()))?;
    if model.trim().is_empty() {
        return Err(RecordError::EmptyModel);
    }
    Ok(AgentConfig::new(provider, model))
}
