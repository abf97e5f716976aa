//! Config Editor Flow: pick an agent, a provider and a model.

use super::terminal::{BOLD, DIM, Line, LineInput, RESET, YELLOW};
use crate::agent::{AgentConfig, AgentId, AgentRegistry};
use crate::error::{Error, Result};
use crate::provider::{ModelCatalog, Provider};
use std::io::Write;

pub const USAGE: &str = "Usage: /config <agent> <provider> [model]";

fn unknown_agent(name: &str) -> Error {
    let available: Vec<_> = AgentId::sorted().iter().map(|a| a.name()).collect();
    Error::InvalidSelection(format!(
        "Unknown agent: {name}. Available: {}",
        available.join(", ")
    ))
}

pub(crate) fn invalid_provider(name: &str) -> Error {
    Error::InvalidSelection(format!(
        "Invalid provider: {name}. Use OLLAMA, GEMINI, or BEDROCK."
    ))
}

/// `/config <agent> <provider> [model]`.
///
/// Without a model, a provider change takes the new provider's default and
/// an unchanged provider keeps the current model.
pub fn resolve_positional(
    registry: &AgentRegistry,
    args: &[String],
) -> Result<(AgentId, AgentConfig)> {
    let (agent, provider, model) = match args {
        [agent, provider] => (agent, provider, None),
        [agent, provider, model] => (agent, provider, Some(model)),
        _ => return Err(Error::InvalidSelection(USAGE.into())),
    };

    let agent: AgentId = agent.parse().map_err(|_| unknown_agent(agent))?;
    let provider: Provider = provider.parse().map_err(|_| invalid_provider(provider))?;
    let current = registry.get(agent);

    let model = match model {
        Some(model) => model.clone(),
        None if provider != current.provider => provider.default_model().to_string(),
        None => current.model.clone(),
    };
    Ok((agent, AgentConfig::new(provider, model)))
}

fn read(input: &mut dyn LineInput, prompt: &str) -> Result<Option<String>> {
    Ok(match input.read_line(prompt)? {
        Line::Text(text) => Some(text.trim().to_string()).filter(|t| !t.is_empty()),
        Line::Interrupted | Line::Eof => None,
    })
}

/// Accept a 1-based menu index or, via `by_name`, a name.
fn pick<T: Copy>(
    choice: &str,
    items: &[T],
    by_name: impl Fn(&str) -> Option<T>,
    unknown: impl FnOnce(&str) -> Error,
) -> Result<T> {
    if let Ok(index) = choice.parse::<usize>() {
        return index
            .checked_sub(1)
            .and_then(|i| items.get(i))
            .copied()
            .ok_or_else(|| {
                Error::InvalidSelection(format!(
                    "Invalid selection: {index}. Choose 1-{}.",
                    items.len()
                ))
            });
    }
    by_name(choice).ok_or_else(|| unknown(choice))
}

/// Run the interactive editor. `Ok(None)` means the user backed out.
pub async fn interactive(
    input: &mut dyn LineInput,
    out: &mut dyn Write,
    registry: &AgentRegistry,
    catalog: &dyn ModelCatalog,
) -> Result<Option<(AgentId, AgentConfig)>> {
    let agents = AgentId::sorted();
    writeln!(out, "{BOLD}Agents:{RESET}")?;
    for (i, agent) in agents.iter().enumerate() {
        writeln!(out, "  [{}] {:<16} {}", i + 1, agent.name(), registry.get(*agent))?;
    }
    let Some(choice) = read(input, "Select agent: ")? else {
        return Ok(None);
    };
    let agent = pick(&choice, &agents, |name| name.parse().ok(), unknown_agent)?;

    writeln!(out, "{BOLD}Providers:{RESET}")?;
    for (i, provider) in Provider::ALL.iter().enumerate() {
        writeln!(out, "  [{}] {}", i + 1, provider.id())?;
    }
    let Some(choice) = read(input, "Select provider: ")? else {
        return Ok(None);
    };
    let provider = pick(&choice, Provider::ALL, |name| name.parse().ok(), invalid_provider)?;

    let Some(model) = choose_model(input, out, provider, catalog).await? else {
        writeln!(out, "Model selection cancelled.")?;
        return Ok(None);
    };
    Ok(Some((agent, AgentConfig::new(provider, model))))
}

async fn choose_model(
    input: &mut dyn LineInput,
    out: &mut dyn Write,
    provider: Provider,
    catalog: &dyn ModelCatalog,
) -> Result<Option<String>> {
    let models = match catalog.models(provider).await {
        Ok(models) if !models.is_empty() => models,
        Ok(_) => {
            writeln!(out, "{DIM}No models found for {provider}.{RESET}")?;
            return read(input, "Model name: ");
        }
        Err(e) => {
            writeln!(out, "{YELLOW}Could not list {provider} models:{RESET} {e}")?;
            return read(input, "Model name: ");
        }
    };

    writeln!(out, "{BOLD}Models:{RESET}")?;
    for (i, model) in models.iter().enumerate() {
        let marker = if model == provider.default_model() { " (default)" } else { "" };
        writeln!(out, "  [{}] {model}{marker}", i + 1)?;
    }
    writeln!(out, "  [M] Enter model name manually")?;

    let Some(choice) = read(input, "Select model: ")? else {
        return Ok(None);
    };
    if choice.eq_ignore_ascii_case("m") {
        return read(input, "Model name: ");
    }
    let index = choice
        .parse::<usize>()
        .ok()
        .and_then(|n| n.checked_sub(1))
        .filter(|i| *i < models.len())
        .ok_or_else(|| {
            Error::InvalidSelection(format!(
                "Invalid selection: {choice}. Choose 1-{} or M.",
                models.len()
            ))
        })?;
    Ok(models.into_iter().nth(index))
}
