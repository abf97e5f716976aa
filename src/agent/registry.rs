//! Agent Configuration Registry: agent name to (provider, model).

use super::{AgentConfig, AgentId};
use crate::store::{ConfigStore, StoreError};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Immutable view of every agent's config, taken when a backend is built.
pub type RegistrySnapshot = Arc<BTreeMap<AgentId, AgentConfig>>;

/// Outcome of applying stored overrides.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LoadReport {
    pub applied: usize,
    pub skipped: usize,
}

/// A committed edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigChange {
    pub agent: AgentId,
    pub previous: AgentConfig,
    pub current: AgentConfig,
    /// The active backend must be rebuilt for this edit to take effect.
    pub rebuild_required: bool,
}

#[derive(Debug, Clone)]
pub struct AgentRegistry {
    configs: BTreeMap<AgentId, AgentConfig>,
    default: AgentConfig,
}

impl AgentRegistry {
    /// Every roster agent bound to `default`.
    pub fn defaults(default: &AgentConfig) -> Self {
        Self {
            configs: AgentId::ALL
                .iter()
                .map(|agent| (*agent, default.clone()))
                .collect(),
            default: default.clone(),
        }
    }

    /// Apply each valid stored record on top of the current map.
    ///
    /// Records for names off the roster and records that fail to decode are
    /// skipped with a warning; the store is not corrected.
    pub fn load_overrides(&mut self, store: &ConfigStore) -> Result<LoadReport, StoreError> {
        let mut report = LoadReport::default();

        for stored in store.agent_configs()? {
            let agent = match stored.agent.parse::<AgentId>() {
                Ok(agent) => agent,
                Err(e) => {
                    tracing::warn!("Skipping saved config: {e}");
                    report.skipped += 1;
                    continue;
                }
            };

            match stored.config {
                Ok(config) => {
                    tracing::debug!(agent = %agent, config = %config, "Applied saved config");
                    self.configs.insert(agent, config);
                    report.applied += 1;
                }
                Err(e) => {
                    tracing::warn!(agent = %agent, "{e}; keeping {}", self.get(agent));
                    report.skipped += 1;
                }
            }
        }

        Ok(report)
    }

    pub fn get(&self, agent: AgentId) -> &AgentConfig {
        self.configs.get(&agent).unwrap_or(&self.default)
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        Arc::new(self.configs.clone())
    }

    /// Snapshot as it would be after `agent` is bound to `config`.
    pub fn with_override(&self, agent: AgentId, config: &AgentConfig) -> RegistrySnapshot {
        let mut configs = self.configs.clone();
        configs.insert(agent, config.clone());
        Arc::new(configs)
    }

    /// Persist `config` for `agent`, then update the in-memory map.
    ///
    /// A store failure leaves the map untouched.
    pub fn set(
        &mut self,
        store: &ConfigStore,
        agent: AgentId,
        config: AgentConfig,
    ) -> Result<ConfigChange, StoreError> {
        store.save_agent_config(agent, &config)?;

        let previous = self.configs.insert(agent, config.clone());
        Ok(ConfigChange {
            agent,
            previous: previous.unwrap_or_else(|| self.default.clone()),
            current: config,
            rebuild_required: agent.is_coordinator(),
        })
    }

    /// Agents and configs, sorted by agent name.
    pub fn entries(&self) -> Vec<(AgentId, &AgentConfig)> {
        AgentId::sorted()
            .into_iter()
            .map(|agent| (agent, self.get(agent)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Provider;
    use crate::store::Namespace;
    use tempfile::tempdir;

    fn ollama_default() -> AgentConfig {
        AgentConfig::provider_default(Provider::Ollama)
    }

    #[test]
    fn test_defaults_cover_roster() {
        let registry = AgentRegistry::defaults(&ollama_default());
        assert_eq!(registry.snapshot().len(), AgentId::ALL.len());
        assert_eq!(registry.get(AgentId::Tester), &ollama_default());
    }

    #[test]
    fn test_set_round_trips_through_fresh_registry() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("central_memory.db"));
        let config = AgentConfig::new(Provider::Gemini, "gemini-2.5-pro");

        let mut registry = AgentRegistry::defaults(&ollama_default());
        let change = registry.set(&store, AgentId::Coder, config.clone()).unwrap();
        assert!(!change.rebuild_required);
        assert_eq!(change.previous, ollama_default());

        let mut fresh = AgentRegistry::defaults(&ollama_default());
        let report = fresh.load_overrides(&store).unwrap();
        assert_eq!(report.applied, 1);
        assert_eq!(fresh.get(AgentId::Coder), &config);
        assert_eq!(fresh.get(AgentId::Tester), &ollama_default());
    }

    #[test]
    fn test_unknown_provider_keeps_prior_value() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("central_memory.db"));
        store.put(Namespace::AgentConfigs, "Coder", "OPENAI|gpt-4o").unwrap();
        store.put(Namespace::AgentConfigs, "Janitor", "OLLAMA|m").unwrap();
        store.put(Namespace::AgentConfigs, "Tester", "GEMINI|gemini-2.5-pro").unwrap();

        let mut registry = AgentRegistry::defaults(&ollama_default());
        let report = registry.load_overrides(&store).unwrap();

        assert_eq!(report, LoadReport { applied: 1, skipped: 2 });
        assert_eq!(registry.get(AgentId::Coder), &ollama_default());
        assert_eq!(registry.get(AgentId::Tester).provider, Provider::Gemini);
        assert_eq!(
            store.get(Namespace::AgentConfigs, "Coder").unwrap().as_deref(),
            Some("OPENAI|gpt-4o")
        );
    }

    #[test]
    fn test_coordinator_edit_requires_rebuild() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("central_memory.db"));
        let mut registry = AgentRegistry::defaults(&ollama_default());

        let change = registry
            .set(&store, AgentId::Coordinator, AgentConfig::provider_default(Provider::Gemini))
            .unwrap();
        assert!(change.rebuild_required);
    }

    #[test]
    fn test_store_failure_leaves_map_unchanged() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "x").unwrap();
        let store = ConfigStore::new(blocker.join("central_memory.db"));

        let mut registry = AgentRegistry::defaults(&ollama_default());
        let result = registry.set(&store, AgentId::Coder, AgentConfig::new(Provider::Gemini, "g"));
        assert!(result.is_err());
        assert_eq!(registry.get(AgentId::Coder), &ollama_default());
    }

    #[test]
    fn test_with_override_does_not_mutate() {
        let registry = AgentRegistry::defaults(&ollama_default());
        let candidate = AgentConfig::new(Provider::Gemini, "gemini-2.5-pro");
        let snapshot = registry.with_override(AgentId::Coordinator, &candidate);

        assert_eq!(snapshot[&AgentId::Coordinator], candidate);
        assert_eq!(registry.get(AgentId::Coordinator), &ollama_default());
    }

    #[test]
    fn test_entries_sorted_by_name() {
        let registry = AgentRegistry::defaults(&ollama_default());
        let names: Vec<_> = registry.entries().iter().map(|(a, _)| a.name()).collect();
        let mut sorted = names.clone();
        sorted.sort_unstable();
        assert_eq!(names, sorted);
    }
}
