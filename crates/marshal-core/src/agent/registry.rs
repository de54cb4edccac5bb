//! Process-wide agent registry.
//!
//! Maps agent names to static registrations, validated when registered and
//! looked up dynamically at call time. Lookups fail closed: an unknown name
//! is an explicit error result at the delegation site, never a panic.
//!
//! Prompt overrides are the only mutable part. They are administrative and
//! infrequent, so last-writer-wins under concurrent reads is acceptable.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;

use super::context::DelegationContext;
use crate::ai::types::ToolDef;

/// Pre-execution check run before a delegated call. Returning `Err` blocks
/// the delegation with the given reason; it is reported as a policy
/// rejection, not a crash.
#[async_trait]
pub trait DelegationGuard: Send + Sync {
    async fn allow(&self, target: &str, query: &str, ctx: &DelegationContext)
        -> Result<(), String>;
}

/// Static descriptor of a callable specialist.
#[derive(Clone)]
pub struct AgentRegistration {
    pub name: String,
    pub instructions: String,
    pub tools: Vec<ToolDef>,
    /// Orchestrators are never delegation targets.
    pub is_orchestrator: bool,
    pub guard: Option<Arc<dyn DelegationGuard>>,
    pub disable_memory_tool: bool,
}

impl AgentRegistration {
    pub fn new(name: impl Into<String>, instructions: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instructions: instructions.into(),
            tools: Vec::new(),
            is_orchestrator: false,
            guard: None,
            disable_memory_tool: false,
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolDef>) -> Self {
        self.tools = tools;
        self
    }

    pub fn orchestrator(mut self) -> Self {
        self.is_orchestrator = true;
        self
    }

    pub fn with_guard(mut self, guard: Arc<dyn DelegationGuard>) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn without_memory_tool(mut self) -> Self {
        self.disable_memory_tool = true;
        self
    }
}

/// Name-keyed registry of agents, shared read-only across requests.
#[derive(Default)]
pub struct AgentRegistry {
    agents: DashMap<String, Arc<AgentRegistration>>,
    overrides: RwLock<HashMap<String, String>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, registration: AgentRegistration) -> Result<()> {
        if registration.name.trim().is_empty() {
            bail!("agent name must not be empty");
        }
        if self.agents.contains_key(&registration.name) {
            bail!("agent '{}' is already registered", registration.name);
        }
        self.agents
            .insert(registration.name.clone(), Arc::new(registration));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<AgentRegistration>> {
        self.agents.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// All registrations, sorted by name for stable listings.
    pub fn list(&self) -> Vec<Arc<AgentRegistration>> {
        let mut agents: Vec<_> = self
            .agents
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        agents.sort_by(|a, b| a.name.cmp(&b.name));
        agents
    }

    /// Base instructions with any admin override applied.
    pub fn effective_instructions(&self, name: &str) -> Option<String> {
        let registration = self.get(name)?;
        let overrides = self.overrides.read();
        Some(
            overrides
                .get(name)
                .cloned()
                .unwrap_or_else(|| registration.instructions.clone()),
        )
    }

    /// Returns false if the agent is unknown.
    pub fn set_override(&self, name: &str, instructions: impl Into<String>) -> bool {
        if !self.agents.contains_key(name) {
            return false;
        }
        self.overrides
            .write()
            .insert(name.to_string(), instructions.into());
        true
    }

    pub fn reset_override(&self, name: &str) -> bool {
        self.overrides.write().remove(name).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tool() -> ToolDef {
        ToolDef::new("search", "Search the web", serde_json::json!({"type": "object"}))
    }

    #[test]
    fn register_and_lookup() {
        let registry = AgentRegistry::new();
        registry
            .register(AgentRegistration::new("research", "You research.").with_tools(vec![sample_tool()]))
            .unwrap();

        let agent = registry.get("research").unwrap();
        assert_eq!(agent.tools.len(), 1);
        assert!(registry.get("nope").is_none());
    }

    #[test]
    fn duplicate_and_empty_names_rejected() {
        let registry = AgentRegistry::new();
        registry
            .register(AgentRegistration::new("research", "a"))
            .unwrap();
        assert!(registry
            .register(AgentRegistration::new("research", "b"))
            .is_err());
        assert!(registry.register(AgentRegistration::new("  ", "c")).is_err());
    }

    #[test]
    fn override_set_and_reset() {
        let registry = AgentRegistry::new();
        registry
            .register(AgentRegistration::new("research", "base instructions"))
            .unwrap();

        assert_eq!(
            registry.effective_instructions("research").unwrap(),
            "base instructions"
        );
        assert!(registry.set_override("research", "patched instructions"));
        assert_eq!(
            registry.effective_instructions("research").unwrap(),
            "patched instructions"
        );
        assert!(registry.reset_override("research"));
        assert_eq!(
            registry.effective_instructions("research").unwrap(),
            "base instructions"
        );
        assert!(!registry.set_override("missing", "x"));
    }

    #[test]
    fn list_is_sorted() {
        let registry = AgentRegistry::new();
        registry.register(AgentRegistration::new("zeta", "z")).unwrap();
        registry.register(AgentRegistration::new("alpha", "a")).unwrap();
        let names: Vec<_> = registry.list().iter().map(|a| a.name.clone()).collect();
        assert_eq!(names, ["alpha", "zeta"]);
    }
}
