use conductor_core::{AgentDefinition, AgentDirectory, ConductorError, ConductorResult};
use std::sync::Arc;

/// Validates a delegation before a child task is spawned.
///
/// A delegation is refused when the delegator may not address the target,
/// the target is unknown, the chain would exceed the maximum depth, or the
/// target already appears in the delegator's ancestry (itself included).
#[derive(Debug, Clone, Copy)]
pub struct DelegationGuard {
    max_depth: u32,
}

impl DelegationGuard {
    /// Guard with the default maximum depth of 3.
    pub fn new() -> Self {
        Self { max_depth: 3 }
    }

    /// Overrides the maximum depth.
    pub fn with_max_depth(mut self, depth: u32) -> Self {
        self.max_depth = depth;
        self
    }

    /// Deepest allowed child level.
    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    /// `lineage` lists agent names from the root task down to the delegator.
    /// Returns the target definition when the delegation is allowed.
    pub fn check(
        &self,
        delegator: &AgentDefinition,
        depth: u32,
        lineage: &[String],
        target: &str,
        directory: &dyn AgentDirectory,
    ) -> ConductorResult<Arc<AgentDefinition>> {
        if !delegator.allows_delegate(target) {
            return Err(ConductorError::Delegation(format!(
                "{} may not delegate to {target}",
                delegator.name
            )));
        }
        let definition = directory.get(target).ok_or_else(|| {
            ConductorError::Delegation(format!("unknown agent '{target}'"))
        })?;
        if depth + 1 > self.max_depth {
            return Err(ConductorError::Delegation(format!(
                "maximum delegation depth {} exceeded (delegator depth is {depth})",
                self.max_depth
            )));
        }
        if lineage.iter().any(|a| a == target) || delegator.name == target {
            return Err(ConductorError::Delegation(format!(
                "delegation cycle: {} -> {target}",
                lineage.join(" -> ")
            )));
        }
        Ok(definition)
    }
}

impl Default for DelegationGuard {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use conductor_core::AgentRegistry;

    fn directory() -> AgentRegistry {
        AgentRegistry::new()
            .with_agent(AgentDefinition::new("SupervisorAgent"))
            .with_agent(AgentDefinition::new("DeveloperAgent"))
            .with_agent(AgentDefinition::new("TesterAgent"))
    }

    fn lineage(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_allowed_delegation() {
        let dir = directory();
        let supervisor = AgentDefinition::new("SupervisorAgent");
        let target = DelegationGuard::new()
            .check(&supervisor, 0, &lineage(&["SupervisorAgent"]), "TesterAgent", &dir)
            .unwrap();
        assert_eq!(target.name, "TesterAgent");
    }

    #[test]
    fn test_self_and_ancestor_cycles() {
        let dir = directory();
        let guard = DelegationGuard::new();
        let dev = AgentDefinition::new("DeveloperAgent");
        let chain = lineage(&["SupervisorAgent", "DeveloperAgent"]);
        assert!(guard.check(&dev, 1, &chain, "DeveloperAgent", &dir).is_err());
        let err = guard
            .check(&dev, 1, &chain, "SupervisorAgent", &dir)
            .unwrap_err();
        assert!(err.to_string().contains("cycle"));
        assert!(guard.check(&dev, 1, &chain, "TesterAgent", &dir).is_ok());
    }

    #[test]
    fn test_depth_limit() {
        let dir = directory();
        let guard = DelegationGuard::new().with_max_depth(1);
        let dev = AgentDefinition::new("DeveloperAgent");
        let err = guard
            .check(&dev, 1, &lineage(&["SupervisorAgent", "DeveloperAgent"]), "TesterAgent", &dir)
            .unwrap_err();
        assert!(err.to_string().contains("maximum delegation depth 1"));
    }

    #[test]
    fn test_unknown_and_disallowed_targets() {
        let dir = directory();
        let guard = DelegationGuard::new();
        let mut dev = AgentDefinition::new("DeveloperAgent");
        assert!(guard
            .check(&dev, 0, &lineage(&["DeveloperAgent"]), "GhostAgent", &dir)
            .is_err());
        dev.delegates_to = vec!["SupervisorAgent".into()];
        let err = guard
            .check(&dev, 0, &lineage(&["DeveloperAgent"]), "TesterAgent", &dir)
            .unwrap_err();
        assert!(err.to_string().contains("may not delegate"));
    }
}
