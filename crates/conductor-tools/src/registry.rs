use crate::tool::{Tool, ToolContext, ToolDescriptor, ToolOutput};
use conductor_core::{ConductorError, ConductorResult, Permission, PermissionSet};
use futures_util::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{info, warn};

/// Central registry of invocable tools.
///
/// Read-mostly after startup: tools are registered while building the
/// runtime and the registry is then shared behind an `Arc`.
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            tools: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Registers a tool. A duplicate name is rejected and the first
    /// registration kept; returns whether the tool was added.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> bool {
        let name = tool.descriptor().name.clone();
        if self.index.contains_key(&name) {
            warn!(tool = %name, "Duplicate tool registration ignored");
            return false;
        }
        info!(tool = %name, "Registered tool");
        self.index.insert(name, self.tools.len());
        self.tools.push(tool);
        true
    }

    /// Looks a tool up by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.index.get(name).and_then(|i| self.tools.get(*i))
    }

    /// All tools in registration order.
    pub fn tools(&self) -> &[Arc<dyn Tool>] {
        &self.tools
    }

    /// Descriptors in registration order.
    pub fn descriptors(&self) -> Vec<&ToolDescriptor> {
        self.tools.iter().map(|t| t.descriptor()).collect()
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether no tool is registered.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Permissions `tool` requires that `permissions` does not grant.
    pub fn missing_permissions(tool: &dyn Tool, permissions: &PermissionSet) -> Vec<Permission> {
        permissions.missing(&tool.descriptor().required_permissions)
    }

    /// Executes `tool`, turning both returned errors and panics into an
    /// error output.
    pub async fn execute_guarded(
        tool: &Arc<dyn Tool>,
        args: serde_json::Value,
        ctx: &ToolContext,
    ) -> ToolOutput {
        let name = &tool.descriptor().name;
        match AssertUnwindSafe(tool.execute(args, ctx)).catch_unwind().await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                warn!(tool = %name, task_id = %ctx.task_id, error = %e, "Tool execution failed");
                ToolOutput::error(e.to_string())
            }
            Err(panic) => {
                let detail = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                warn!(tool = %name, task_id = %ctx.task_id, panic = %detail, "Tool panicked");
                ToolOutput::error(format!("Tool '{name}' panicked: {detail}"))
            }
        }
    }

    /// Looks up `name` and executes it; fails only when the tool is absent.
    pub async fn invoke(
        &self,
        name: &str,
        args: serde_json::Value,
        ctx: &ToolContext,
    ) -> ConductorResult<ToolOutput> {
        let tool = self
            .get(name)
            .ok_or_else(|| ConductorError::ToolUnavailable(name.to_string()))?;
        Ok(Self::execute_guarded(tool, args, ctx).await)
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::sandbox::DeniedCommandRunner;
    use async_trait::async_trait;
    use std::path::PathBuf;
    use uuid::Uuid;

    struct Named {
        descriptor: ToolDescriptor,
        reply: &'static str,
    }

    impl Named {
        fn new(name: &str, reply: &'static str) -> Arc<dyn Tool> {
            Arc::new(Self {
                descriptor: ToolDescriptor::new(name, "test tool"),
                reply,
            })
        }
    }

    #[async_trait]
    impl Tool for Named {
        fn descriptor(&self) -> &ToolDescriptor {
            &self.descriptor
        }

        async fn execute(
            &self,
            _args: serde_json::Value,
            _ctx: &ToolContext,
        ) -> ConductorResult<ToolOutput> {
            Ok(ToolOutput::success(self.reply))
        }
    }

    fn ctx() -> ToolContext {
        ToolContext::new(
            Uuid::new_v4(),
            "tester",
            PathBuf::from("."),
            Arc::new(DeniedCommandRunner),
        )
    }

    #[test]
    fn test_first_registration_wins() {
        let mut registry = ToolRegistry::new();
        assert!(registry.register(Named::new("echo", "first")));
        assert!(!registry.register(Named::new("echo", "second")));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_registration_order_preserved() {
        let mut registry = ToolRegistry::new();
        for name in ["c", "a", "b"] {
            registry.register(Named::new(name, ""));
        }
        let names: Vec<_> = registry.descriptors().iter().map(|d| d.name.clone()).collect();
        assert_eq!(names, vec!["c", "a", "b"]);
    }

    #[tokio::test]
    async fn test_invoke_keeps_first_tool() {
        let mut registry = ToolRegistry::new();
        registry.register(Named::new("echo", "first"));
        registry.register(Named::new("echo", "second"));
        let out = registry.invoke("echo", serde_json::json!({}), &ctx()).await.unwrap();
        assert_eq!(out.text(), "first");
    }

    #[tokio::test]
    async fn test_invoke_unknown_tool() {
        let registry = ToolRegistry::new();
        let err = registry
            .invoke("missing", serde_json::json!({}), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, ConductorError::ToolUnavailable(name) if name == "missing"));
    }
}
