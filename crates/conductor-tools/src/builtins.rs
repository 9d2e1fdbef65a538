//! Built-in tools available to every runtime.

use crate::registry::ToolRegistry;
use crate::tool::{Tool, ToolContext, ToolDescriptor, ToolOutput};
use async_trait::async_trait;
use conductor_core::{ConductorResult, Permission};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Maximum file size `fs.read` will return (1 MB).
const MAX_READ_BYTES: u64 = 1024 * 1024;

/// Registers `user.ask`, `terminal.run` and `fs.read`.
pub fn register_builtins(registry: &mut ToolRegistry) {
    registry.register(Arc::new(AskUserTool::new()));
    registry.register(Arc::new(TerminalTool::new()));
    registry.register(Arc::new(FileReadTool::new()));
}

fn required_str<'a>(args: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    args.get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Puts a question to the human operator; the task waits for the answer.
pub struct AskUserTool {
    descriptor: ToolDescriptor,
}

impl AskUserTool {
    /// Creates the tool with its registered descriptor.
    pub fn new() -> Self {
        Self {
            descriptor: ToolDescriptor::new(
                "user.ask",
                "Ask the human operator a question and wait for the answer.",
            )
            .with_schema(serde_json::json!({
                "type": "object",
                "properties": {
                    "question": {
                        "type": "string",
                        "description": "The question to ask"
                    }
                },
                "required": ["question"]
            })),
        }
    }
}

impl Default for AskUserTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for AskUserTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        ctx: &ToolContext,
    ) -> ConductorResult<ToolOutput> {
        match required_str(&args, "question") {
            Some(question) => {
                info!(task_id = %ctx.task_id, agent = %ctx.agent, "Asking user for input");
                Ok(ToolOutput::awaiting_input(question))
            }
            None => Ok(ToolOutput::error("Missing 'question' argument")),
        }
    }
}

/// Runs a command through the task's sandboxed command runner.
pub struct TerminalTool {
    descriptor: ToolDescriptor,
}

impl TerminalTool {
    /// Creates the tool with its registered descriptor.
    pub fn new() -> Self {
        Self {
            descriptor: ToolDescriptor::new(
                "terminal.run",
                "Run a shell command in the project root. Only allow-listed commands can be run.",
            )
            .with_schema(serde_json::json!({
                "type": "object",
                "properties": {
                    "command": {
                        "type": "string",
                        "description": "The shell command to execute"
                    }
                },
                "required": ["command"]
            }))
            .requires(Permission::Terminal),
        }
    }
}

impl Default for TerminalTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for TerminalTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        ctx: &ToolContext,
    ) -> ConductorResult<ToolOutput> {
        let Some(command) = required_str(&args, "command") else {
            return Ok(ToolOutput::error("Empty command"));
        };
        let output = ctx.run_command(command).await?;
        let response = serde_json::to_value(&output)?;
        if output.success() {
            Ok(ToolOutput::success(response))
        } else {
            Ok(ToolOutput {
                result: response,
                is_error: true,
                awaiting_input: None,
            })
        }
    }
}

/// Reads a UTF-8 file below the project root.
pub struct FileReadTool {
    descriptor: ToolDescriptor,
}

impl FileReadTool {
    /// Creates the tool with its registered descriptor.
    pub fn new() -> Self {
        Self {
            descriptor: ToolDescriptor::new(
                "fs.read",
                "Read a text file, relative to the project root.",
            )
            .with_schema(serde_json::json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "Path relative to the project root"
                    }
                },
                "required": ["path"]
            }))
            .requires(Permission::FileSystem),
        }
    }

    async fn resolve(&self, ctx: &ToolContext, path: &str) -> Result<PathBuf, String> {
        let root = tokio::fs::canonicalize(&ctx.project_root)
            .await
            .map_err(|e| format!("Invalid project root: {e}"))?;
        let resolved = tokio::fs::canonicalize(root.join(path))
            .await
            .map_err(|e| format!("Cannot resolve path '{path}': {e}"))?;
        if !resolved.starts_with(&root) {
            warn!(path = %path, task_id = %ctx.task_id, "Path escapes project root");
            return Err(format!("Path '{path}' is outside the project root"));
        }
        Ok(resolved)
    }
}

impl Default for FileReadTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for FileReadTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        ctx: &ToolContext,
    ) -> ConductorResult<ToolOutput> {
        let Some(path) = required_str(&args, "path") else {
            return Ok(ToolOutput::error("Missing 'path' argument"));
        };
        let resolved = match self.resolve(ctx, path).await {
            Ok(p) => p,
            Err(message) => return Ok(ToolOutput::error(message)),
        };

        let metadata = tokio::fs::metadata(&resolved).await?;
        if !metadata.is_file() {
            return Ok(ToolOutput::error(format!("'{path}' is not a file")));
        }
        if metadata.len() > MAX_READ_BYTES {
            return Ok(ToolOutput::error(format!(
                "File too large: {} bytes (max {MAX_READ_BYTES})",
                metadata.len()
            )));
        }

        info!(path = %resolved.display(), task_id = %ctx.task_id, "Reading file");
        match tokio::fs::read_to_string(&resolved).await {
            Ok(content) => Ok(ToolOutput::success(content)),
            Err(e) => Ok(ToolOutput::error(format!("Failed to read '{path}': {e}"))),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::sandbox::{DeniedCommandRunner, SandboxConfig, SandboxedCommandRunner};
    use crate::CommandRunner;
    use uuid::Uuid;

    fn ctx_with(root: PathBuf, runner: Arc<dyn CommandRunner>) -> ToolContext {
        ToolContext::new(Uuid::new_v4(), "DeveloperAgent", root, runner)
    }

    #[test]
    fn test_register_builtins() {
        let mut registry = ToolRegistry::new();
        register_builtins(&mut registry);
        let names: Vec<_> = registry.descriptors().iter().map(|d| d.name.clone()).collect();
        assert_eq!(names, vec!["user.ask", "terminal.run", "fs.read"]);
    }

    #[tokio::test]
    async fn test_ask_user_requires_question() {
        let ctx = ctx_with(PathBuf::from("."), Arc::new(DeniedCommandRunner));
        let tool = AskUserTool::new();
        let out = tool.execute(serde_json::json!({}), &ctx).await.unwrap();
        assert!(out.is_error);
        let out = tool
            .execute(serde_json::json!({"question": "Which port?"}), &ctx)
            .await
            .unwrap();
        assert_eq!(out.awaiting_input.as_deref(), Some("Which port?"));
    }

    #[tokio::test]
    async fn test_terminal_reports_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(SandboxedCommandRunner::new(SandboxConfig::allowing([
            "echo", "false",
        ])));
        let ctx = ctx_with(dir.path().to_path_buf(), runner);
        let tool = TerminalTool::new();

        let ok = tool
            .execute(serde_json::json!({"command": "echo hi"}), &ctx)
            .await
            .unwrap();
        assert!(!ok.is_error);
        assert_eq!(ok.result["exit_code"], 0);

        let failed = tool
            .execute(serde_json::json!({"command": "false"}), &ctx)
            .await
            .unwrap();
        assert!(failed.is_error);
    }

    #[tokio::test]
    async fn test_file_read_within_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "hello").unwrap();
        let ctx = ctx_with(dir.path().to_path_buf(), Arc::new(DeniedCommandRunner));
        let out = FileReadTool::new()
            .execute(serde_json::json!({"path": "notes.txt"}), &ctx)
            .await
            .unwrap();
        assert_eq!(out.text(), "hello");
    }

    #[tokio::test]
    async fn test_file_read_rejects_escape() {
        let outer = tempfile::tempdir().unwrap();
        let root = outer.path().join("project");
        std::fs::create_dir(&root).unwrap();
        std::fs::write(outer.path().join("secret.txt"), "nope").unwrap();
        let ctx = ctx_with(root, Arc::new(DeniedCommandRunner));
        let out = FileReadTool::new()
            .execute(serde_json::json!({"path": "../secret.txt"}), &ctx)
            .await
            .unwrap();
        assert!(out.is_error);
        assert!(out.text().contains("outside the project root"));
    }
}
