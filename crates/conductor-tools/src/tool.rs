use crate::sandbox::{CommandOutput, CommandRunner};
use async_trait::async_trait;
use conductor_core::{ConductorResult, Permission};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

/// Metadata describing a tool's interface and required permissions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    /// Unique registry key.
    pub name: String,
    /// Shown to the model in the tool catalog.
    pub description: String,
    /// Advisory JSON schema of the arguments.
    pub input_schema: serde_json::Value,
    /// Permissions the calling agent must hold.
    #[serde(default)]
    pub required_permissions: Vec<Permission>,
}

impl ToolDescriptor {
    /// A descriptor with an empty object schema and no permissions.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: serde_json::json!({"type": "object", "properties": {}}),
            required_permissions: Vec::new(),
        }
    }

    /// Sets the input schema.
    pub fn with_schema(mut self, schema: serde_json::Value) -> Self {
        self.input_schema = schema;
        self
    }

    /// Adds a required permission.
    pub fn requires(mut self, permission: Permission) -> Self {
        self.required_permissions.push(permission);
        self
    }
}

/// The structured result of a tool execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolOutput {
    /// Result payload, or the error payload when `is_error` is set.
    pub result: serde_json::Value,
    /// Whether the tool failed.
    #[serde(default)]
    pub is_error: bool,
    /// Question to put to a human; the task waits for an answer when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub awaiting_input: Option<String>,
}

impl ToolOutput {
    /// Successful output.
    pub fn success(result: impl Into<serde_json::Value>) -> Self {
        Self {
            result: result.into(),
            is_error: false,
            awaiting_input: None,
        }
    }

    /// Failed output.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            result: serde_json::Value::String(message.into()),
            is_error: true,
            awaiting_input: None,
        }
    }

    /// Output that parks the task until a human answers `question`.
    pub fn awaiting_input(question: impl Into<String>) -> Self {
        let question = question.into();
        Self {
            result: serde_json::Value::String(question.clone()),
            is_error: false,
            awaiting_input: Some(question),
        }
    }

    /// The payload as prompt text: strings verbatim, other values as JSON.
    pub fn text(&self) -> String {
        match &self.result {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// What a tool may touch while executing on behalf of a task.
#[derive(Clone)]
pub struct ToolContext {
    /// The calling task.
    pub task_id: Uuid,
    /// The calling agent.
    pub agent: String,
    /// Root directory the task operates in.
    pub project_root: PathBuf,
    commands: Arc<dyn CommandRunner>,
}

impl ToolContext {
    /// Creates a context exposing `commands` as the only process capability.
    pub fn new(
        task_id: Uuid,
        agent: impl Into<String>,
        project_root: PathBuf,
        commands: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            task_id,
            agent: agent.into(),
            project_root,
            commands,
        }
    }

    /// Runs `command` through the scoped runner, inside the project root.
    pub async fn run_command(&self, command: &str) -> ConductorResult<CommandOutput> {
        self.commands.run(command, &self.project_root).await
    }
}

/// An invocable capability.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Name, description and schema.
    fn descriptor(&self) -> &ToolDescriptor;

    /// Runs the tool. Errors are converted into error outputs by the registry.
    async fn execute(
        &self,
        args: serde_json::Value,
        ctx: &ToolContext,
    ) -> ConductorResult<ToolOutput>;
}
