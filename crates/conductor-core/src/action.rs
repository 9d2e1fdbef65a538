use serde::{Deserialize, Serialize};

/// The structured interpretation of one model reply.
///
/// Exactly one of tool call, delegation or final result; the free-text
/// `thought` travels alongside in [`ParsedAction`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    /// Invoke a registered tool with verbatim arguments.
    ToolCall {
        /// Registry key of the tool.
        tool: String,
        /// Arguments forwarded to the tool unchanged.
        #[serde(default)]
        args: serde_json::Value,
    },
    /// Spawn a child task on another agent and wait for it.
    Delegate {
        /// Name of the agent that runs the child task.
        agent: String,
        /// Request payload handed to the child.
        request: serde_json::Value,
    },
    /// Finish the task with this payload.
    FinalResult {
        /// The task output.
        result: serde_json::Value,
    },
}

impl Action {
    /// Short label used in logs and activity messages.
    pub fn label(&self) -> &'static str {
        match self {
            Action::ToolCall { .. } => "tool",
            Action::Delegate { .. } => "delegate",
            Action::FinalResult { .. } => "result",
        }
    }
}

/// An [`Action`] together with the optional reasoning the model attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedAction {
    /// The action to dispatch.
    pub action: Action,
    /// Free-text annotation, surfaced as a `thought` activity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought: Option<String>,
}
