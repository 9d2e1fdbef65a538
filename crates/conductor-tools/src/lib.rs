//! Tool dispatch for the Conductor orchestration engine.
//!
//! Tools are registered once into a [`ToolRegistry`] and invoked by the
//! orchestrator with a [`ToolContext`] that scopes what they may touch: the
//! task's project root and a [`CommandRunner`] that enforces the sandbox.

/// Built-in tools: file read, terminal and user question.
pub mod builtins;
/// Sandboxed command execution.
pub mod sandbox;
/// Ordered, first-wins tool registry.
pub mod registry;
/// Tool trait and its descriptor, context and output types.
pub mod tool;

pub use builtins::{register_builtins, AskUserTool, FileReadTool, TerminalTool};
pub use registry::ToolRegistry;
pub use sandbox::{
    CommandOutput, CommandRunner, DeniedCommandRunner, SandboxConfig, SandboxedCommandRunner,
};
pub use tool::{Tool, ToolContext, ToolDescriptor, ToolOutput};
