//! Task orchestration engine for Conductor.
//!
//! Runs each task as an iterative loop: render a prompt, ask the model for
//! exactly one action, execute it (tool call, delegation to another agent,
//! or final result), record the observation, repeat. Tasks can pause for
//! user input, delegate to child tasks, and be cancelled.
//!
//! # Main types
//!
//! - [`Orchestrator`] — Owns the task loops and their lifecycle.
//! - [`OrchestratorConfig`] — Iteration ceiling, delegation depth, project root.
//! - [`DelegationGuard`] — Depth, cycle and permission checks for delegation.
//! - [`AgentMonitor`] — Per-agent state and metrics.

/// Engine limits and defaults.
pub mod config;
/// The orchestrator and its task loop.
pub mod engine;
/// Delegation checks.
pub mod guard;
/// Agent state and metrics monitoring.
pub mod monitor;
/// Model reply parsing.
pub mod parser;
/// Prompt rendering.
pub mod prompt;

pub use config::OrchestratorConfig;
pub use engine::{Orchestrator, OrchestratorBuilder};
pub use guard::DelegationGuard;
pub use monitor::{AgentMetrics, AgentMonitor, AgentState, WorkerStatus};
pub use parser::parse_action;
pub use prompt::{render_prompt, PromptInput};
