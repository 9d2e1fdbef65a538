use conductor_llm::GenerationOptions;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Limits and defaults applied to every task loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Model turns a task may consume before it is failed.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Deepest allowed delegation chain below a root task.
    #[serde(default = "default_max_delegation_depth")]
    pub max_delegation_depth: u32,
    /// Root directory handed to tools.
    #[serde(default = "default_project_root")]
    pub project_root: PathBuf,
    /// Recent turns rendered into each prompt.
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    /// Overrides applied to every model call.
    #[serde(default)]
    pub generation: GenerationOptions,
}

fn default_max_iterations() -> u32 {
    20
}

fn default_max_delegation_depth() -> u32 {
    3
}

fn default_project_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_history_window() -> usize {
    20
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_delegation_depth: default_max_delegation_depth(),
            project_root: default_project_root(),
            history_window: default_history_window(),
            generation: GenerationOptions::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Sets the per-task model-call ceiling.
    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }

    /// Sets how deep child tasks may nest.
    pub fn with_max_delegation_depth(mut self, depth: u32) -> Self {
        self.max_delegation_depth = depth;
        self
    }

    /// Sets the directory tools are confined to.
    pub fn with_project_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.project_root = root.into();
        self
    }
}
