use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// What an agent is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    /// No task of this agent is running.
    Idle,
    /// Calling the model or running a tool.
    Working,
    /// Blocked on a user answer.
    WaitingForInput,
    /// Blocked on a child task.
    Delegating,
}

/// Accumulated counters for one agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentMetrics {
    /// Model replies received.
    pub total_turns: u32,
    /// Tool invocations, successful or not.
    pub total_tool_calls: u32,
    /// Recoverable errors observed.
    pub errors: u32,
    /// Child tasks spawned.
    pub delegations: u32,
    /// Tasks that ended `completed`.
    pub tasks_completed: u32,
    /// Tasks that ended `failed` or `interrupted`.
    pub tasks_failed: u32,
    /// Wall time across finished tasks.
    pub duration_ms: u64,
    /// Tokens reported by providers.
    pub tokens_used: u64,
}

/// Real-time snapshot of one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentState {
    /// Agent name.
    pub agent: String,
    /// Most recently started task still running.
    pub current_task: Option<Uuid>,
    /// Tasks of this agent not yet terminal.
    pub active_tasks: u32,
    /// Current activity.
    pub status: WorkerStatus,
    /// Counters since the orchestrator started.
    pub metrics: AgentMetrics,
}

impl AgentState {
    fn new(agent: &str) -> Self {
        Self {
            agent: agent.to_string(),
            current_task: None,
            active_tasks: 0,
            status: WorkerStatus::Idle,
            metrics: AgentMetrics::default(),
        }
    }
}

/// Tracks state and metrics per agent name.
///
/// Agents appear on first use. Multiple tasks of the same agent may run at
/// once; `active_tasks` counts them.
pub struct AgentMonitor {
    states: Arc<RwLock<HashMap<String, AgentState>>>,
}

impl AgentMonitor {
    /// Creates a monitor that knows no agents yet.
    pub fn new() -> Self {
        Self {
            states: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    async fn update(&self, agent: &str, f: impl FnOnce(&mut AgentState)) {
        let mut states = self.states.write().await;
        let state = states
            .entry(agent.to_string())
            .or_insert_with(|| AgentState::new(agent));
        f(state);
    }

    /// Mark an agent as working on a task.
    pub async fn start_task(&self, agent: &str, task_id: Uuid) {
        self.update(agent, |s| {
            s.current_task = Some(task_id);
            s.active_tasks += 1;
            s.status = WorkerStatus::Working;
        })
        .await;
    }

    /// Mark a task of the agent as finished.
    pub async fn finish_task(&self, agent: &str, task_id: Uuid, completed: bool, duration_ms: u64) {
        self.update(agent, |s| {
            s.active_tasks = s.active_tasks.saturating_sub(1);
            if s.current_task == Some(task_id) {
                s.current_task = None;
            }
            if s.active_tasks == 0 {
                s.status = WorkerStatus::Idle;
            }
            if completed {
                s.metrics.tasks_completed += 1;
            } else {
                s.metrics.tasks_failed += 1;
            }
            s.metrics.duration_ms += duration_ms;
        })
        .await;
    }

    /// Overrides the agent's current activity.
    pub async fn set_status(&self, agent: &str, status: WorkerStatus) {
        self.update(agent, |s| s.status = status).await;
    }

    /// Record a recoverable error for an agent.
    pub async fn record_error(&self, agent: &str) {
        self.update(agent, |s| s.metrics.errors += 1).await;
    }

    /// Record metrics for a model turn.
    pub async fn record_turn(&self, agent: &str, tokens: u64) {
        self.update(agent, |s| {
            s.metrics.total_turns += 1;
            s.metrics.tokens_used += tokens;
        })
        .await;
    }

    /// Record a tool invocation.
    pub async fn record_tool_call(&self, agent: &str) {
        self.update(agent, |s| s.metrics.total_tool_calls += 1).await;
    }

    /// Record a spawned child task.
    pub async fn record_delegation(&self, agent: &str) {
        self.update(agent, |s| s.metrics.delegations += 1).await;
    }

    /// Get the state of a specific agent.
    pub async fn get_state(&self, agent: &str) -> Option<AgentState> {
        self.states.read().await.get(agent).cloned()
    }
}

impl Default for AgentMonitor {
    fn default() -> Self {
        Self::new()
    }
}
