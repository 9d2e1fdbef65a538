use crate::action::ParsedAction;
use crate::error::{ConductorError, ConductorResult, ErrorKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a [`Task`].
///
/// `pending → running → {waiting, delegated, completed, failed, interrupted}`;
/// `waiting` and `delegated` return to `running`. The last three are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created, loop not started yet.
    Pending,
    /// The loop is executing turns.
    Running,
    /// Parked until `resolve_user_input` supplies missing data.
    Waiting,
    /// Blocked on a child task.
    Delegated,
    /// Finished with a final result.
    Completed,
    /// Finished with a task-level error.
    Failed,
    /// Cancelled externally.
    Interrupted,
}

impl TaskStatus {
    /// Whether no further transitions are possible.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Interrupted
        )
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        match self {
            Pending => matches!(next, Running | Failed | Interrupted),
            Running => matches!(
                next,
                Waiting | Delegated | Completed | Failed | Interrupted
            ),
            Waiting | Delegated => matches!(next, Running | Failed | Interrupted),
            Completed | Failed | Interrupted => false,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Waiting => "waiting",
            TaskStatus::Delegated => "delegated",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Interrupted => "interrupted",
        };
        f.write_str(s)
    }
}

/// Where an [`Observation`] came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ObservationSource {
    /// Output (or error) of a tool invocation.
    Tool {
        /// Tool name as requested by the model.
        name: String,
    },
    /// Outcome of a delegated child task.
    Delegation {
        /// Agent the work was delegated to.
        agent: String,
        /// The child task, if one was created.
        child_task_id: Option<Uuid>,
    },
    /// Input supplied by a human through `resolve_user_input`.
    User,
    /// Diagnostics produced by the orchestrator itself (provider and protocol errors).
    Orchestrator,
    /// The final result of the task.
    Result,
}

/// A history entry recording the outcome of a tool call, delegation or error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Origin of the observation.
    pub source: ObservationSource,
    /// Text fed back into future prompts.
    pub content: String,
    /// Set when the observation records an error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
}

impl Observation {
    /// Successful tool output.
    pub fn tool(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            source: ObservationSource::Tool { name: name.into() },
            content: content.into(),
            error: None,
        }
    }

    /// Tool-level failure (unavailable, denied or erroring tool).
    pub fn tool_error(name: impl Into<String>, kind: ErrorKind, content: impl Into<String>) -> Self {
        Self {
            source: ObservationSource::Tool { name: name.into() },
            content: content.into(),
            error: Some(kind),
        }
    }

    /// Outcome of a child task. `error` is set when the child did not complete.
    pub fn delegation(
        agent: impl Into<String>,
        child_task_id: Option<Uuid>,
        content: impl Into<String>,
        error: Option<ErrorKind>,
    ) -> Self {
        Self {
            source: ObservationSource::Delegation {
                agent: agent.into(),
                child_task_id,
            },
            content: content.into(),
            error,
        }
    }

    /// Human-supplied input.
    pub fn user_input(content: impl Into<String>) -> Self {
        Self {
            source: ObservationSource::User,
            content: content.into(),
            error: None,
        }
    }

    /// Orchestrator diagnostic for a recoverable error.
    pub fn diagnostic(kind: ErrorKind, content: impl Into<String>) -> Self {
        Self {
            source: ObservationSource::Orchestrator,
            content: content.into(),
            error: Some(kind),
        }
    }

    /// The task's final result.
    pub fn result(content: impl Into<String>) -> Self {
        Self {
            source: ObservationSource::Result,
            content: content.into(),
            error: None,
        }
    }

    /// Whether this observation records an error.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// One entry of a task's append-only history.
///
/// Model turns carry the prompt, raw reply and parsed action; entries added
/// when a child finishes or a user answers carry only an observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    /// Position in the history, assigned on append.
    pub sequence: u32,
    /// Model iteration that produced this entry, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iteration: Option<u32>,
    /// Prompt sent to the provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    /// Raw model reply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply: Option<String>,
    /// Interpreted action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<ParsedAction>,
    /// Outcome of dispatching the action, or an external observation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observation: Option<Observation>,
    /// When the entry was appended.
    pub recorded_at: DateTime<Utc>,
}

impl Turn {
    /// A model turn for the given iteration.
    pub fn model(iteration: u32, prompt: impl Into<String>) -> Self {
        Self {
            sequence: 0,
            iteration: Some(iteration),
            prompt: Some(prompt.into()),
            reply: None,
            action: None,
            observation: None,
            recorded_at: Utc::now(),
        }
    }

    /// An entry carrying only an observation.
    pub fn observation_only(observation: Observation) -> Self {
        Self {
            sequence: 0,
            iteration: None,
            prompt: None,
            reply: None,
            action: None,
            observation: Some(observation),
            recorded_at: Utc::now(),
        }
    }

    /// Attach the raw model reply.
    pub fn with_reply(mut self, reply: impl Into<String>) -> Self {
        self.reply = Some(reply.into());
        self
    }

    /// Attach the parsed action.
    pub fn with_action(mut self, action: ParsedAction) -> Self {
        self.action = Some(action);
        self
    }

    /// Attach the dispatch outcome.
    pub fn with_observation(mut self, observation: Observation) -> Self {
        self.observation = Some(observation);
        self
    }
}

/// Running counters kept per task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCounters {
    /// Model turns consumed (bounded by the iteration ceiling).
    pub iterations: u32,
    /// Tool invocations that reached a tool's `execute`.
    pub tool_calls: u32,
    /// Recoverable errors recorded as observations.
    pub errors: u32,
    /// Child tasks spawned.
    pub delegations: u32,
}

/// Why a task ended in `failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailure {
    /// Taxonomy bucket of the fatal error.
    pub kind: ErrorKind,
    /// Human-readable summary.
    pub message: String,
}

impl From<&ConductorError> for TaskFailure {
    fn from(err: &ConductorError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// One running instance of an agent executing a request loop.
///
/// Status and history are private: the only way to change them is through
/// [`Task::transition`] and [`Task::append`], which enforce terminality and
/// the append-only history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Opaque identity.
    pub id: Uuid,
    /// Name of the agent that owns the task.
    pub agent: String,
    /// Original request payload.
    pub request: serde_json::Value,
    status: TaskStatus,
    history: Vec<Turn>,
    /// The delegating task, if this is a child.
    #[serde(default)]
    pub parent_task_id: Option<Uuid>,
    /// Child tasks spawned by delegation, in spawn order.
    #[serde(default)]
    pub children: Vec<Uuid>,
    /// Depth in the delegation tree (0 = root).
    #[serde(default)]
    pub depth: u32,
    /// Final output, set on completion.
    #[serde(default)]
    pub output: Option<serde_json::Value>,
    /// Fatal error, set on failure or interruption.
    #[serde(default)]
    pub failure: Option<TaskFailure>,
    /// Running counters.
    #[serde(default)]
    pub counters: TaskCounters,
    /// When the task was created.
    pub started_at: DateTime<Utc>,
    /// Last mutation.
    pub updated_at: DateTime<Utc>,
    /// When the task reached a terminal status.
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Creates a root task in `pending`.
    pub fn new(agent: impl Into<String>, request: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            agent: agent.into(),
            request,
            status: TaskStatus::Pending,
            history: Vec::new(),
            parent_task_id: None,
            children: Vec::new(),
            depth: 0,
            output: None,
            failure: None,
            counters: TaskCounters::default(),
            started_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    /// Marks this task as a child of `parent_id` at the given depth.
    pub fn with_parent(mut self, parent_id: Uuid, depth: u32) -> Self {
        self.parent_task_id = Some(parent_id);
        self.depth = depth;
        self
    }

    /// Current status.
    pub fn status(&self) -> TaskStatus {
        self.status
    }

    /// Ordered, append-only history.
    pub fn history(&self) -> &[Turn] {
        &self.history
    }

    /// Whether the task reached a terminal status.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Moves to `next`, returning the previous status.
    pub fn transition(&mut self, next: TaskStatus) -> ConductorResult<TaskStatus> {
        if !self.status.can_transition_to(next) {
            return Err(ConductorError::InvalidStateTransition {
                task_id: self.id,
                status: self.status,
                operation: format!("transition to {next}"),
            });
        }
        let previous = self.status;
        self.status = next;
        self.updated_at = Utc::now();
        if next.is_terminal() {
            self.finished_at = Some(self.updated_at);
        }
        Ok(previous)
    }

    /// Appends a turn, assigning its sequence number. Refused once terminal.
    pub fn append(&mut self, mut turn: Turn) -> ConductorResult<&Turn> {
        if self.is_terminal() {
            return Err(ConductorError::InvalidStateTransition {
                task_id: self.id,
                status: self.status,
                operation: "append history".to_string(),
            });
        }
        turn.sequence = self.history.len() as u32;
        self.updated_at = Utc::now();
        self.history.push(turn);
        Ok(&self.history[self.history.len() - 1])
    }

    /// Records a recoverable error.
    pub fn record_error(&mut self) {
        self.counters.errors += 1;
    }

    /// Finishes the task with `output`.
    pub fn complete(&mut self, output: serde_json::Value) -> ConductorResult<()> {
        self.transition(TaskStatus::Completed)?;
        self.output = Some(output);
        Ok(())
    }

    /// Finishes the task with a fatal error.
    pub fn fail(&mut self, failure: TaskFailure) -> ConductorResult<()> {
        self.transition(TaskStatus::Failed)?;
        self.failure = Some(failure);
        Ok(())
    }

    /// Finishes the task after an external cancel.
    pub fn interrupt(&mut self) -> ConductorResult<()> {
        self.transition(TaskStatus::Interrupted)?;
        self.failure = Some(TaskFailure::from(&ConductorError::Cancelled(self.id)));
        Ok(())
    }

    /// Observations in history order.
    pub fn observations(&self) -> impl Iterator<Item = &Observation> {
        self.history.iter().filter_map(|t| t.observation.as_ref())
    }
}
