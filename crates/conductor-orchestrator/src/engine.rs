use crate::config::OrchestratorConfig;
use crate::guard::DelegationGuard;
use crate::monitor::{AgentMonitor, WorkerStatus};
use crate::parser::parse_action;
use crate::prompt::{render_prompt, PromptInput};
use conductor_core::{
    Action, ActivityBus, ActivityEvent, ActivityKind, AgentDefinition, AgentDirectory,
    ConductorError, ConductorResult, ErrorKind, InMemoryTaskStore, Observation, Permission, Task,
    TaskFailure, TaskStatus, TaskStore, Turn,
};
use conductor_llm::{LanguageModel, ModelCall};
use conductor_tools::{
    CommandRunner, DeniedCommandRunner, SandboxConfig, SandboxedCommandRunner, ToolContext,
    ToolRegistry,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Live control surface of a non-terminal task.
struct TaskHandle {
    status: watch::Sender<TaskStatus>,
    cancel: CancellationToken,
    input: Mutex<Option<oneshot::Sender<String>>>,
    /// Agent names from the root task down to this task's agent.
    lineage: Vec<String>,
}

struct ParentLink {
    id: Uuid,
    depth: u32,
    lineage: Vec<String>,
}

/// Why a task loop stopped without a final result.
enum LoopStop {
    Cancelled,
    Fatal(ConductorError),
}

struct Inner {
    config: OrchestratorConfig,
    agents: Arc<dyn AgentDirectory>,
    tools: Arc<ToolRegistry>,
    model: Arc<dyn LanguageModel>,
    store: Arc<dyn TaskStore>,
    bus: ActivityBus,
    monitor: Arc<AgentMonitor>,
    guard: DelegationGuard,
    commands: Arc<dyn CommandRunner>,
    denied: Arc<dyn CommandRunner>,
    handles: Mutex<HashMap<Uuid, Arc<TaskHandle>>>,
}

/// Drives tasks through the request / act / observe loop.
///
/// Every task runs in its own tokio task and is the only writer of its
/// record. Delegation spawns a child task and parks the parent in
/// `delegated` until the child is terminal. Cancelling a parent leaves its
/// children running.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

/// Builder for [`Orchestrator`].
pub struct OrchestratorBuilder {
    config: OrchestratorConfig,
    agents: Arc<dyn AgentDirectory>,
    tools: Arc<ToolRegistry>,
    model: Arc<dyn LanguageModel>,
    store: Option<Arc<dyn TaskStore>>,
    bus: Option<ActivityBus>,
    monitor: Option<Arc<AgentMonitor>>,
    commands: Option<Arc<dyn CommandRunner>>,
}

impl OrchestratorBuilder {
    /// Engine limits; defaults otherwise.
    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Task persistence; in-memory otherwise.
    pub fn store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Shares an existing activity bus.
    pub fn bus(mut self, bus: ActivityBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Shares an existing agent monitor.
    pub fn monitor(mut self, monitor: Arc<AgentMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Command runner for agents holding the terminal permission.
    pub fn sandbox(self, config: SandboxConfig) -> Self {
        self.command_runner(Arc::new(SandboxedCommandRunner::new(config)))
    }

    /// Replaces the command runner outright.
    pub fn command_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.commands = Some(runner);
        self
    }

    /// Finishes the builder.
    pub fn build(self) -> Orchestrator {
        let guard = DelegationGuard::new().with_max_depth(self.config.max_delegation_depth);
        Orchestrator {
            inner: Arc::new(Inner {
                guard,
                config: self.config,
                agents: self.agents,
                tools: self.tools,
                model: self.model,
                store: self
                    .store
                    .unwrap_or_else(|| Arc::new(InMemoryTaskStore::new())),
                bus: self.bus.unwrap_or_default(),
                monitor: self.monitor.unwrap_or_default(),
                commands: self
                    .commands
                    .unwrap_or_else(|| Arc::new(SandboxedCommandRunner::new(SandboxConfig::default()))),
                denied: Arc::new(DeniedCommandRunner),
                handles: Mutex::new(HashMap::new()),
            }),
        }
    }
}

impl Orchestrator {
    /// Starts a builder over the agents, tools and model every task shares.
    pub fn builder(
        agents: Arc<dyn AgentDirectory>,
        tools: Arc<ToolRegistry>,
        model: Arc<dyn LanguageModel>,
    ) -> OrchestratorBuilder {
        OrchestratorBuilder {
            config: OrchestratorConfig::default(),
            agents,
            tools,
            model,
            store: None,
            bus: None,
            monitor: None,
            commands: None,
        }
    }

    /// Limits the engine runs under.
    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    /// The bus every task publishes to.
    pub fn bus(&self) -> &ActivityBus {
        &self.inner.bus
    }

    /// Subscribes to activity events of every task.
    pub fn subscribe(&self) -> broadcast::Receiver<ActivityEvent> {
        self.inner.bus.subscribe()
    }

    /// Per-agent state and counters.
    pub fn monitor(&self) -> &Arc<AgentMonitor> {
        &self.inner.monitor
    }

    // --- Entry points ---

    /// Starts `agent` on `request` and returns the new task id immediately.
    ///
    /// Fails with a configuration error when the agent is unknown.
    pub async fn run_agent(
        &self,
        agent: &str,
        request: Value,
        parent_task_id: Option<Uuid>,
    ) -> ConductorResult<Uuid> {
        let definition = self.inner.agents.get(agent).ok_or_else(|| {
            ConductorError::Configuration(format!("unknown agent '{agent}'"))
        })?;
        let parent = match parent_task_id {
            Some(id) => Some(self.parent_link(id).await?),
            None => None,
        };
        let (id, _) = self.spawn_task(definition, request, parent).await?;
        Ok(id)
    }

    /// Supplies the answer a `waiting` task asked for.
    ///
    /// On any other status the task is left untouched and an
    /// `InvalidStateTransition` is returned.
    pub async fn resolve_user_input(
        &self,
        task_id: Uuid,
        input: impl Into<String>,
    ) -> ConductorResult<()> {
        const OPERATION: &str = "resolve user input";
        let handle = self.handle(task_id);
        let Some(handle) = handle else {
            return Err(self.not_live(task_id, OPERATION).await);
        };

        let status = *handle.status.borrow();
        let sender = if status == TaskStatus::Waiting {
            handle.input.lock().take()
        } else {
            None
        };
        let rejected = || ConductorError::InvalidStateTransition {
            task_id,
            status,
            operation: OPERATION.to_string(),
        };
        match sender {
            Some(tx) => {
                info!(task_id = %task_id, "Resolving user input");
                tx.send(input.into()).map_err(|_| rejected())
            }
            None => {
                warn!(task_id = %task_id, status = %status, "User input rejected: task is not waiting");
                Err(rejected())
            }
        }
    }

    /// Requests cancellation of a `running` or `waiting` task. The task's own
    /// loop moves it to `interrupted` at its next suspension point; children
    /// are not cancelled. A `delegated` task is refused, since it may not end
    /// before the child it is blocked on.
    pub async fn cancel(&self, task_id: Uuid) -> ConductorResult<()> {
        let handle = self.handle(task_id);
        let Some(handle) = handle else {
            return Err(self.not_live(task_id, "cancel").await);
        };
        let status = *handle.status.borrow();
        if !matches!(status, TaskStatus::Running | TaskStatus::Waiting) {
            return Err(ConductorError::InvalidStateTransition {
                task_id,
                status,
                operation: "cancel".to_string(),
            });
        }
        info!(task_id = %task_id, status = %status, "Cancelling task");
        handle.cancel.cancel();
        Ok(())
    }

    /// Resolves once the task is terminal and returns its final record.
    pub async fn wait(&self, task_id: Uuid) -> ConductorResult<Task> {
        let receiver = self.handle(task_id).map(|h| h.status.subscribe());
        if let Some(mut rx) = receiver {
            // A dropped sender means the loop is gone; the store has the last word.
            let _ = rx.wait_for(|s| s.is_terminal()).await;
        }
        self.task(task_id).await
    }

    /// Snapshot of a task as last persisted.
    pub async fn task(&self, task_id: Uuid) -> ConductorResult<Task> {
        self.inner
            .store
            .get(task_id)
            .await?
            .ok_or(ConductorError::TaskNotFound(task_id))
    }

    // --- Task lifecycle ---

    fn handle(&self, task_id: Uuid) -> Option<Arc<TaskHandle>> {
        self.inner.handles.lock().get(&task_id).cloned()
    }

    async fn not_live(&self, task_id: Uuid, operation: &str) -> ConductorError {
        match self.inner.store.get(task_id).await {
            Ok(Some(task)) => ConductorError::InvalidStateTransition {
                task_id,
                status: task.status(),
                operation: operation.to_string(),
            },
            Ok(None) => ConductorError::TaskNotFound(task_id),
            Err(e) => e,
        }
    }

    async fn parent_link(&self, parent_id: Uuid) -> ConductorResult<ParentLink> {
        let parent = self.task(parent_id).await?;
        let lineage = match self.handle(parent_id) {
            Some(h) => h.lineage.clone(),
            None => vec![parent.agent.clone()],
        };
        Ok(ParentLink {
            id: parent_id,
            depth: parent.depth,
            lineage,
        })
    }

    async fn spawn_task(
        &self,
        agent: Arc<AgentDefinition>,
        request: Value,
        parent: Option<ParentLink>,
    ) -> ConductorResult<(Uuid, watch::Receiver<TaskStatus>)> {
        let mut task = Task::new(&agent.name, request);
        let mut lineage = Vec::new();
        if let Some(link) = parent {
            task = task.with_parent(link.id, link.depth + 1);
            lineage = link.lineage;
        }
        lineage.push(agent.name.clone());

        self.inner.store.create(&task).await?;
        task.transition(TaskStatus::Running)?;
        self.inner.store.update(&task).await?;

        let (status_tx, status_rx) = watch::channel(TaskStatus::Running);
        let handle = Arc::new(TaskHandle {
            status: status_tx,
            cancel: CancellationToken::new(),
            input: Mutex::new(None),
            lineage,
        });
        self.inner.handles.lock().insert(task.id, Arc::clone(&handle));

        info!(
            task_id = %task.id,
            agent = %agent.name,
            parent = ?task.parent_task_id,
            depth = task.depth,
            "Task started"
        );
        let id = task.id;
        self.spawn_loop(task, agent, handle);
        Ok((id, status_rx))
    }

    fn spawn_loop(&self, task: Task, agent: Arc<AgentDefinition>, handle: Arc<TaskHandle>) {
        let this = self.clone();
        tokio::spawn(async move {
            this.drive(task, agent, handle).await;
        });
    }

    async fn drive(self, mut task: Task, agent: Arc<AgentDefinition>, handle: Arc<TaskHandle>) {
        let started = Instant::now();
        self.inner.monitor.start_task(&agent.name, task.id).await;

        let outcome = self.run_turns(&mut task, &agent, &handle).await;
        self.finish(&mut task, &agent, &handle, outcome, started).await;

        self.inner.handles.lock().remove(&task.id);
    }

    async fn finish(
        &self,
        task: &mut Task,
        agent: &AgentDefinition,
        handle: &TaskHandle,
        outcome: Result<Value, LoopStop>,
        started: Instant,
    ) {
        let previous = task.status();
        let (event, transition) = match outcome {
            Ok(output) => {
                info!(task_id = %task.id, agent = %agent.name, turns = task.counters.iterations, "Task completed");
                let event = ActivityEvent::new(ActivityKind::TaskCompleted, task.id, "Task completed")
                    .with_payload(serde_json::json!({ "output": output }));
                (Some(event), task.complete(output))
            }
            Err(LoopStop::Fatal(e)) => {
                error!(task_id = %task.id, agent = %agent.name, error = %e, "Task failed");
                let event = ActivityEvent::new(ActivityKind::TaskFailed, task.id, e.to_string())
                    .with_payload(serde_json::json!({ "kind": e.kind() }));
                (Some(event), task.fail(TaskFailure::from(&e)))
            }
            Err(LoopStop::Cancelled) => {
                info!(task_id = %task.id, agent = %agent.name, "Task interrupted");
                (None, task.interrupt())
            }
        };
        if let Err(e) = transition {
            error!(task_id = %task.id, error = %e, "Could not finalize task");
            return;
        }

        self.persist(task).await;
        self.inner
            .monitor
            .finish_task(
                &agent.name,
                task.id,
                task.status() == TaskStatus::Completed,
                started.elapsed().as_millis() as u64,
            )
            .await;
        self.emit(status_event(task.id, previous, task.status()));
        if let Some(event) = event {
            self.emit(event);
        }
        handle.status.send_replace(task.status());
    }

    // --- Turn loop ---

    async fn run_turns(
        &self,
        task: &mut Task,
        agent: &AgentDefinition,
        handle: &TaskHandle,
    ) -> Result<Value, LoopStop> {
        let limit = self.inner.config.max_iterations;
        loop {
            if handle.cancel.is_cancelled() {
                return Err(LoopStop::Cancelled);
            }
            if task.counters.iterations >= limit {
                warn!(task_id = %task.id, agent = %agent.name, limit, "Iteration limit reached");
                return Err(LoopStop::Fatal(ConductorError::IterationLimitExceeded {
                    limit,
                }));
            }
            task.counters.iterations += 1;
            let iteration = task.counters.iterations;

            let prompt = self.render(task, agent);
            let mut call = ModelCall::new(&agent.name, prompt.clone())
                .with_provider(agent.provider.clone(), agent.model.clone());
            call.options = self.inner.config.generation;

            debug!(task_id = %task.id, agent = %agent.name, turn = iteration, "Calling model");
            let reply = tokio::select! {
                biased;
                _ = handle.cancel.cancelled() => return Err(LoopStop::Cancelled),
                reply = self.inner.model.complete(call) => reply,
            };

            let turn = Turn::model(iteration, prompt);
            let reply = match reply {
                Ok(reply) => reply,
                Err(e) if e.is_recoverable() => {
                    warn!(task_id = %task.id, agent = %agent.name, turn = iteration, error = %e, "Model call failed");
                    self.record_error(task, agent).await;
                    self.append(
                        task,
                        turn.with_observation(Observation::diagnostic(e.kind(), e.to_string())),
                    )
                    .await?;
                    continue;
                }
                Err(e) => return Err(LoopStop::Fatal(e)),
            };
            self.inner
                .monitor
                .record_turn(&agent.name, tokens_used(reply.metadata.as_ref()))
                .await;

            let turn = turn.with_reply(&reply.content);
            let parsed = match parse_action(&reply.content) {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!(task_id = %task.id, agent = %agent.name, turn = iteration, error = %e, "Unparseable model reply");
                    self.record_error(task, agent).await;
                    self.append(
                        task,
                        turn.with_observation(Observation::diagnostic(
                            ErrorKind::ProtocolViolation,
                            e.to_string(),
                        )),
                    )
                    .await?;
                    continue;
                }
            };

            debug!(task_id = %task.id, agent = %agent.name, turn = iteration, action = parsed.action.label(), "Dispatching action");
            if let Some(thought) = &parsed.thought {
                self.emit(ActivityEvent::new(ActivityKind::Thought, task.id, thought.clone()));
            }
            let turn = turn.with_action(parsed.clone());

            match parsed.action {
                Action::ToolCall { tool, args } => {
                    self.dispatch_tool(task, agent, handle, turn, &tool, args)
                        .await?;
                }
                Action::Delegate {
                    agent: target,
                    request,
                } => {
                    self.dispatch_delegate(task, agent, handle, turn, &target, request)
                        .await?;
                }
                Action::FinalResult { result } => {
                    self.append(task, turn.with_observation(Observation::result(text_of(&result))))
                        .await?;
                    self.emit(
                        ActivityEvent::new(ActivityKind::Result, task.id, text_of(&result))
                            .with_payload(serde_json::json!({ "result": result })),
                    );
                    return Ok(result);
                }
            }
        }
    }

    fn render(&self, task: &Task, agent: &AgentDefinition) -> String {
        let tools = self
            .inner
            .tools
            .descriptors()
            .into_iter()
            .filter(|d| agent.allows_tool(&d.name))
            .collect();
        let delegates = self
            .inner
            .agents
            .list()
            .into_iter()
            .filter(|a| a.name != agent.name && agent.allows_delegate(&a.name))
            .collect();
        render_prompt(&PromptInput {
            agent,
            task,
            tools,
            delegates,
            history_window: self.inner.config.history_window,
        })
    }

    async fn dispatch_tool(
        &self,
        task: &mut Task,
        agent: &AgentDefinition,
        handle: &TaskHandle,
        turn: Turn,
        name: &str,
        args: Value,
    ) -> Result<(), LoopStop> {
        let registered = self.inner.tools.get(name).cloned();
        let tool = match registered {
            Some(tool) if agent.allows_tool(name) => tool,
            other => {
                let reason = if other.is_some() {
                    format!("Tool '{name}' is not available to {}", agent.name)
                } else {
                    format!("Tool '{name}' is not registered")
                };
                warn!(task_id = %task.id, agent = %agent.name, tool = %name, "Unavailable tool requested");
                self.record_error(task, agent).await;
                return self
                    .append(
                        task,
                        turn.with_observation(Observation::tool_error(
                            name,
                            ErrorKind::ToolUnavailable,
                            reason,
                        )),
                    )
                    .await;
            }
        };

        let missing = ToolRegistry::missing_permissions(&*tool, &agent.permissions);
        if !missing.is_empty() {
            warn!(task_id = %task.id, agent = %agent.name, tool = %name, missing = ?missing, "Permission denied for tool");
            self.record_error(task, agent).await;
            return self
                .append(
                    task,
                    turn.with_observation(Observation::tool_error(
                        name,
                        ErrorKind::ToolExecution,
                        format!("Permission denied: tool '{name}' requires {missing:?}"),
                    )),
                )
                .await;
        }

        self.emit(
            ActivityEvent::new(ActivityKind::Tool, task.id, format!("Using tool {name}"))
                .with_payload(serde_json::json!({ "tool": name, "args": args })),
        );
        task.counters.tool_calls += 1;
        self.inner.monitor.record_tool_call(&agent.name).await;

        let runner = if agent.permissions.has(Permission::Terminal) {
            Arc::clone(&self.inner.commands)
        } else {
            Arc::clone(&self.inner.denied)
        };
        let ctx = ToolContext::new(
            task.id,
            agent.name.clone(),
            self.inner.config.project_root.clone(),
            runner,
        );

        info!(task_id = %task.id, agent = %agent.name, tool = %name, "Executing tool");
        let output = tokio::select! {
            biased;
            _ = handle.cancel.cancelled() => return Err(LoopStop::Cancelled),
            output = ToolRegistry::execute_guarded(&tool, args, &ctx) => output,
        };

        if output.is_error {
            self.record_error(task, agent).await;
            return self
                .append(
                    task,
                    turn.with_observation(Observation::tool_error(
                        name,
                        ErrorKind::ToolExecution,
                        output.text(),
                    )),
                )
                .await;
        }

        match output.awaiting_input {
            Some(question) => {
                self.append(task, turn.with_observation(Observation::tool(name, question.clone())))
                    .await?;
                let answer = self.await_user_input(task, agent, handle, &question).await?;
                self.append(task, Turn::observation_only(Observation::user_input(answer)))
                    .await?;
                self.inner
                    .monitor
                    .set_status(&agent.name, WorkerStatus::Working)
                    .await;
                self.set_status(task, TaskStatus::Running, handle).await
            }
            None => {
                self.append(task, turn.with_observation(Observation::tool(name, output.text())))
                    .await
            }
        }
    }

    async fn await_user_input(
        &self,
        task: &mut Task,
        agent: &AgentDefinition,
        handle: &TaskHandle,
        question: &str,
    ) -> Result<String, LoopStop> {
        let (tx, rx) = oneshot::channel();
        *handle.input.lock() = Some(tx);
        self.set_status(task, TaskStatus::Waiting, handle).await?;
        self.inner
            .monitor
            .set_status(&agent.name, WorkerStatus::WaitingForInput)
            .await;
        self.emit(
            ActivityEvent::new(ActivityKind::WaitingForUserInput, task.id, question)
                .with_payload(serde_json::json!({ "question": question })),
        );

        info!(task_id = %task.id, agent = %agent.name, "Waiting for user input");
        tokio::select! {
            biased;
            _ = handle.cancel.cancelled() => {
                handle.input.lock().take();
                Err(LoopStop::Cancelled)
            }
            answer = rx => answer.map_err(|_| LoopStop::Cancelled),
        }
    }

    async fn dispatch_delegate(
        &self,
        task: &mut Task,
        agent: &AgentDefinition,
        handle: &TaskHandle,
        turn: Turn,
        target: &str,
        request: Value,
    ) -> Result<(), LoopStop> {
        let checked = self.inner.guard.check(
            agent,
            task.depth,
            &handle.lineage,
            target,
            self.inner.agents.as_ref(),
        );
        let spawned = match checked {
            Ok(definition) => {
                let link = ParentLink {
                    id: task.id,
                    depth: task.depth,
                    lineage: handle.lineage.clone(),
                };
                self.spawn_task(definition, request.clone(), Some(link)).await
            }
            Err(e) => Err(e),
        };
        let (child_id, mut child_status) = match spawned {
            Ok(spawned) => spawned,
            Err(e) => {
                warn!(task_id = %task.id, agent = %agent.name, target = %target, error = %e, "Delegation refused");
                self.record_error(task, agent).await;
                return self
                    .append(
                        task,
                        turn.with_observation(Observation::delegation(
                            target,
                            None,
                            e.to_string(),
                            Some(ErrorKind::Delegation),
                        )),
                    )
                    .await;
            }
        };

        task.children.push(child_id);
        task.counters.delegations += 1;
        self.inner.monitor.record_delegation(&agent.name).await;
        self.inner
            .monitor
            .set_status(&agent.name, WorkerStatus::Delegating)
            .await;
        self.append(task, turn).await?;
        self.set_status(task, TaskStatus::Delegated, handle).await?;
        self.emit(
            ActivityEvent::new(
                ActivityKind::Delegate,
                task.id,
                format!("Delegating to {target}"),
            )
            .with_payload(serde_json::json!({
                "agent": target,
                "childTaskId": child_id,
                "request": request,
            })),
        );

        info!(task_id = %task.id, child_task_id = %child_id, target = %target, "Waiting for delegated task");
        // A cancel accepted just before delegation takes effect once the child is done.
        wait_terminal(&mut child_status).await;

        let observation = self.child_observation(target, child_id).await;
        if observation.is_error() {
            self.record_error(task, agent).await;
        }
        self.append(task, Turn::observation_only(observation)).await?;
        self.inner
            .monitor
            .set_status(&agent.name, WorkerStatus::Working)
            .await;
        self.set_status(task, TaskStatus::Running, handle).await
    }

    async fn child_observation(&self, target: &str, child_id: Uuid) -> Observation {
        let failed = |message: String| {
            Observation::delegation(target, Some(child_id), message, Some(ErrorKind::Delegation))
        };
        let child = match self.inner.store.get(child_id).await {
            Ok(Some(child)) => child,
            Ok(None) => return failed(format!("{target} task {child_id} is missing")),
            Err(e) => return failed(format!("{target} task could not be loaded: {e}")),
        };
        match child.status() {
            TaskStatus::Completed => Observation::delegation(
                target,
                Some(child_id),
                child.output.as_ref().map(text_of).unwrap_or_default(),
                None,
            ),
            TaskStatus::Failed => match &child.failure {
                Some(f) => failed(format!("{target} failed ({}): {}", f.kind, f.message)),
                None => failed(format!("{target} failed")),
            },
            TaskStatus::Interrupted => failed(format!("{target} was interrupted")),
            other => failed(format!("{target} stopped unexpectedly while {other}")),
        }
    }

    // --- Bookkeeping ---

    async fn set_status(
        &self,
        task: &mut Task,
        next: TaskStatus,
        handle: &TaskHandle,
    ) -> Result<(), LoopStop> {
        let previous = task.transition(next).map_err(LoopStop::Fatal)?;
        debug!(task_id = %task.id, from = %previous, to = %next, "Task status changed");
        self.persist(task).await;
        handle.status.send_replace(next);
        self.emit(status_event(task.id, previous, next));
        Ok(())
    }

    async fn append(&self, task: &mut Task, turn: Turn) -> Result<(), LoopStop> {
        task.append(turn).map_err(LoopStop::Fatal)?;
        self.persist(task).await;
        Ok(())
    }

    async fn record_error(&self, task: &mut Task, agent: &AgentDefinition) {
        task.record_error();
        self.inner.monitor.record_error(&agent.name).await;
    }

    async fn persist(&self, task: &Task) {
        if let Err(e) = self.inner.store.update(task).await {
            error!(task_id = %task.id, error = %e, "Failed to persist task");
        }
    }

    fn emit(&self, event: ActivityEvent) {
        self.inner.bus.publish(event);
    }
}

fn status_event(task_id: Uuid, from: TaskStatus, to: TaskStatus) -> ActivityEvent {
    ActivityEvent::new(
        ActivityKind::TaskStatusChanged,
        task_id,
        format!("{from} -> {to}"),
    )
    .with_payload(serde_json::json!({ "from": from, "to": to }))
}

async fn wait_terminal(rx: &mut watch::Receiver<TaskStatus>) {
    // Err means the child loop is gone; its stored record decides the outcome.
    let _ = rx.wait_for(|s| s.is_terminal()).await;
}

/// Strings verbatim, everything else as compact JSON.
fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn tokens_used(metadata: Option<&Value>) -> u64 {
    let Some(usage) = metadata.and_then(|m| m.get("usage")) else {
        return 0;
    };
    usage["input_tokens"].as_u64().unwrap_or(0) + usage["output_tokens"].as_u64().unwrap_or(0)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_text_of() {
        assert_eq!(text_of(&serde_json::json!("all tests pass")), "all tests pass");
        assert_eq!(text_of(&serde_json::json!({"ok": true})), "{\"ok\":true}");
    }

    #[test]
    fn test_tokens_used() {
        let meta = serde_json::json!({"usage": {"input_tokens": 10, "output_tokens": 5}});
        assert_eq!(tokens_used(Some(&meta)), 15);
        assert_eq!(tokens_used(None), 0);
        assert_eq!(tokens_used(Some(&serde_json::json!({"provider": "x"}))), 0);
    }

    #[test]
    fn test_status_event_payload() {
        let id = Uuid::new_v4();
        let event = status_event(id, TaskStatus::Running, TaskStatus::Waiting);
        assert_eq!(event.message, "running -> waiting");
        assert_eq!(event.payload.unwrap()["to"], "waiting");
    }
}
