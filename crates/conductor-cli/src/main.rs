//! `conductor` binary: loads `conductor.toml`, wires the provider router,
//! tool registry, agent directory and task store into an orchestrator, and
//! runs one agent request from the terminal.

use clap::{Parser, Subcommand, ValueEnum};
use conductor_core::{
    ActivityEvent, ActivityKind, AgentDirectory, AgentRegistry, FileTaskStore, TaskStatus,
};
use conductor_llm::{ProviderRouter, RouterConfig};
use conductor_orchestrator::{Orchestrator, OrchestratorConfig};
use conductor_tools::{register_builtins, SandboxConfig, ToolRegistry};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "conductor", about = "Conductor: multi-agent task orchestrator")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "conductor.toml")]
    config: PathBuf,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Json)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an agent on a request and stream its activity
    Run {
        /// Agent to start
        #[arg(short, long)]
        agent: String,
        /// Request text, or a JSON object
        #[arg(short, long)]
        message: String,
    },
    /// List agent definitions
    Agents,
    /// List registered tools
    Tools,
    /// List configured providers
    Providers,
}

#[derive(Deserialize)]
struct ConductorConfig {
    #[serde(default)]
    router: RouterConfig,
    #[serde(default)]
    orchestrator: OrchestratorConfig,
    #[serde(default)]
    sandbox: SandboxConfig,
    #[serde(default = "default_agents_dir")]
    agents_dir: PathBuf,
    #[serde(default = "default_data_dir")]
    data_dir: PathBuf,
}

fn default_agents_dir() -> PathBuf {
    PathBuf::from("./agents")
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

impl ConductorConfig {
    /// Makes relative paths relative to the config file's directory.
    fn resolve_paths(&mut self, base: &Path) {
        for path in [
            &mut self.agents_dir,
            &mut self.data_dir,
            &mut self.orchestrator.project_root,
        ] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let config_str = tokio::fs::read_to_string(&cli.config).await.map_err(|e| {
        anyhow::anyhow!(
            "Failed to read config file '{}': {}",
            cli.config.display(),
            e
        )
    })?;
    let mut config: ConductorConfig = toml::from_str(&config_str)?;
    let config_dir = cli
        .config
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();
    config.resolve_paths(&config_dir);

    match cli.command {
        Commands::Run { agent, message } => run(config, &agent, &message).await,
        Commands::Agents => {
            let agents = load_agents(&config.agents_dir).await?;
            for agent in agents.list() {
                println!("{}", agent.name);
                if !agent.description.is_empty() {
                    println!("  {}", agent.description);
                }
                if !agent.tools.is_empty() {
                    println!("  tools: {}", agent.tools.join(", "));
                }
                if !agent.delegates_to.is_empty() {
                    println!("  delegates to: {}", agent.delegates_to.join(", "));
                }
            }
            Ok(())
        }
        Commands::Tools => {
            for descriptor in builtin_tools().descriptors() {
                println!("{}: {}", descriptor.name, descriptor.description);
                if !descriptor.required_permissions.is_empty() {
                    println!("  requires: {:?}", descriptor.required_permissions);
                }
            }
            Ok(())
        }
        Commands::Providers => {
            let router = ProviderRouter::new(config.router)?;
            for provider in router.providers() {
                let marker = if provider.id == router.default_provider() {
                    " (default)"
                } else {
                    ""
                };
                let key = match provider.kind.api_key_env() {
                    None => "no key needed",
                    Some(_) if provider.resolved_api_key().is_some() => "key set",
                    Some(_) => "key missing",
                };
                println!(
                    "{}{marker}: {} {} at {} [{key}]",
                    provider.id,
                    serde_json::to_value(provider.kind)?
                        .as_str()
                        .unwrap_or_default(),
                    provider.model,
                    provider.base_url(),
                );
            }
            Ok(())
        }
    }
}

fn builtin_tools() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    register_builtins(&mut registry);
    registry
}

async fn load_agents(dir: &Path) -> anyhow::Result<AgentRegistry> {
    let agents = AgentRegistry::load_dir(dir).await.map_err(|e| {
        anyhow::anyhow!("Failed to load agents from '{}': {}", dir.display(), e)
    })?;
    info!(count = agents.len(), dir = %dir.display(), "Agent definitions loaded");
    Ok(agents)
}

/// A JSON object is passed through; anything else becomes `{"message": ...}`.
fn parse_request(message: &str) -> serde_json::Value {
    match serde_json::from_str::<serde_json::Value>(message) {
        Ok(value @ serde_json::Value::Object(_)) => value,
        _ => serde_json::json!({ "message": message }),
    }
}

async fn run(config: ConductorConfig, agent: &str, message: &str) -> anyhow::Result<()> {
    let agents = load_agents(&config.agents_dir).await?;
    let router = ProviderRouter::new(config.router)?;
    let store = FileTaskStore::new(config.data_dir.join("tasks")).await?;
    info!(
        default_provider = %router.default_provider(),
        project_root = %config.orchestrator.project_root.display(),
        "Starting orchestrator"
    );

    let orchestrator = Orchestrator::builder(
        Arc::new(agents),
        Arc::new(builtin_tools()),
        Arc::new(router),
    )
    .config(config.orchestrator)
    .sandbox(config.sandbox)
    .store(Arc::new(store))
    .build();

    let mut events = orchestrator.subscribe();
    let task_id = orchestrator
        .run_agent(agent, parse_request(message), None)
        .await?;
    println!("task {task_id} started ({agent})");

    let waiter = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.wait(task_id).await })
    };
    tokio::pin!(waiter);
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            finished = &mut waiter => {
                while let Ok(event) = events.try_recv() {
                    print_event(&event, task_id);
                }
                let task = finished??;
                match task.status() {
                    TaskStatus::Completed => {
                        let output = task.output.unwrap_or_default();
                        println!("{}", serde_json::to_string_pretty(&output)?);
                    }
                    status => {
                        let reason = task
                            .failure
                            .map(|f| f.message)
                            .unwrap_or_else(|| status.to_string());
                        anyhow::bail!("task {task_id} {status}: {reason}");
                    }
                }
                return Ok(());
            }
            event = events.recv() => match event {
                Ok(event) => {
                    print_event(&event, task_id);
                    if event.kind == ActivityKind::WaitingForUserInput {
                        let answer = stdin.next_line().await?.unwrap_or_default();
                        orchestrator.resolve_user_input(event.task_id, answer).await?;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Activity stream lagged");
                }
                Err(RecvError::Closed) => {}
            },
            _ = tokio::signal::ctrl_c() => {
                info!(task_id = %task_id, "Interrupt received, cancelling task");
                orchestrator.cancel(task_id).await?;
            }
        }
    }
}

fn print_event(event: &ActivityEvent, root: Uuid) {
    let scope = if event.task_id == root {
        String::new()
    } else {
        format!("[{}] ", &event.task_id.to_string()[..8])
    };
    match event.kind {
        ActivityKind::Thought => println!("{scope}thinking: {}", event.message),
        ActivityKind::Tool => println!("{scope}tool: {}", event.message),
        ActivityKind::Delegate => println!("{scope}delegate: {}", event.message),
        ActivityKind::WaitingForUserInput => println!("{scope}question: {}\n> ", event.message),
        ActivityKind::TaskFailed => println!("{scope}failed: {}", event.message),
        ActivityKind::Result | ActivityKind::TaskCompleted | ActivityKind::TaskStatusChanged => {}
    }
}
