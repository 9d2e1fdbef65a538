use crate::error::{ConductorError, ConductorResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// A coarse capability an agent may hold.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    /// Edit source code.
    CodeEdit,
    /// Run external commands.
    Terminal,
    /// Read files under the project root.
    FileSystem,
    /// Reach the network.
    Network,
    /// Create, move or delete workspace files.
    WorkspaceModification,
}

/// The permission booleans of an agent definition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionSet {
    /// See [`Permission::CodeEdit`].
    #[serde(default)]
    pub code_edit: bool,
    /// See [`Permission::Terminal`].
    #[serde(default)]
    pub terminal: bool,
    /// See [`Permission::FileSystem`].
    #[serde(default)]
    pub file_system: bool,
    /// See [`Permission::Network`].
    #[serde(default)]
    pub network: bool,
    /// See [`Permission::WorkspaceModification`].
    #[serde(default)]
    pub workspace_modification: bool,
}

impl PermissionSet {
    /// A set with every permission granted.
    pub fn all() -> Self {
        Self {
            code_edit: true,
            terminal: true,
            file_system: true,
            network: true,
            workspace_modification: true,
        }
    }

    /// Grants one permission.
    pub fn grant(mut self, permission: Permission) -> Self {
        *self.slot(permission) = true;
        self
    }

    /// Whether `permission` is held.
    pub fn has(&self, permission: Permission) -> bool {
        match permission {
            Permission::CodeEdit => self.code_edit,
            Permission::Terminal => self.terminal,
            Permission::FileSystem => self.file_system,
            Permission::Network => self.network,
            Permission::WorkspaceModification => self.workspace_modification,
        }
    }

    /// Every permission in `required` that is not held.
    pub fn missing(&self, required: &[Permission]) -> Vec<Permission> {
        required.iter().copied().filter(|p| !self.has(*p)).collect()
    }

    fn slot(&mut self, permission: Permission) -> &mut bool {
        match permission {
            Permission::CodeEdit => &mut self.code_edit,
            Permission::Terminal => &mut self.terminal,
            Permission::FileSystem => &mut self.file_system,
            Permission::Network => &mut self.network,
            Permission::WorkspaceModification => &mut self.workspace_modification,
        }
    }
}

/// Static description of an agent, loaded once and read-only afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDefinition {
    /// Unique agent name.
    pub name: String,
    /// What the agent is for.
    #[serde(default)]
    pub description: String,
    /// Role label shown in prompts.
    #[serde(default)]
    pub role: String,
    /// Capabilities granted to the agent's tool calls.
    #[serde(default)]
    pub permissions: PermissionSet,
    /// Tools the agent may call. Empty means every registered tool.
    #[serde(default)]
    pub tools: Vec<String>,
    /// Agents this one may delegate to. Empty means any other agent.
    #[serde(default)]
    pub delegates_to: Vec<String>,
    /// Provider override; the router default applies when absent.
    #[serde(default)]
    pub provider: Option<String>,
    /// Model override within the provider.
    #[serde(default)]
    pub model: Option<String>,
    /// Free-form capability tags.
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    /// Prompt template rendered every turn.
    #[serde(default)]
    pub prompt_template: String,
}

impl AgentDefinition {
    /// A definition with the given name and nothing else set.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            role: String::new(),
            permissions: PermissionSet::default(),
            tools: Vec::new(),
            delegates_to: Vec::new(),
            provider: None,
            model: None,
            capabilities: BTreeSet::new(),
            prompt_template: String::new(),
        }
    }

    /// Whether the agent may call `tool`.
    pub fn allows_tool(&self, tool: &str) -> bool {
        self.tools.is_empty() || self.tools.iter().any(|t| t == tool)
    }

    /// Whether the agent may delegate to `agent`.
    pub fn allows_delegate(&self, agent: &str) -> bool {
        self.delegates_to.is_empty() || self.delegates_to.iter().any(|a| a == agent)
    }
}

/// Read-only lookup of agent definitions.
pub trait AgentDirectory: Send + Sync {
    /// Finds a definition by name.
    fn get(&self, name: &str) -> Option<Arc<AgentDefinition>>;

    /// All definitions, sorted by name.
    fn list(&self) -> Vec<Arc<AgentDefinition>>;
}

/// In-memory [`AgentDirectory`], built once at startup.
#[derive(Default)]
pub struct AgentRegistry {
    agents: HashMap<String, Arc<AgentDefinition>>,
}

impl AgentRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a definition, replacing any previous one with the same name.
    pub fn register(&mut self, agent: AgentDefinition) {
        info!(agent = %agent.name, "Registered agent");
        if let Some(previous) = self.agents.insert(agent.name.clone(), Arc::new(agent)) {
            warn!(agent = %previous.name, "Agent definition replaced");
        }
    }

    /// Builder-style [`AgentRegistry::register`].
    pub fn with_agent(mut self, agent: AgentDefinition) -> Self {
        self.register(agent);
        self
    }

    /// Loads every `*.json` file in `dir` as an [`AgentDefinition`].
    pub async fn load_dir(dir: &Path) -> ConductorResult<Self> {
        let mut registry = Self::new();
        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let data = tokio::fs::read_to_string(&path).await?;
            let agent: AgentDefinition = serde_json::from_str(&data).map_err(|e| {
                ConductorError::Configuration(format!(
                    "invalid agent definition {}: {e}",
                    path.display()
                ))
            })?;
            registry.register(agent);
        }
        Ok(registry)
    }

    /// Number of registered agents.
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// Whether no agents are registered.
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

impl AgentDirectory for AgentRegistry {
    fn get(&self, name: &str) -> Option<Arc<AgentDefinition>> {
        self.agents.get(name).cloned()
    }

    fn list(&self) -> Vec<Arc<AgentDefinition>> {
        let mut agents: Vec<_> = self.agents.values().cloned().collect();
        agents.sort_by(|a, b| a.name.cmp(&b.name));
        agents
    }
}
