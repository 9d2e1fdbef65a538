use conductor_core::{AgentDefinition, ObservationSource, Task, Turn};
use conductor_tools::ToolDescriptor;
use std::sync::Arc;

const DEFAULT_TEMPLATE: &str = "You are {{agent}}. {{role}}\n\n## Request\n{{request}}";

const ACTION_INSTRUCTIONS: &str = "## Response format\n\
Respond with a single JSON object and nothing else. Use exactly one of these forms:\n\
{\"thought\": \"<reasoning>\", \"tool\": \"<tool name>\", \"args\": {<arguments>}}\n\
{\"thought\": \"<reasoning>\", \"delegate\": \"<agent name>\", \"request\": \"<what the agent should do>\"}\n\
{\"thought\": \"<reasoning>\", \"result\": <final answer>}";

/// Everything a prompt is rendered from.
pub struct PromptInput<'a> {
    /// Agent whose template is rendered.
    pub agent: &'a AgentDefinition,
    /// Task supplying the request and history.
    pub task: &'a Task,
    /// Tools the agent may call, in registration order.
    pub tools: Vec<&'a ToolDescriptor>,
    /// Agents the agent may delegate to.
    pub delegates: Vec<Arc<AgentDefinition>>,
    /// Most recent turns to include.
    pub history_window: usize,
}

/// Renders the agent template, filling `{{agent}}`, `{{role}}`,
/// `{{request}}`, `{{tools}}`, `{{agents}}` and `{{history}}`.
///
/// Sections whose placeholder the template omits are appended under a
/// heading; the response-format instructions always come last.
pub fn render_prompt(input: &PromptInput<'_>) -> String {
    let template = if input.agent.prompt_template.trim().is_empty() {
        DEFAULT_TEMPLATE
    } else {
        input.agent.prompt_template.as_str()
    };

    let role = if input.agent.role.is_empty() {
        input.agent.description.clone()
    } else {
        input.agent.role.clone()
    };

    let sections = [
        ("request", "Request", render_request(&input.task.request)),
        ("tools", "Available tools", render_tools(&input.tools)),
        ("agents", "Agents you can delegate to", render_agents(&input.delegates)),
        (
            "history",
            "History",
            render_history(input.task.history(), input.history_window),
        ),
    ];

    let mut prompt = fill(template, |name| match name {
        "agent" => Some(input.agent.name.as_str()),
        "role" => Some(role.as_str()),
        _ => sections
            .iter()
            .find(|(key, _, _)| *key == name)
            .map(|(_, _, content)| content.as_str()),
    });
    for (key, heading, content) in &sections {
        if !template.contains(&format!("{{{{{key}}}}}")) {
            prompt.push_str(&format!("\n\n## {heading}\n{content}"));
        }
    }
    prompt.push_str("\n\n");
    prompt.push_str(ACTION_INSTRUCTIONS);
    prompt
}

/// Replaces each `{{name}}` in one pass over `template`. Substituted text is
/// never rescanned; unknown names stay as written.
fn fill<'v>(template: &str, value: impl Fn(&str) -> Option<&'v str>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after = &rest[open + 2..];
        match after.find("}}").and_then(|close| Some((close, value(&after[..close])?))) {
            Some((close, text)) => {
                out.push_str(text);
                rest = &after[close + 2..];
            }
            None => {
                out.push_str("{{");
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

fn render_request(request: &serde_json::Value) -> String {
    match request {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Object(obj) if obj.len() == 1 => match obj.get("message") {
            Some(serde_json::Value::String(s)) => s.clone(),
            _ => pretty(request),
        },
        other => pretty(other),
    }
}

fn pretty(value: &serde_json::Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

fn render_tools(tools: &[&ToolDescriptor]) -> String {
    if tools.is_empty() {
        return "(none)".to_string();
    }
    tools
        .iter()
        .map(|t| format!("- {}: {}\n  args schema: {}", t.name, t.description, t.input_schema))
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_agents(agents: &[Arc<AgentDefinition>]) -> String {
    if agents.is_empty() {
        return "(none)".to_string();
    }
    agents
        .iter()
        .map(|a| {
            if a.description.is_empty() {
                format!("- {}", a.name)
            } else {
                format!("- {}: {}", a.name, a.description)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_history(history: &[Turn], window: usize) -> String {
    let start = history.len().saturating_sub(window);
    let lines: Vec<String> = history[start..]
        .iter()
        .flat_map(render_turn)
        .collect();
    if lines.is_empty() {
        "(no previous turns)".to_string()
    } else {
        lines.join("\n")
    }
}

fn render_turn(turn: &Turn) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(reply) = &turn.reply {
        lines.push(format!("[{}] You replied: {}", turn.sequence, reply.trim()));
    }
    if let Some(obs) = &turn.observation {
        let source = match &obs.source {
            ObservationSource::Tool { name } => format!("tool {name}"),
            ObservationSource::Delegation { agent, .. } => format!("agent {agent}"),
            ObservationSource::User => "user".to_string(),
            ObservationSource::Orchestrator => "orchestrator".to_string(),
            ObservationSource::Result => "result".to_string(),
        };
        match obs.error {
            Some(kind) => lines.push(format!(
                "[{}] Error from {source} ({kind}): {}",
                turn.sequence, obs.content
            )),
            None => lines.push(format!("[{}] Observation from {source}: {}", turn.sequence, obs.content)),
        }
    }
    lines
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use conductor_core::{ErrorKind, Observation, TaskStatus};

    fn agent() -> AgentDefinition {
        let mut agent = AgentDefinition::new("DeveloperAgent");
        agent.role = "You write Rust code.".into();
        agent
    }

    #[test]
    fn test_default_template_appends_sections() {
        let agent = agent();
        let task = Task::new("DeveloperAgent", serde_json::json!({"message": "add a health endpoint"}));
        let descriptor = ToolDescriptor::new("code.generate", "Generate code");
        let prompt = render_prompt(&PromptInput {
            agent: &agent,
            task: &task,
            tools: vec![&descriptor],
            delegates: vec![],
            history_window: 20,
        });
        assert!(prompt.starts_with("You are DeveloperAgent. You write Rust code."));
        assert!(prompt.contains("add a health endpoint"));
        assert!(prompt.contains("## Available tools\n- code.generate: Generate code"));
        assert!(prompt.contains("## Agents you can delegate to\n(none)"));
        assert!(prompt.contains("(no previous turns)"));
        assert!(prompt.ends_with(ACTION_INSTRUCTIONS));
    }

    #[test]
    fn test_custom_template_placeholders() {
        let mut agent = agent();
        agent.prompt_template = "Agent {{agent}} handles: {{request}}\nTools:\n{{tools}}".into();
        let task = Task::new("DeveloperAgent", serde_json::json!("fix the build"));
        let prompt = render_prompt(&PromptInput {
            agent: &agent,
            task: &task,
            tools: vec![],
            delegates: vec![Arc::new(AgentDefinition::new("TesterAgent"))],
            history_window: 20,
        });
        assert!(prompt.starts_with("Agent DeveloperAgent handles: fix the build\nTools:\n(none)"));
        assert!(!prompt.contains("## Request"));
        assert!(prompt.contains("## Agents you can delegate to\n- TesterAgent"));
        assert!(prompt.contains("## History"));
    }

    #[test]
    fn test_substituted_text_is_not_expanded_again() {
        let mut agent = agent();
        agent.prompt_template = "{{request}}\n{{history}}\n{{unknown}}".into();
        let task = Task::new(
            "DeveloperAgent",
            serde_json::json!("print {{history}} and {{tools}} literally"),
        );
        let prompt = render_prompt(&PromptInput {
            agent: &agent,
            task: &task,
            tools: vec![],
            delegates: vec![],
            history_window: 20,
        });
        assert!(prompt.starts_with(
            "print {{history}} and {{tools}} literally\n(no previous turns)\n{{unknown}}"
        ));
        assert_eq!(prompt.matches("(no previous turns)").count(), 1);
    }

    #[test]
    fn test_fill_leaves_unclosed_braces() {
        let out = fill("a {{agent}} b {{ c", |name| (name == "agent").then_some("X"));
        assert_eq!(out, "a X b {{ c");
    }

    #[test]
    fn test_history_window() {
        let agent = agent();
        let mut task = Task::new("DeveloperAgent", serde_json::json!("x"));
        task.transition(TaskStatus::Running).unwrap();
        for i in 0..5 {
            task.append(Turn::observation_only(Observation::diagnostic(
                ErrorKind::Provider,
                format!("failure {i}"),
            )))
            .unwrap();
        }
        let prompt = render_prompt(&PromptInput {
            agent: &agent,
            task: &task,
            tools: vec![],
            delegates: vec![],
            history_window: 2,
        });
        assert!(!prompt.contains("failure 2"));
        assert!(prompt.contains("failure 3"));
        assert!(prompt.contains("[4] Error from orchestrator (ProviderError): failure 4"));
    }
}
