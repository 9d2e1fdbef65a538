//! Interprets a raw model reply as exactly one [`Action`].
//!
//! The reply must contain a JSON object carrying exactly one of `tool`,
//! `delegate` or `result`, optionally with a `thought`. The object may be
//! wrapped in a fenced code block or surrounded by prose.

use conductor_core::{Action, ConductorError, ConductorResult, ParsedAction};
use regex::Regex;
use serde_json::Value;

const ACTION_KEYS: [&str; 3] = ["tool", "delegate", "result"];

/// Parses `reply`, failing with a protocol violation when it does not
/// describe a single valid action.
pub fn parse_action(reply: &str) -> ConductorResult<ParsedAction> {
    let value = extract_json(reply).ok_or_else(|| {
        ConductorError::ProtocolViolation("reply does not contain a JSON object".to_string())
    })?;
    let Value::Object(obj) = value else {
        return Err(violation("reply is not a JSON object"));
    };

    let present: Vec<&str> = ACTION_KEYS
        .iter()
        .copied()
        .filter(|k| obj.contains_key(*k))
        .collect();
    let key = match present.as_slice() {
        [key] => *key,
        [] => return Err(violation("reply has none of 'tool', 'delegate', 'result'")),
        _ => {
            return Err(violation(&format!(
                "reply carries more than one action: {}",
                present.join(", ")
            )))
        }
    };

    let thought = obj
        .get("thought")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from);

    let action = match key {
        "tool" => {
            let tool = non_empty_str(&obj, "tool")?;
            let args = match obj.get("args").or_else(|| obj.get("arguments")) {
                None | Some(Value::Null) => Value::Object(Default::default()),
                Some(args) => args.clone(),
            };
            Action::ToolCall { tool, args }
        }
        "delegate" => {
            let agent = non_empty_str(&obj, "delegate")?;
            let request = obj
                .get("request")
                .or_else(|| obj.get("message"))
                .filter(|r| !r.is_null())
                .cloned()
                .ok_or_else(|| violation("'delegate' requires a 'request'"))?;
            Action::Delegate { agent, request }
        }
        _ => Action::FinalResult {
            result: obj.get("result").cloned().unwrap_or(Value::Null),
        },
    };

    Ok(ParsedAction { action, thought })
}

fn violation(message: &str) -> ConductorError {
    ConductorError::ProtocolViolation(message.to_string())
}

fn non_empty_str(obj: &serde_json::Map<String, Value>, key: &str) -> ConductorResult<String> {
    obj.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .ok_or_else(|| violation(&format!("'{key}' must be a non-empty string")))
}

/// Finds the JSON payload: a fenced block first, then the whole reply, then
/// the outermost braces.
fn extract_json(reply: &str) -> Option<Value> {
    let trimmed = reply.trim();

    if let Ok(re) = Regex::new(r"(?s)```(?:json)?\s*(.*?)```") {
        if let Some(inner) = re.captures(trimmed).and_then(|c| c.get(1)) {
            if let Ok(value) = serde_json::from_str(inner.as_str().trim()) {
                return Some(value);
            }
        }
    }

    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&trimmed[start..=end]).ok()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_call_with_thought() {
        let parsed = parse_action(
            r#"{"thought": "need the handler", "tool": "code.generate", "args": {"path": "src/health.rs"}}"#,
        )
        .unwrap();
        assert_eq!(parsed.thought.as_deref(), Some("need the handler"));
        assert_eq!(
            parsed.action,
            Action::ToolCall {
                tool: "code.generate".into(),
                args: serde_json::json!({"path": "src/health.rs"}),
            }
        );
    }

    #[test]
    fn test_tool_call_without_args() {
        let parsed = parse_action(r#"{"tool": "fs.list"}"#).unwrap();
        assert_eq!(
            parsed.action,
            Action::ToolCall {
                tool: "fs.list".into(),
                args: serde_json::json!({}),
            }
        );
    }

    #[test]
    fn test_fenced_block() {
        let reply = "Sure, here you go:\n```json\n{\"result\": \"done\"}\n```\n";
        let parsed = parse_action(reply).unwrap();
        assert_eq!(
            parsed.action,
            Action::FinalResult {
                result: serde_json::json!("done")
            }
        );
    }

    #[test]
    fn test_prose_around_object() {
        let reply = "I will delegate. {\"delegate\": \"TesterAgent\", \"message\": \"run tests\"} ok";
        let parsed = parse_action(reply).unwrap();
        assert_eq!(
            parsed.action,
            Action::Delegate {
                agent: "TesterAgent".into(),
                request: serde_json::json!("run tests"),
            }
        );
    }

    #[test]
    fn test_structured_result() {
        let parsed = parse_action(r#"{"result": {"files": 2, "ok": true}}"#).unwrap();
        assert_eq!(
            parsed.action,
            Action::FinalResult {
                result: serde_json::json!({"files": 2, "ok": true})
            }
        );
    }

    #[test]
    fn test_violations() {
        for reply in [
            "not json at all",
            "{\"tool\": ",
            "[1, 2, 3]",
            r#"{"thought": "hmm"}"#,
            r#"{"tool": "a", "result": "b"}"#,
            r#"{"tool": ""}"#,
            r#"{"tool": 42}"#,
            r#"{"delegate": "TesterAgent"}"#,
        ] {
            let err = parse_action(reply).unwrap_err();
            assert!(
                matches!(err, ConductorError::ProtocolViolation(_)),
                "expected violation for {reply}"
            );
        }
    }
}
