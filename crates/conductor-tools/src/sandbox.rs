use async_trait::async_trait;
use conductor_core::{ConductorError, ConductorResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

const SANDBOX: &str = "sandbox";
const MAX_TIMEOUT_SECS: u64 = 300;
const BLOCKED_PATTERNS: [&str; 4] = ["rm -rf /", "mkfs", "dd if=", ":(){ :|:& };:"];
/// Sequencing, piping, substitution and redirection would let a command run
/// programs the allow-list never saw.
const SHELL_CONTROL: [&str; 9] = [";", "&", "|", "`", "$(", ">", "<", "\n", "\r"];

/// Captured result of a finished process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    /// Exit code, `-1` when killed by a signal.
    pub exit_code: i32,
    /// Stdout, possibly truncated.
    pub stdout: String,
    /// Stderr, possibly truncated.
    pub stderr: String,
}

impl CommandOutput {
    /// Whether the process exited with code 0.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs shell commands on behalf of tools.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs `command` with `cwd` as working directory.
    async fn run(&self, command: &str, cwd: &Path) -> ConductorResult<CommandOutput>;
}

/// Limits applied by [`SandboxedCommandRunner`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Program names or command prefixes that may run. Empty denies everything.
    #[serde(default)]
    pub allowed_commands: Vec<String>,
    /// Per-command timeout, capped at 300 seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Stdout bytes kept before truncation.
    #[serde(default = "default_max_stdout")]
    pub max_stdout: usize,
    /// Stderr bytes kept before truncation.
    #[serde(default = "default_max_stderr")]
    pub max_stderr: usize,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_stdout() -> usize {
    50_000
}

fn default_max_stderr() -> usize {
    10_000
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            allowed_commands: Vec::new(),
            timeout_secs: default_timeout_secs(),
            max_stdout: default_max_stdout(),
            max_stderr: default_max_stderr(),
        }
    }
}

impl SandboxConfig {
    /// A config allowing the given programs.
    pub fn allowing<I, S>(commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed_commands: commands.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    fn effective_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.clamp(1, MAX_TIMEOUT_SECS))
    }

    /// Checks `command` against the allow-list and the blocked patterns.
    ///
    /// Only a single simple command passes: any shell control operator is
    /// refused before the allow-list is consulted.
    pub fn check(&self, command: &str) -> ConductorResult<()> {
        let trimmed = command.trim();
        if trimmed.is_empty() {
            return Err(rejected("empty command"));
        }
        if let Some(op) = SHELL_CONTROL.iter().find(|op| trimmed.contains(*op)) {
            warn!(command = %trimmed, operator = %op.escape_debug(), "Shell control operator refused");
            return Err(rejected(format!(
                "command refused: shell operator '{}' is not allowed",
                op.escape_debug()
            )));
        }
        if let Some(pattern) = BLOCKED_PATTERNS.iter().find(|p| trimmed.contains(*p)) {
            warn!(command = %trimmed, "Blocked dangerous command");
            return Err(rejected(format!(
                "command blocked: contains dangerous pattern '{pattern}'"
            )));
        }
        let program = trimmed.split_whitespace().next().unwrap_or_default();
        let program = program.rsplit('/').next().unwrap_or(program);
        let allowed = self.allowed_commands.iter().any(|prefix| {
            prefix == program
                || trimmed == prefix
                || trimmed
                    .strip_prefix(prefix.as_str())
                    .is_some_and(|rest| rest.starts_with(char::is_whitespace))
        });
        if !allowed {
            warn!(command = %trimmed, program, "Command not in allow-list");
            return Err(rejected(format!("command '{program}' is not allowed")));
        }
        Ok(())
    }
}

fn rejected(message: impl Into<String>) -> ConductorError {
    ConductorError::ToolExecution {
        tool: SANDBOX.to_string(),
        message: message.into(),
    }
}

/// Runs allow-listed commands through `sh -c` with a timeout and
/// truncated output. Commands carrying shell control operators never
/// reach the shell.
pub struct SandboxedCommandRunner {
    config: SandboxConfig,
}

impl SandboxedCommandRunner {
    /// Creates a runner enforcing `config`.
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    /// The enforced limits.
    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }
}

#[async_trait]
impl CommandRunner for SandboxedCommandRunner {
    async fn run(&self, command: &str, cwd: &Path) -> ConductorResult<CommandOutput> {
        self.config.check(command)?;
        let timeout = self.config.effective_timeout();
        info!(command = %command, cwd = %cwd.display(), timeout_secs = timeout.as_secs(), "Executing command");

        let child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(cwd)
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(timeout, child).await {
            Ok(Ok(output)) => Ok(CommandOutput {
                exit_code: output.status.code().unwrap_or(-1),
                stdout: truncate_output(
                    &String::from_utf8_lossy(&output.stdout),
                    self.config.max_stdout,
                ),
                stderr: truncate_output(
                    &String::from_utf8_lossy(&output.stderr),
                    self.config.max_stderr,
                ),
            }),
            Ok(Err(e)) => Err(rejected(format!("failed to execute command: {e}"))),
            Err(_) => {
                warn!(command = %command, "Command timed out");
                Err(rejected(format!(
                    "command timed out after {}s",
                    timeout.as_secs()
                )))
            }
        }
    }
}

/// Runner handed to agents without the terminal permission.
pub struct DeniedCommandRunner;

#[async_trait]
impl CommandRunner for DeniedCommandRunner {
    async fn run(&self, command: &str, _cwd: &Path) -> ConductorResult<CommandOutput> {
        warn!(command = %command, "Command execution denied for agent");
        Err(rejected("agent is not permitted to run commands"))
    }
}

fn truncate_output(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... [truncated, {} total bytes]", &s[..end], s.len())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_allow_list_denies() {
        let config = SandboxConfig::default();
        assert!(config.check("echo hi").is_err());
    }

    #[test]
    fn test_allow_list_matches_program() {
        let config = SandboxConfig::allowing(["echo", "cargo"]);
        assert!(config.check("echo hi").is_ok());
        assert!(config.check("/bin/echo hi").is_ok());
        assert!(config.check("cargo test --all").is_ok());
        assert!(config.check("curl example.com").is_err());
        assert!(config.check("   ").is_err());
    }

    #[test]
    fn test_allow_list_prefixes() {
        let config = SandboxConfig::allowing(["git status"]);
        assert!(config.check("git status --short").is_ok());
        assert!(config.check("git push").is_err());
        assert!(config.check("git statusx").is_err());
    }

    #[test]
    fn test_blocked_patterns_win_over_allow_list() {
        let config = SandboxConfig::allowing(["rm", "dd"]);
        assert!(config.check("rm -rf /").is_err());
        assert!(config.check("dd if=/dev/zero of=x").is_err());
    }

    #[test]
    fn test_shell_control_operators_refused() {
        let config = SandboxConfig::allowing(["echo", "cargo test"]);
        for command in [
            "echo hi; touch pwned",
            "echo hi && rm -r ~",
            "echo hi || true",
            "echo hi | sh",
            "echo $(curl example.com)",
            "echo `id`",
            "echo hi > out.txt",
            "echo < /etc/passwd",
            "echo hi\ntouch pwned",
            "cargo test & curl example.com",
        ] {
            let err = config.check(command).unwrap_err();
            assert!(
                err.to_string().contains("shell operator"),
                "expected refusal for {command:?}"
            );
        }
        assert!(config.check("echo 'plain args' -n").is_ok());
    }

    #[tokio::test]
    async fn test_chained_command_never_runs() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("pwned");
        let runner = SandboxedCommandRunner::new(SandboxConfig::allowing(["echo"]));
        let command = format!("echo hi; touch {}", marker.display());
        assert!(runner.run(&command, dir.path()).await.is_err());
        assert!(!marker.exists());
    }

    #[test]
    fn test_timeout_is_capped() {
        let config = SandboxConfig {
            timeout_secs: 10_000,
            ..SandboxConfig::default()
        };
        assert_eq!(config.effective_timeout(), Duration::from_secs(300));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let s = "ééé";
        let out = truncate_output(s, 3);
        assert!(out.starts_with('é'));
        assert!(out.contains("truncated, 6 total bytes"));
        assert_eq!(truncate_output("short", 10), "short");
    }

    #[tokio::test]
    async fn test_runs_allowed_command() {
        let runner = SandboxedCommandRunner::new(SandboxConfig::allowing(["echo"]));
        let out = runner.run("echo hello", Path::new(".")).await.unwrap();
        assert!(out.success());
        assert!(out.stdout.contains("hello"));
    }

    #[tokio::test]
    async fn test_timeout_kills_command() {
        let runner = SandboxedCommandRunner::new(SandboxConfig {
            timeout_secs: 1,
            ..SandboxConfig::allowing(["sleep"])
        });
        let err = runner.run("sleep 10", Path::new(".")).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_denied_runner() {
        let err = DeniedCommandRunner
            .run("echo hi", Path::new("."))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not permitted"));
    }
}
