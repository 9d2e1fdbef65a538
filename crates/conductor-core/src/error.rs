use crate::task::TaskStatus;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// A convenience `Result` alias using [`ConductorError`].
pub type ConductorResult<T> = Result<T, ConductorError>;

/// Failure reported by a language-model backend.
///
/// Network failures, non-success statuses, malformed bodies, application-level
/// error payloads and timeouts all collapse into this one shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{provider} provider error{}: {message}", status_suffix(*.status))]
pub struct ProviderError {
    /// Identifier of the provider that failed.
    pub provider: String,
    /// HTTP status, when the backend answered at all.
    pub status: Option<u16>,
    /// Human-readable description.
    pub message: String,
    /// Whether the call was abandoned because the provider timeout elapsed.
    #[serde(default)]
    pub timed_out: bool,
}

fn status_suffix(status: Option<u16>) -> String {
    status.map(|s| format!(" (status {s})")).unwrap_or_default()
}

impl ProviderError {
    /// Creates an error without an HTTP status.
    pub fn new(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            status: None,
            message: message.into(),
            timed_out: false,
        }
    }

    /// Attaches the HTTP status the backend answered with.
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Creates a timeout error for the given provider.
    pub fn timeout(provider: impl Into<String>, after_secs: u64) -> Self {
        Self {
            provider: provider.into(),
            status: None,
            message: format!("request timed out after {after_secs}s"),
            timed_out: true,
        }
    }
}

/// Top-level error type for the Conductor engine.
#[derive(Debug, Error)]
pub enum ConductorError {
    /// Unknown agent, unknown or misconfigured provider.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A language-model backend failed.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// The model asked for a tool that is not registered (or not allowed).
    #[error("Tool unavailable: {0}")]
    ToolUnavailable(String),

    /// A tool ran and reported failure.
    #[error("Tool '{tool}' failed: {message}")]
    ToolExecution {
        /// Name of the failing tool.
        tool: String,
        /// The tool's error payload.
        message: String,
    },

    /// The model reply did not parse into a valid action.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// The task ran out of turns.
    #[error("Iteration limit of {limit} turns exceeded")]
    IterationLimitExceeded {
        /// The configured ceiling.
        limit: u32,
    },

    /// An operation is not valid for the task's current status.
    #[error("Invalid state transition for task {task_id}: cannot {operation} while {status}")]
    InvalidStateTransition {
        /// The task the operation targeted.
        task_id: Uuid,
        /// The task's status at the time of the call.
        status: TaskStatus,
        /// What the caller attempted.
        operation: String,
    },

    /// A delegation request was refused (depth, cycle, or not permitted).
    #[error("Delegation error: {0}")]
    Delegation(String),

    /// No task with the given id is known.
    #[error("Task not found: {0}")]
    TaskNotFound(Uuid),

    /// The task store failed.
    #[error("Store error: {0}")]
    Store(String),

    /// The task was cancelled externally.
    #[error("Task {0} was cancelled")]
    Cancelled(Uuid),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConductorError {
    /// The taxonomy bucket this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConductorError::Configuration(_) => ErrorKind::Configuration,
            ConductorError::Provider(_) => ErrorKind::Provider,
            ConductorError::ToolUnavailable(_) => ErrorKind::ToolUnavailable,
            ConductorError::ToolExecution { .. } => ErrorKind::ToolExecution,
            ConductorError::ProtocolViolation(_) => ErrorKind::ProtocolViolation,
            ConductorError::IterationLimitExceeded { .. } => ErrorKind::IterationLimitExceeded,
            ConductorError::InvalidStateTransition { .. } => ErrorKind::InvalidStateTransition,
            ConductorError::Delegation(_) => ErrorKind::Delegation,
            ConductorError::Cancelled(_) => ErrorKind::Cancelled,
            ConductorError::TaskNotFound(_)
            | ConductorError::Store(_)
            | ConductorError::Json(_)
            | ConductorError::Io(_) => ErrorKind::Internal,
        }
    }

    /// Whether the orchestrator recovers from this error by recording an
    /// observation and continuing the loop.
    pub fn is_recoverable(&self) -> bool {
        self.kind().is_recoverable()
    }
}

/// Serializable discriminant of [`ConductorError`], recorded on observations
/// and task failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// See [`ConductorError::Configuration`].
    Configuration,
    /// See [`ConductorError::Provider`].
    Provider,
    /// See [`ConductorError::ToolUnavailable`].
    ToolUnavailable,
    /// See [`ConductorError::ToolExecution`].
    ToolExecution,
    /// See [`ConductorError::ProtocolViolation`].
    ProtocolViolation,
    /// See [`ConductorError::IterationLimitExceeded`].
    IterationLimitExceeded,
    /// See [`ConductorError::InvalidStateTransition`].
    InvalidStateTransition,
    /// See [`ConductorError::Delegation`].
    Delegation,
    /// See [`ConductorError::Cancelled`].
    Cancelled,
    /// Store, serialization and I/O failures.
    Internal,
}

impl ErrorKind {
    /// Per-turn errors are turned into observations; everything else ends the task.
    pub fn is_recoverable(self) -> bool {
        matches!(
            self,
            ErrorKind::Provider
                | ErrorKind::ToolUnavailable
                | ErrorKind::ToolExecution
                | ErrorKind::ProtocolViolation
                | ErrorKind::Delegation
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::Configuration => "ConfigurationError",
            ErrorKind::Provider => "ProviderError",
            ErrorKind::ToolUnavailable => "ToolUnavailableError",
            ErrorKind::ToolExecution => "ToolExecutionError",
            ErrorKind::ProtocolViolation => "ProtocolViolationError",
            ErrorKind::IterationLimitExceeded => "IterationLimitExceeded",
            ErrorKind::InvalidStateTransition => "InvalidStateTransition",
            ErrorKind::Delegation => "DelegationError",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::Internal => "InternalError",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_display_with_status() {
        let err = ProviderError::new("openai", "bad gateway").with_status(502);
        assert_eq!(err.to_string(), "openai provider error (status 502): bad gateway");
    }

    #[test]
    fn test_provider_error_timeout() {
        let err = ProviderError::timeout("ollama", 5);
        assert!(err.timed_out);
        assert!(err.status.is_none());
        assert!(err.to_string().contains("timed out after 5s"));
    }

    #[test]
    fn test_error_kind_mapping() {
        let err: ConductorError = ProviderError::new("claude", "boom").into();
        assert_eq!(err.kind(), ErrorKind::Provider);
        assert!(err.is_recoverable());

        let err = ConductorError::IterationLimitExceeded { limit: 3 };
        assert_eq!(err.kind(), ErrorKind::IterationLimitExceeded);
        assert!(!err.is_recoverable());

        let err = ConductorError::Configuration("unknown agent".into());
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_error_kind_serialization() {
        let json = serde_json::to_string(&ErrorKind::ProtocolViolation).unwrap();
        assert_eq!(json, "\"protocol_violation\"");
        assert_eq!(ErrorKind::ProtocolViolation.to_string(), "ProtocolViolationError");
    }
}
