//! Core types for the Conductor task orchestration engine.
//!
//! This crate holds everything the other Conductor crates share: the error
//! taxonomy, the task state machine and its append-only history, the action
//! schema the model replies with, agent definitions, the activity bus, and
//! the task store interface.
//!
//! # Main types
//!
//! - [`ConductorError`] / [`ConductorResult`] — unified error handling.
//! - [`Task`], [`TaskStatus`], [`Turn`], [`Observation`] — per-task state.
//! - [`Action`] / [`ParsedAction`] — the interpreted model reply.
//! - [`AgentDefinition`], [`AgentDirectory`], [`AgentRegistry`] — agent lookup.
//! - [`ActivityBus`], [`ActivityEvent`] — fire-and-forget status events.
//! - [`TaskStore`], [`InMemoryTaskStore`], [`FileTaskStore`] — persistence.

/// Action schema parsed from model replies.
pub mod action;
/// Activity events and the broadcast bus.
pub mod activity;
/// Agent definitions and permissions.
pub mod agent;
/// Error taxonomy.
pub mod error;
/// Task store interface and implementations.
pub mod store;
/// Task, status state machine and history.
pub mod task;

pub use action::{Action, ParsedAction};
pub use activity::{ActivityBus, ActivityEvent, ActivityKind};
pub use agent::{AgentDefinition, AgentDirectory, AgentRegistry, Permission, PermissionSet};
pub use error::{ConductorError, ConductorResult, ErrorKind, ProviderError};
pub use store::{FileTaskStore, InMemoryTaskStore, TaskStore};
pub use task::{
    Observation, ObservationSource, Task, TaskCounters, TaskFailure, TaskStatus, Turn,
};
