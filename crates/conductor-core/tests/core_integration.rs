#![allow(clippy::unwrap_used, clippy::expect_used)]

use conductor_core::*;
use uuid::Uuid;

fn sample_task() -> Task {
    let mut task = Task::new(
        "DeveloperAgent",
        serde_json::json!({"message": "add a health endpoint"}),
    )
    .with_parent(Uuid::new_v4(), 1);
    task.transition(TaskStatus::Running).unwrap();
    task.append(
        Turn::model(1, "prompt one")
            .with_reply(r#"{"tool": "code.generate", "args": {"path": "src/health.rs"}}"#)
            .with_action(ParsedAction {
                action: Action::ToolCall {
                    tool: "code.generate".into(),
                    args: serde_json::json!({"path": "src/health.rs"}),
                },
                thought: Some("need a handler".into()),
            })
            .with_observation(Observation::tool("code.generate", "fn health() {}")),
    )
    .unwrap();
    task.counters.tool_calls = 1;
    task.append(Turn::observation_only(Observation::diagnostic(
        ErrorKind::Provider,
        "ollama provider error: connection refused",
    )))
    .unwrap();
    task.record_error();
    task.append(
        Turn::model(2, "prompt two")
            .with_reply(r#"{"result": "done"}"#)
            .with_action(ParsedAction {
                action: Action::FinalResult {
                    result: serde_json::json!("done"),
                },
                thought: None,
            })
            .with_observation(Observation::result("done")),
    )
    .unwrap();
    task.complete(serde_json::json!("done")).unwrap();
    task
}

// ---------------------------------------------------------------------------
// 1. Task round-trips through the file store unchanged
// ---------------------------------------------------------------------------

#[tokio::test]
async fn file_store_roundtrip_preserves_history_and_status() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileTaskStore::new(dir.path().to_path_buf()).await.unwrap();
    let task = sample_task();

    store.create(&task).await.unwrap();
    let loaded = store.get(task.id).await.unwrap().unwrap();

    assert_eq!(loaded.status(), TaskStatus::Completed);
    assert_eq!(loaded.history(), task.history());
    assert_eq!(loaded, task);
    assert_eq!(store.list().await.unwrap(), vec![task.id]);
}

#[tokio::test]
async fn in_memory_store_returns_snapshots() {
    let store = InMemoryTaskStore::new();
    let mut task = Task::new("TesterAgent", serde_json::json!("run tests"));
    store.create(&task).await.unwrap();

    let snapshot = store.get(task.id).await.unwrap().unwrap();
    task.transition(TaskStatus::Running).unwrap();

    // The earlier snapshot is unaffected by later local mutation.
    assert_eq!(snapshot.status(), TaskStatus::Pending);
    store.update(&task).await.unwrap();
    assert_eq!(
        store.get(task.id).await.unwrap().unwrap().status(),
        TaskStatus::Running
    );
}

// ---------------------------------------------------------------------------
// 2. Terminality and append-only history
// ---------------------------------------------------------------------------

#[test]
fn completed_task_rejects_further_mutation() {
    let mut task = sample_task();
    let before = task.history().to_vec();

    assert!(task.transition(TaskStatus::Running).is_err());
    assert!(task
        .append(Turn::observation_only(Observation::user_input("late")))
        .is_err());
    assert_eq!(task.history(), before.as_slice());
    assert_eq!(task.status(), TaskStatus::Completed);
}

#[test]
fn history_sequence_is_contiguous() {
    let task = sample_task();
    for (i, turn) in task.history().iter().enumerate() {
        assert_eq!(turn.sequence as usize, i);
    }
}

// ---------------------------------------------------------------------------
// 3. Error display
// ---------------------------------------------------------------------------

#[test]
fn invalid_state_transition_display() {
    let id = Uuid::nil();
    let err = ConductorError::InvalidStateTransition {
        task_id: id,
        status: TaskStatus::Running,
        operation: "resolve user input".into(),
    };
    assert_eq!(
        err.to_string(),
        format!("Invalid state transition for task {id}: cannot resolve user input while running")
    );
    assert_eq!(err.kind(), ErrorKind::InvalidStateTransition);
}
