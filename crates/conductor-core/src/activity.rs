use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

/// Discriminant of an [`ActivityEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActivityKind {
    /// A tool was invoked.
    Tool,
    /// A child task was spawned.
    Delegate,
    /// The model produced a final result.
    Result,
    /// The model attached reasoning to its action.
    Thought,
    /// The task is parked until a human answers.
    WaitingForUserInput,
    /// The task completed.
    TaskCompleted,
    /// The task failed.
    TaskFailed,
    /// The task moved between statuses.
    TaskStatusChanged,
}

/// A transient status event for observers (UI, logs, metrics).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEvent {
    /// What happened.
    #[serde(rename = "type")]
    pub kind: ActivityKind,
    /// The task that emitted the event.
    pub task_id: Uuid,
    /// Human-readable summary.
    pub message: String,
    /// Structured details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    /// Emission time.
    pub emitted_at: DateTime<Utc>,
}

impl ActivityEvent {
    /// An event without payload.
    pub fn new(kind: ActivityKind, task_id: Uuid, message: impl Into<String>) -> Self {
        Self {
            kind,
            task_id,
            message: message.into(),
            payload: None,
            emitted_at: Utc::now(),
        }
    }

    /// Attach structured details.
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// Publish/subscribe channel for [`ActivityEvent`]s.
///
/// Publishing never blocks: each subscriber owns a bounded buffer, and a
/// subscriber that falls behind loses the oldest events (it observes
/// `RecvError::Lagged`). Events of one task arrive in emission order.
#[derive(Clone)]
pub struct ActivityBus {
    tx: broadcast::Sender<ActivityEvent>,
}

impl ActivityBus {
    /// Creates a bus whose subscribers buffer up to `capacity` events each.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Registers a new observer.
    pub fn subscribe(&self) -> broadcast::Receiver<ActivityEvent> {
        self.tx.subscribe()
    }

    /// Fire-and-forget publish. Returns how many observers received the event.
    pub fn publish(&self, event: ActivityEvent) -> usize {
        debug!(
            task_id = %event.task_id,
            kind = ?event.kind,
            message = %event.message,
            "Activity"
        );
        self.tx.send(event).unwrap_or(0)
    }

    /// Number of live observers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for ActivityBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::{RecvError, TryRecvError};

    #[test]
    fn test_publish_without_subscribers_is_noop() {
        let bus = ActivityBus::new(4);
        let delivered = bus.publish(ActivityEvent::new(
            ActivityKind::Thought,
            Uuid::new_v4(),
            "thinking",
        ));
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn test_events_arrive_in_order() {
        let bus = ActivityBus::new(16);
        let mut rx = bus.subscribe();
        let task_id = Uuid::new_v4();

        bus.publish(ActivityEvent::new(ActivityKind::Tool, task_id, "first"));
        bus.publish(ActivityEvent::new(ActivityKind::Result, task_id, "second"));

        assert_eq!(rx.recv().await.unwrap().message, "first");
        assert_eq!(rx.recv().await.unwrap().message, "second");
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_slow_subscriber_lags_instead_of_blocking() {
        let bus = ActivityBus::new(2);
        let mut rx = bus.subscribe();
        let task_id = Uuid::new_v4();

        for i in 0..5 {
            bus.publish(ActivityEvent::new(ActivityKind::Thought, task_id, i.to_string()));
        }

        assert!(matches!(rx.recv().await, Err(RecvError::Lagged(3))));
        assert_eq!(rx.recv().await.unwrap().message, "3");
    }

    #[test]
    fn test_event_wire_shape() {
        let event = ActivityEvent::new(
            ActivityKind::WaitingForUserInput,
            Uuid::nil(),
            "need input",
        )
        .with_payload(serde_json::json!({"question": "which port?"}));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "waitingForUserInput");
        assert_eq!(json["taskId"], Uuid::nil().to_string());
        assert_eq!(json["payload"]["question"], "which port?");
    }
}
