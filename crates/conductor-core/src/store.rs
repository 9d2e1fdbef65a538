use crate::error::{ConductorError, ConductorResult};
use crate::task::Task;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Durable record of tasks.
///
/// The orchestrator is the only writer for a given task id; reads return
/// whole-task snapshots.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Persists a new task.
    async fn create(&self, task: &Task) -> ConductorResult<()>;
    /// Overwrites an existing task.
    async fn update(&self, task: &Task) -> ConductorResult<()>;
    /// Loads a snapshot.
    async fn get(&self, id: Uuid) -> ConductorResult<Option<Task>>;
    /// Ids of every stored task.
    async fn list(&self) -> ConductorResult<Vec<Uuid>>;
}

/// Process-local store.
#[derive(Default)]
pub struct InMemoryTaskStore {
    tasks: RwLock<HashMap<Uuid, Task>>,
}

impl InMemoryTaskStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create(&self, task: &Task) -> ConductorResult<()> {
        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&task.id) {
            return Err(ConductorError::Store(format!("task {} already exists", task.id)));
        }
        tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn update(&self, task: &Task) -> ConductorResult<()> {
        let mut tasks = self.tasks.write().await;
        match tasks.get_mut(&task.id) {
            Some(slot) => {
                *slot = task.clone();
                Ok(())
            }
            None => Err(ConductorError::TaskNotFound(task.id)),
        }
    }

    async fn get(&self, id: Uuid) -> ConductorResult<Option<Task>> {
        Ok(self.tasks.read().await.get(&id).cloned())
    }

    async fn list(&self) -> ConductorResult<Vec<Uuid>> {
        Ok(self.tasks.read().await.keys().copied().collect())
    }
}

/// File-based task store: one pretty-printed JSON file per task.
pub struct FileTaskStore {
    dir: PathBuf,
}

impl FileTaskStore {
    /// Opens (and creates) the store directory.
    pub async fn new(dir: PathBuf) -> ConductorResult<Self> {
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    fn task_path(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    async fn write(&self, task: &Task) -> ConductorResult<()> {
        let json = serde_json::to_string_pretty(task)?;
        // Write-then-rename so readers never observe a half-written file.
        let tmp = self.dir.join(format!("{}.json.tmp", task.id));
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, self.task_path(task.id)).await?;
        Ok(())
    }
}

#[async_trait]
impl TaskStore for FileTaskStore {
    async fn create(&self, task: &Task) -> ConductorResult<()> {
        if tokio::fs::try_exists(self.task_path(task.id)).await? {
            return Err(ConductorError::Store(format!("task {} already exists", task.id)));
        }
        self.write(task).await
    }

    async fn update(&self, task: &Task) -> ConductorResult<()> {
        if !tokio::fs::try_exists(self.task_path(task.id)).await? {
            return Err(ConductorError::TaskNotFound(task.id));
        }
        self.write(task).await
    }

    async fn get(&self, id: Uuid) -> ConductorResult<Option<Task>> {
        let path = self.task_path(id);
        if !tokio::fs::try_exists(&path).await? {
            return Ok(None);
        }
        let data = tokio::fs::read_to_string(path).await?;
        let task: Task = serde_json::from_str(&data)
            .map_err(|e| ConductorError::Store(format!("Failed to parse task {id}: {e}")))?;
        Ok(Some(task))
    }

    async fn list(&self) -> ConductorResult<Vec<Uuid>> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                if let Some(stem) = name.strip_suffix(".json") {
                    if let Ok(id) = Uuid::parse_str(stem) {
                        ids.push(id);
                    }
                }
            }
        }
        Ok(ids)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::task::TaskStatus;

    #[tokio::test]
    async fn test_in_memory_create_get_update() {
        let store = InMemoryTaskStore::new();
        let mut task = Task::new("a", serde_json::json!({"message": "go"}));
        store.create(&task).await.unwrap();

        task.transition(TaskStatus::Running).unwrap();
        store.update(&task).await.unwrap();

        let loaded = store.get(task.id).await.unwrap().unwrap();
        assert_eq!(loaded.status(), TaskStatus::Running);
        assert_eq!(store.list().await.unwrap(), vec![task.id]);
    }

    #[tokio::test]
    async fn test_in_memory_rejects_duplicate_and_unknown() {
        let store = InMemoryTaskStore::new();
        let task = Task::new("a", serde_json::Value::Null);
        store.create(&task).await.unwrap();
        assert!(store.create(&task).await.is_err());

        let other = Task::new("b", serde_json::Value::Null);
        assert!(matches!(
            store.update(&other).await,
            Err(ConductorError::TaskNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_file_store_missing_task() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTaskStore::new(dir.path().join("tasks")).await.unwrap();
        assert!(store.get(Uuid::new_v4()).await.unwrap().is_none());
        assert!(store.list().await.unwrap().is_empty());
    }
}
