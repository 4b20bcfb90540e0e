use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use uuid::Uuid;

use crate::error::AppResult;
use crate::model::{ScanTask, TaskStage};
use crate::store::SharedStore;

/// Live table of running and recent tasks, mirrored to the durable store on
/// every mutation so a crash leaves a resumable snapshot.
///
/// Writes against an id that is no longer live (closed or deleted) are
/// silently dropped; that is the only cancellation mechanism.
#[derive(Clone)]
pub struct TaskRegistry {
    live: Arc<RwLock<HashMap<Uuid, ScanTask>>>,
    store: SharedStore,
}

impl TaskRegistry {
    pub fn new(store: SharedStore) -> Self {
        Self {
            live: Arc::new(RwLock::new(HashMap::new())),
            store,
        }
    }

    pub async fn create(&self, task: ScanTask) -> AppResult<Uuid> {
        let id = task.id;
        self.live.write().unwrap().insert(id, task.clone());
        self.store.save_task(&task).await?;
        Ok(id)
    }

    /// Mutate a live task and persist the full snapshot. A miss is a no-op.
    pub async fn update(&self, id: Uuid, f: impl FnOnce(&mut ScanTask)) -> AppResult<()> {
        let snapshot = {
            let mut live = self.live.write().unwrap();
            match live.get_mut(&id) {
                Some(task) => {
                    f(task);
                    task.clone()
                }
                None => return Ok(()),
            }
        };
        self.store.save_task(&snapshot).await
    }

    pub fn get(&self, id: Uuid) -> Option<ScanTask> {
        self.live.read().unwrap().get(&id).cloned()
    }

    /// Live table first, then the durable store; closed tasks stay pollable
    /// until they are deleted.
    pub async fn get_or_load(&self, id: Uuid) -> AppResult<Option<ScanTask>> {
        if let Some(task) = self.get(id) {
            return Ok(Some(task));
        }
        self.store.load_task(id).await
    }

    /// The single most recent non-closed task for a user. Falls back to the
    /// durable store so a restarted process can resume a mid-flight scan.
    pub async fn list_active(&self, user_id: &str) -> AppResult<Option<ScanTask>> {
        let live = {
            let table = self.live.read().unwrap();
            table
                .values()
                .filter(|t| t.user_id == user_id && !t.stage.is_closed())
                .max_by_key(|t| t.created_at)
                .cloned()
        };
        if live.is_some() {
            return Ok(live);
        }

        let stored = self.store.load_tasks(user_id).await?;
        Ok(stored.into_iter().find(|t| !t.stage.is_closed()))
    }

    /// Mark closed and drop from the live table; the durable snapshot
    /// survives until deleted.
    pub async fn close(&self, id: Uuid) -> AppResult<()> {
        let snapshot = {
            let mut live = self.live.write().unwrap();
            live.remove(&id).map(|mut task| {
                task.stage = TaskStage::Closed;
                task
            })
        };
        if let Some(task) = snapshot {
            self.store.save_task(&task).await?;
        }
        Ok(())
    }

    pub async fn delete(&self, id: Uuid) -> AppResult<()> {
        self.live.write().unwrap().remove(&id);
        self.store.delete_task(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TaskKind;
    use crate::store::MemStore;

    fn registry() -> TaskRegistry {
        TaskRegistry::new(Arc::new(MemStore::new()))
    }

    #[tokio::test]
    async fn update_persists_the_full_snapshot() {
        let registry = registry();
        let id = registry
            .create(ScanTask::new("u1", TaskKind::Scan))
            .await
            .unwrap();

        registry
            .update(id, |t| {
                t.stage = TaskStage::Fetching;
                t.total = 7;
            })
            .await
            .unwrap();

        let stored = registry.store.load_task(id).await.unwrap().unwrap();
        assert_eq!(stored.stage, TaskStage::Fetching);
        assert_eq!(stored.total, 7);
    }

    #[tokio::test]
    async fn update_after_close_is_silently_dropped() {
        let registry = registry();
        let id = registry
            .create(ScanTask::new("u1", TaskKind::Scan))
            .await
            .unwrap();
        registry.close(id).await.unwrap();

        registry.update(id, |t| t.progress = 99).await.unwrap();

        let stored = registry.store.load_task(id).await.unwrap().unwrap();
        assert_eq!(stored.stage, TaskStage::Closed);
        assert_eq!(stored.progress, 0);
    }

    #[tokio::test]
    async fn list_active_returns_most_recent_non_closed() {
        let registry = registry();
        let first = registry
            .create(ScanTask::new("u1", TaskKind::Scan))
            .await
            .unwrap();

        let mut newer = ScanTask::new("u1", TaskKind::Scan);
        newer.created_at = registry.get(first).unwrap().created_at + chrono::Duration::seconds(3);
        let second = registry.create(newer).await.unwrap();

        let active = registry.list_active("u1").await.unwrap().unwrap();
        assert_eq!(active.id, second);

        registry.close(second).await.unwrap();
        let active = registry.list_active("u1").await.unwrap().unwrap();
        assert_eq!(active.id, first);
    }

    #[tokio::test]
    async fn list_active_resumes_from_durable_store() {
        let store: SharedStore = Arc::new(MemStore::new());
        let mut task = ScanTask::new("u1", TaskKind::Scan);
        task.stage = TaskStage::Processing;
        task.progress = 3;
        store.save_task(&task).await.unwrap();

        // a fresh registry models a process restart
        let registry = TaskRegistry::new(store);
        let resumed = registry.list_active("u1").await.unwrap().unwrap();
        assert_eq!(resumed.id, task.id);
        assert_eq!(resumed.progress, 3);
    }

    #[tokio::test]
    async fn closed_task_stays_pollable_until_deleted() {
        let registry = registry();
        let id = registry
            .create(ScanTask::new("u1", TaskKind::Scan))
            .await
            .unwrap();
        registry.close(id).await.unwrap();

        assert!(registry.get(id).is_none());
        let polled = registry.get_or_load(id).await.unwrap().unwrap();
        assert_eq!(polled.stage, TaskStage::Closed);

        registry.delete(id).await.unwrap();
        assert!(registry.get_or_load(id).await.unwrap().is_none());
    }
}
