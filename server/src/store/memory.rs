use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::AppResult;
use crate::model::{EmailRecord, EmailStatus, ScanTask};
use crate::store::TriageStore;

#[derive(Default)]
struct MemInner {
    tasks: HashMap<Uuid, ScanTask>,
    emails: HashMap<(String, String), EmailRecord>,
    senders: HashMap<(String, String), EmailStatus>,
}

/// In-memory store with the same row-level last-write-wins semantics as the
/// database store. Used by tests and ephemeral runs.
#[derive(Default)]
pub struct MemStore {
    inner: RwLock<MemInner>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TriageStore for MemStore {
    async fn save_task(&self, task: &ScanTask) -> AppResult<()> {
        self.inner
            .write()
            .unwrap()
            .tasks
            .insert(task.id, task.clone());
        Ok(())
    }

    async fn load_task(&self, task_id: Uuid) -> AppResult<Option<ScanTask>> {
        Ok(self.inner.read().unwrap().tasks.get(&task_id).cloned())
    }

    async fn load_tasks(&self, user_id: &str) -> AppResult<Vec<ScanTask>> {
        let inner = self.inner.read().unwrap();
        let mut tasks: Vec<ScanTask> = inner
            .tasks
            .values()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tasks)
    }

    async fn delete_task(&self, task_id: Uuid) -> AppResult<()> {
        self.inner.write().unwrap().tasks.remove(&task_id);
        Ok(())
    }

    async fn upsert_email(&self, user_id: &str, record: &EmailRecord) -> AppResult<()> {
        let key = (user_id.to_string(), record.id.clone());
        let mut inner = self.inner.write().unwrap();
        let confirmed_latch = inner.emails.get(&key).is_some_and(|r| r.confirmed);
        let mut record = record.clone();
        record.confirmed = record.confirmed || confirmed_latch;
        inner.emails.insert(key, record);
        Ok(())
    }

    async fn get_email(&self, user_id: &str, email_id: &str) -> AppResult<Option<EmailRecord>> {
        let key = (user_id.to_string(), email_id.to_string());
        Ok(self.inner.read().unwrap().emails.get(&key).cloned())
    }

    async fn confirm_email(&self, user_id: &str, email_id: &str) -> AppResult<()> {
        let key = (user_id.to_string(), email_id.to_string());
        if let Some(record) = self.inner.write().unwrap().emails.get_mut(&key) {
            record.confirmed = true;
            record.filter_created = true;
        }
        Ok(())
    }

    async fn confirmed_ids(&self, user_id: &str) -> AppResult<HashSet<String>> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .emails
            .iter()
            .filter(|((uid, _), record)| uid == user_id && record.confirmed)
            .map(|((_, id), _)| id.clone())
            .collect())
    }

    async fn unconfirmed_newer_than(
        &self,
        user_id: &str,
        cutoff_millis: i64,
    ) -> AppResult<Vec<EmailRecord>> {
        let inner = self.inner.read().unwrap();
        let mut records: Vec<EmailRecord> = inner
            .emails
            .iter()
            .filter(|((uid, _), record)| {
                uid == user_id && !record.confirmed && record.internal_date >= cutoff_millis
            })
            .map(|(_, record)| record.clone())
            .collect();
        records.sort_by(|a, b| b.internal_date.cmp(&a.internal_date));
        Ok(records)
    }

    async fn upsert_sender_rule(
        &self,
        user_id: &str,
        sender: &str,
        status: EmailStatus,
    ) -> AppResult<()> {
        self.inner
            .write()
            .unwrap()
            .senders
            .insert((user_id.to_string(), sender.to_string()), status);
        Ok(())
    }

    async fn senders_with_status(
        &self,
        user_id: &str,
        status: EmailStatus,
    ) -> AppResult<HashSet<String>> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .senders
            .iter()
            .filter(|((uid, _), s)| uid == user_id && **s == status)
            .map(|((_, sender), _)| sender.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{TaskKind, TaskStage};

    fn record(id: &str, internal_date: i64, confirmed: bool) -> EmailRecord {
        EmailRecord {
            id: id.to_string(),
            subject: "s".to_string(),
            sender: "a@b.c".to_string(),
            date: "d".to_string(),
            internal_date,
            status: EmailStatus::Spam,
            llm_request: None,
            llm_response: None,
            llm_sent: false,
            filter_created: false,
            confirmed,
        }
    }

    #[tokio::test]
    async fn upsert_preserves_confirmed_latch() {
        let store = MemStore::new();
        store.upsert_email("u1", &record("m1", 10, true)).await.unwrap();
        store.upsert_email("u1", &record("m1", 10, false)).await.unwrap();

        let stored = store.get_email("u1", "m1").await.unwrap().unwrap();
        assert!(stored.confirmed);
        assert_eq!(store.confirmed_ids("u1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unconfirmed_newer_than_filters_and_sorts() {
        let store = MemStore::new();
        store.upsert_email("u1", &record("old", 10, false)).await.unwrap();
        store.upsert_email("u1", &record("new", 300, false)).await.unwrap();
        store.upsert_email("u1", &record("mid", 200, false)).await.unwrap();
        store.upsert_email("u1", &record("done", 400, true)).await.unwrap();

        let records = store.unconfirmed_newer_than("u1", 100).await.unwrap();
        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "mid"]);
    }

    #[tokio::test]
    async fn sender_rules_are_last_write_wins() {
        let store = MemStore::new();
        store
            .upsert_sender_rule("u1", "a@b.c", EmailStatus::Whitelist)
            .await
            .unwrap();
        store
            .upsert_sender_rule("u1", "a@b.c", EmailStatus::Spam)
            .await
            .unwrap();

        let spam = store
            .senders_with_status("u1", EmailStatus::Spam)
            .await
            .unwrap();
        assert!(spam.contains("a@b.c"));
        let whitelist = store
            .senders_with_status("u1", EmailStatus::Whitelist)
            .await
            .unwrap();
        assert!(whitelist.is_empty());
    }

    #[tokio::test]
    async fn tasks_load_newest_first() {
        let store = MemStore::new();
        let mut first = ScanTask::new("u1", TaskKind::Scan);
        first.stage = TaskStage::Done;
        store.save_task(&first).await.unwrap();

        let mut second = ScanTask::new("u1", TaskKind::Scan);
        second.created_at = first.created_at + chrono::Duration::seconds(5);
        store.save_task(&second).await.unwrap();

        let tasks = store.load_tasks("u1").await.unwrap();
        assert_eq!(tasks[0].id, second.id);
        assert_eq!(tasks[1].id, first.id);
    }
}
