use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::AppResult;
use crate::model::{EmailRecord, EmailStatus, ScanTask};

pub mod db;
pub mod memory;

pub use db::DbStore;
pub use memory::MemStore;

/// Injected repository over the durable task/email/sender rows. Every write
/// is a full-row upsert keyed by task/email/sender identity, which keeps
/// concurrent writers commutative at the row level (last write wins).
#[async_trait]
pub trait TriageStore: Send + Sync {
    /// Upsert the full task snapshot
    async fn save_task(&self, task: &ScanTask) -> AppResult<()>;
    async fn load_task(&self, task_id: Uuid) -> AppResult<Option<ScanTask>>;
    /// All stored tasks for a user, newest first
    async fn load_tasks(&self, user_id: &str) -> AppResult<Vec<ScanTask>>;
    async fn delete_task(&self, task_id: Uuid) -> AppResult<()>;

    /// Upsert a record keyed by (user, message id). The confirmed latch is
    /// never reset by an upsert.
    async fn upsert_email(&self, user_id: &str, record: &EmailRecord) -> AppResult<()>;
    async fn get_email(&self, user_id: &str, email_id: &str) -> AppResult<Option<EmailRecord>>;
    /// Latch confirmed and filter_created for an escalated record
    async fn confirm_email(&self, user_id: &str, email_id: &str) -> AppResult<()>;
    async fn confirmed_ids(&self, user_id: &str) -> AppResult<HashSet<String>>;
    /// Unconfirmed records with a message date at or after the cutoff
    async fn unconfirmed_newer_than(
        &self,
        user_id: &str,
        cutoff_millis: i64,
    ) -> AppResult<Vec<EmailRecord>>;

    /// Last-write-wins upsert keyed by (user, sender)
    async fn upsert_sender_rule(
        &self,
        user_id: &str,
        sender: &str,
        status: EmailStatus,
    ) -> AppResult<()>;
    async fn senders_with_status(
        &self,
        user_id: &str,
        status: EmailStatus,
    ) -> AppResult<HashSet<String>>;
}

pub type SharedStore = Arc<dyn TriageStore>;
