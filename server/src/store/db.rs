use std::collections::HashSet;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{ActiveValue::Set, Value};
use uuid::Uuid;

use crate::db_core::prelude::*;
use crate::error::{AppError, AppResult};
use crate::model;
use crate::store::TriageStore;

/// sea-orm implementation of the triage store
#[derive(Clone)]
pub struct DbStore {
    conn: DatabaseConnection,
}

impl DbStore {
    pub fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }
}

fn task_from_row(row: scan_task::Model) -> AppResult<model::ScanTask> {
    let stage = row
        .stage
        .parse::<model::TaskStage>()
        .map_err(|e| AppError::Internal(anyhow!("Invalid stored stage: {}", e)))?;

    Ok(model::ScanTask {
        id: row.id,
        user_id: row.user_id,
        kind: row.kind,
        stage,
        progress: row.progress.max(0) as usize,
        total: row.total.max(0) as usize,
        emails: serde_json::from_value(row.emails)?,
        log: serde_json::from_value(row.log)?,
        created_at: row.created_at.to_utc(),
    })
}

fn record_from_row(row: email_record::Model) -> model::EmailRecord {
    model::EmailRecord {
        id: row.id,
        subject: row.subject,
        sender: row.sender,
        date: row.date,
        internal_date: row.internal_date,
        status: row.status,
        llm_request: row.llm_request,
        llm_response: row.llm_response,
        llm_sent: row.llm_sent,
        filter_created: row.filter_created,
        confirmed: row.confirmed,
    }
}

#[async_trait]
impl TriageStore for DbStore {
    async fn save_task(&self, task: &model::ScanTask) -> AppResult<()> {
        let now = Utc::now().fixed_offset();
        let row = scan_task::ActiveModel {
            id: Set(task.id),
            user_id: Set(task.user_id.clone()),
            kind: Set(task.kind),
            stage: Set(task.stage.to_string()),
            progress: Set(task.progress as i32),
            total: Set(task.total as i32),
            emails: Set(serde_json::to_value(&task.emails)?),
            log: Set(serde_json::to_value(&task.log)?),
            created_at: Set(task.created_at.fixed_offset()),
            updated_at: Set(now),
        };

        ScanTask::insert(row)
            .on_conflict(
                OnConflict::column(scan_task::Column::Id)
                    .update_columns([
                        scan_task::Column::Stage,
                        scan_task::Column::Progress,
                        scan_task::Column::Total,
                        scan_task::Column::Emails,
                        scan_task::Column::Log,
                        scan_task::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec(&self.conn)
            .await?;

        Ok(())
    }

    async fn load_task(&self, task_id: Uuid) -> AppResult<Option<model::ScanTask>> {
        let row = ScanTask::find_by_id(task_id).one(&self.conn).await?;
        row.map(task_from_row).transpose()
    }

    async fn load_tasks(&self, user_id: &str) -> AppResult<Vec<model::ScanTask>> {
        let rows = ScanTask::find()
            .filter(scan_task::Column::UserId.eq(user_id))
            .order_by(scan_task::Column::CreatedAt, Order::Desc)
            .all(&self.conn)
            .await?;

        rows.into_iter().map(task_from_row).collect()
    }

    async fn delete_task(&self, task_id: Uuid) -> AppResult<()> {
        ScanTask::delete_by_id(task_id).exec(&self.conn).await?;
        Ok(())
    }

    async fn upsert_email(&self, user_id: &str, record: &model::EmailRecord) -> AppResult<()> {
        let row = email_record::ActiveModel {
            user_id: Set(user_id.to_string()),
            id: Set(record.id.clone()),
            subject: Set(record.subject.clone()),
            sender: Set(record.sender.clone()),
            date: Set(record.date.clone()),
            internal_date: Set(record.internal_date),
            status: Set(record.status.clone()),
            llm_request: Set(record.llm_request.clone()),
            llm_response: Set(record.llm_response.clone()),
            llm_sent: Set(record.llm_sent),
            filter_created: Set(record.filter_created),
            confirmed: Set(record.confirmed),
            updated_at: Set(Utc::now().fixed_offset()),
        };

        // confirmed stays out of the update set so the latch survives
        // re-processing
        EmailRecord::insert(row)
            .on_conflict(
                OnConflict::columns([email_record::Column::UserId, email_record::Column::Id])
                    .update_columns([
                        email_record::Column::Subject,
                        email_record::Column::Sender,
                        email_record::Column::Date,
                        email_record::Column::InternalDate,
                        email_record::Column::Status,
                        email_record::Column::LlmRequest,
                        email_record::Column::LlmResponse,
                        email_record::Column::LlmSent,
                        email_record::Column::FilterCreated,
                        email_record::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec(&self.conn)
            .await?;

        Ok(())
    }

    async fn get_email(
        &self,
        user_id: &str,
        email_id: &str,
    ) -> AppResult<Option<model::EmailRecord>> {
        let row = EmailRecord::find_by_id((user_id.to_string(), email_id.to_string()))
            .one(&self.conn)
            .await?;

        Ok(row.map(record_from_row))
    }

    async fn confirm_email(&self, user_id: &str, email_id: &str) -> AppResult<()> {
        EmailRecord::update_many()
            .col_expr(email_record::Column::Confirmed, Value::Bool(Some(true)).into())
            .col_expr(
                email_record::Column::FilterCreated,
                Value::Bool(Some(true)).into(),
            )
            .filter(email_record::Column::UserId.eq(user_id))
            .filter(email_record::Column::Id.eq(email_id))
            .exec(&self.conn)
            .await?;

        Ok(())
    }

    async fn confirmed_ids(&self, user_id: &str) -> AppResult<HashSet<String>> {
        let ids: Vec<String> = EmailRecord::find()
            .filter(email_record::Column::UserId.eq(user_id))
            .filter(email_record::Column::Confirmed.eq(true))
            .select_only()
            .column(email_record::Column::Id)
            .into_tuple()
            .all(&self.conn)
            .await?;

        Ok(ids.into_iter().collect())
    }

    async fn unconfirmed_newer_than(
        &self,
        user_id: &str,
        cutoff_millis: i64,
    ) -> AppResult<Vec<model::EmailRecord>> {
        let rows = EmailRecord::find()
            .filter(email_record::Column::UserId.eq(user_id))
            .filter(email_record::Column::Confirmed.eq(false))
            .filter(email_record::Column::InternalDate.gte(cutoff_millis))
            .order_by(email_record::Column::InternalDate, Order::Desc)
            .all(&self.conn)
            .await?;

        Ok(rows.into_iter().map(record_from_row).collect())
    }

    async fn upsert_sender_rule(
        &self,
        user_id: &str,
        sender: &str,
        status: EmailStatus,
    ) -> AppResult<()> {
        let row = sender_rule::ActiveModel {
            user_id: Set(user_id.to_string()),
            sender: Set(sender.to_string()),
            status: Set(status),
            updated_at: Set(Utc::now().fixed_offset()),
        };

        SenderRule::insert(row)
            .on_conflict(
                OnConflict::columns([sender_rule::Column::UserId, sender_rule::Column::Sender])
                    .update_columns([sender_rule::Column::Status, sender_rule::Column::UpdatedAt])
                    .to_owned(),
            )
            .exec(&self.conn)
            .await?;

        Ok(())
    }

    async fn senders_with_status(
        &self,
        user_id: &str,
        status: EmailStatus,
    ) -> AppResult<HashSet<String>> {
        let senders: Vec<String> = SenderRule::find()
            .filter(sender_rule::Column::UserId.eq(user_id))
            .filter(sender_rule::Column::Status.eq(status))
            .select_only()
            .column(sender_rule::Column::Sender)
            .into_tuple()
            .all(&self.conn)
            .await?;

        Ok(senders.into_iter().collect())
    }
}
