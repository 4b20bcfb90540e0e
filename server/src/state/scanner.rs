use std::collections::HashSet;
use std::sync::Arc;

use anyhow::anyhow;
use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::email::api::{MailApi, MessageFormat};
use crate::email::classifier::{self, Candidate, OracleFailurePolicy, SenderCaches};
use crate::email::extractor::{extract_text, header_value};
use crate::email::fetcher::{fetch_messages, FetchPolicy};
use crate::email::labels::ensure_managed_labels;
use crate::email::lister::list_all_message_ids;
use crate::email::reconciler;
use crate::error::{AppError, AppResult};
use crate::model::{EmailRecord, EmailStatus, LlmExchange, ScanTask, TaskKind, TaskStage};
use crate::prompt::{classification_system_prompt, Oracle};
use crate::server_config::cfg;
use crate::state::task_store::TaskRegistry;
use crate::store::SharedStore;

const METADATA_HEADERS: [&str; 3] = ["Subject", "From", "Date"];

/// Everything a scan worker needs, cloned into each spawned task
#[derive(Clone)]
pub struct ScanEnv<M> {
    pub api: M,
    pub store: SharedStore,
    pub tasks: TaskRegistry,
    pub oracle: Option<Arc<dyn Oracle>>,
}

#[derive(Debug, Clone)]
pub struct ScanRequest {
    pub user_id: String,
    pub prompt: String,
    pub days: i64,
}

/// Start a scan worker and return its task id immediately
pub async fn spawn_scan<M>(env: ScanEnv<M>, req: ScanRequest) -> AppResult<Uuid>
where
    M: MailApi + Clone + 'static,
{
    let task = ScanTask::new(req.user_id.clone(), TaskKind::Scan);
    let task_id = env.tasks.create(task).await?;

    tokio::spawn(async move {
        if let Err(e) = run_scan(&env, task_id, &req).await {
            tracing::error!("Scan task {} failed: {:?}", task_id, e);
        }
    });

    Ok(task_id)
}

/// Start a refresh worker and return its task id immediately
pub async fn spawn_refresh<M>(env: ScanEnv<M>, user_id: String) -> AppResult<Uuid>
where
    M: MailApi + Clone + 'static,
{
    let task = ScanTask::new(user_id.clone(), TaskKind::Refresh);
    let task_id = env.tasks.create(task).await?;

    tokio::spawn(async move {
        if let Err(e) = run_refresh(&env, task_id, &user_id).await {
            tracing::error!("Refresh task {} failed: {:?}", task_id, e);
        }
    });

    Ok(task_id)
}

/// One full scan run: seed from durable state, list, fetch, classify,
/// reconcile, persisting progress per message so pollers see fine-grained
/// movement.
pub async fn run_scan<M: MailApi>(
    env: &ScanEnv<M>,
    task_id: Uuid,
    req: &ScanRequest,
) -> AppResult<()> {
    let user_id = &req.user_id;
    let labels = ensure_managed_labels(&env.api).await?;

    let caches = SenderCaches {
        confirmed_ids: env.store.confirmed_ids(user_id).await?,
        spam: env
            .store
            .senders_with_status(user_id, EmailStatus::Spam)
            .await?,
        whitelist: env
            .store
            .senders_with_status(user_id, EmailStatus::Whitelist)
            .await?,
        ignore: env
            .store
            .senders_with_status(user_id, EmailStatus::Ignore)
            .await?,
    };

    // Seed with earlier, still-unconfirmed results so an overlapping or
    // resumed scan neither reprocesses nor loses them
    let cutoff_millis = (Utc::now() - Duration::days(req.days)).timestamp_millis();
    let prior = env.store.unconfirmed_newer_than(user_id, cutoff_millis).await?;
    env.tasks
        .update(task_id, move |t| {
            t.stage = TaskStage::Fetching;
            for record in prior {
                t.upsert_email(record);
            }
        })
        .await?;

    let query = format!("label:inbox is:unread newer_than:{}d", req.days);
    let listed = list_all_message_ids(&env.api, &query).await?;

    let Some(snapshot) = env.tasks.get(task_id) else {
        // closed or deleted underneath us
        return Ok(());
    };
    let seeded_count = snapshot.emails.len();
    let known: HashSet<&str> = snapshot
        .emails
        .iter()
        .map(|e| e.id.as_str())
        .chain(caches.confirmed_ids.iter().map(|id| id.as_str()))
        .collect();

    let to_fetch: Vec<String> = listed
        .into_iter()
        .filter(|id| !known.contains(id.as_str()))
        .collect();

    let total = seeded_count + to_fetch.len();
    env.tasks.update(task_id, |t| t.total = total).await?;

    let policy = FetchPolicy::from_config();
    let fetched = fetch_messages(
        &env.api,
        &to_fetch,
        MessageFormat::Full,
        &[],
        &policy,
        |_| {},
    )
    .await;

    env.tasks
        .update(task_id, |t| {
            t.stage = TaskStage::Processing;
            t.progress = seeded_count;
        })
        .await?;

    let failure_policy = OracleFailurePolicy::from_config();

    for id in &to_fetch {
        let Some(message) = fetched.get(id) else {
            tracing::warn!("No detail fetched for message {}, skipping", id);
            continue;
        };
        let Some(payload) = message.payload.as_ref() else {
            tracing::warn!("Message {} has no payload, skipping", id);
            continue;
        };

        let headers = payload.headers.as_ref();
        let subject = header_value(headers, "Subject").unwrap_or("").to_string();
        let sender = header_value(headers, "From").unwrap_or("").to_string();
        let date = header_value(headers, "Date").unwrap_or("").to_string();
        let internal_date = message.internal_date.unwrap_or_default();
        let label_ids = message.label_ids.clone().unwrap_or_default();

        let (body, _mime) = extract_text(payload);
        let preview =
            classifier::build_preview(&subject, &sender, &body, cfg.scan.body_preview_words);

        let candidate = Candidate {
            id,
            sender: &sender,
            label_ids: &label_ids,
            preview: &preview,
        };
        let classification = match classifier::classify(
            &candidate,
            &caches,
            &labels,
            env.oracle.as_deref(),
            &req.prompt,
            failure_policy,
        )
        .await
        {
            Ok(classification) => classification,
            Err(e) => {
                tracing::warn!("Classification failed for message {}, skipping: {:?}", id, e);
                continue;
            }
        };

        reconciler::apply(&env.api, id, &classification.status, &labels).await?;

        let record = EmailRecord {
            id: id.clone(),
            subject,
            sender,
            date,
            internal_date,
            status: classification.status.clone(),
            llm_request: classification.llm_request.clone(),
            llm_response: classification.llm_response.clone(),
            llm_sent: classification.llm_sent,
            filter_created: false,
            confirmed: false,
        };
        env.store.upsert_email(user_id, &record).await?;

        let log_entries = if classification.llm_sent {
            vec![
                LlmExchange::system(classification_system_prompt(&req.prompt)),
                LlmExchange::user(classification.llm_request.unwrap_or_default()),
                LlmExchange::assistant(classification.llm_response.unwrap_or_default()),
            ]
        } else {
            Vec::new()
        };

        env.tasks
            .update(task_id, move |t| {
                t.upsert_email(record);
                t.log.extend(log_entries);
                t.progress += 1;
            })
            .await?;
    }

    env.tasks
        .update(task_id, |t| {
            t.stage = TaskStage::Done;
            t.progress = t.total;
        })
        .await?;

    Ok(())
}

/// Re-derive the sender rule caches from the remote labels, one managed
/// category at a time, without classifying anything.
pub async fn run_refresh<M: MailApi>(
    env: &ScanEnv<M>,
    task_id: Uuid,
    user_id: &str,
) -> AppResult<()> {
    let policy = FetchPolicy::from_config();

    let categories = [
        (EmailStatus::Whitelist, cfg.labels.whitelist.as_str()),
        (EmailStatus::Ignore, cfg.labels.ignore.as_str()),
        (EmailStatus::Spam, cfg.labels.spam.as_str()),
    ];

    for (status, label_name) in categories {
        let stage_status = status.clone();
        env.tasks
            .update(task_id, move |t| t.stage = TaskStage::Listing(stage_status))
            .await?;

        let query = format!("label:{}", label_name);
        let ids = list_all_message_ids(&env.api, &query).await?;

        let stage_status = status.clone();
        let found = ids.len();
        env.tasks
            .update(task_id, move |t| {
                t.stage = TaskStage::FetchingSenders(stage_status);
                t.total += found;
            })
            .await?;

        let fetched = fetch_messages(
            &env.api,
            &ids,
            MessageFormat::Metadata,
            &METADATA_HEADERS,
            &policy,
            |_| {},
        )
        .await;

        for (id, message) in fetched {
            let sender = message
                .payload
                .as_ref()
                .and_then(|p| header_value(p.headers.as_ref(), "From"))
                .unwrap_or("");
            if sender.is_empty() {
                tracing::warn!("Message {} has no From header, skipping", id);
                continue;
            }
            env.store
                .upsert_sender_rule(user_id, sender, status.clone())
                .await?;
            env.tasks.update(task_id, |t| t.progress += 1).await?;
        }
    }

    env.tasks.close(task_id).await?;
    Ok(())
}

async fn fetch_metadata<M: MailApi>(api: &M, id: &str) -> AppResult<Option<EmailRecord>> {
    let items = api
        .batch_get_messages(&[id.to_string()], MessageFormat::Metadata, &METADATA_HEADERS)
        .await
        .map_err(|e| AppError::Internal(anyhow!("Metadata fetch failed for {}: {}", id, e)))?;

    let Some(message) = items.into_iter().find_map(|item| item.result.ok()) else {
        return Ok(None);
    };

    let headers = message.payload.as_ref().and_then(|p| p.headers.as_ref());
    Ok(Some(EmailRecord {
        id: id.to_string(),
        subject: headers
            .and_then(|h| header_value(Some(h), "Subject"))
            .unwrap_or("")
            .to_string(),
        sender: headers
            .and_then(|h| header_value(Some(h), "From"))
            .unwrap_or("")
            .to_string(),
        date: headers
            .and_then(|h| header_value(Some(h), "Date"))
            .unwrap_or("")
            .to_string(),
        internal_date: message.internal_date.unwrap_or_default(),
        status: EmailStatus::NotSpam,
        llm_request: None,
        llm_response: None,
        llm_sent: false,
        filter_created: false,
        confirmed: false,
    }))
}

/// Escalate spam verdicts to permanent block rules: a server-side sender
/// filter plus the system spam label, then latch the records as confirmed.
pub async fn confirm_emails<M: MailApi>(
    env: &ScanEnv<M>,
    user_id: &str,
    ids: &[String],
) -> AppResult<()> {
    for id in ids {
        let Some(record) = fetch_metadata(&env.api, id).await? else {
            tracing::warn!("Could not resolve sender for message {}, skipping", id);
            continue;
        };

        env.api.create_sender_filter(&record.sender).await?;
        env.api
            .modify_labels(id, &["SPAM".to_string()], &[])
            .await?;
        env.store.confirm_email(user_id, id).await?;
        env.store
            .upsert_sender_rule(user_id, &record.sender, EmailStatus::Spam)
            .await?;
    }

    Ok(())
}

/// Manual override from the review surface: reconcile labels to the chosen
/// status and persist both the record and a sticky sender rule.
pub async fn override_status<M: MailApi>(
    env: &ScanEnv<M>,
    user_id: &str,
    email_id: &str,
    status: EmailStatus,
) -> AppResult<()> {
    let labels = ensure_managed_labels(&env.api).await?;

    match labels.label_id_for(&status) {
        Some(add) => {
            env.api
                .modify_labels(email_id, &[add.to_string()], &labels.other_ids(&status))
                .await?
        }
        // a manual not_spam clears every managed label
        None => {
            env.api
                .modify_labels(email_id, &[], &labels.other_ids(&status))
                .await?
        }
    }

    let record = match env.store.get_email(user_id, email_id).await? {
        Some(mut record) => {
            record.status = status.clone();
            record
        }
        None => {
            let Some(mut record) = fetch_metadata(&env.api, email_id).await? else {
                return Err(AppError::NotFound(format!("email {} not found", email_id)));
            };
            record.status = status.clone();
            record
        }
    };
    env.store.upsert_email(user_id, &record).await?;

    if !record.sender.is_empty() {
        env.store
            .upsert_sender_rule(user_id, &record.sender, status)
            .await?;
    }

    Ok(())
}
