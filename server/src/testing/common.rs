//! Shared test doubles: a scripted mail transport, a canned oracle, and
//! message fixtures.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use async_trait::async_trait;
use google_gmail1::api::{Label, Message, MessagePart, MessagePartBody, MessagePartHeader};

use crate::email::api::{BatchError, BatchFetchItem, FetchError, ListPage, MailApi, MessageFormat};
use crate::email::labels::ManagedLabels;
use crate::prompt::Oracle;
use crate::server_config::cfg;

pub const LABEL_ID_SPAM: &str = "L_SPAM";
pub const LABEL_ID_WHITELIST: &str = "L_WHITE";
pub const LABEL_ID_IGNORE: &str = "L_IGNORE";

pub fn test_labels() -> ManagedLabels {
    ManagedLabels {
        spam: LABEL_ID_SPAM.to_string(),
        whitelist: LABEL_ID_WHITELIST.to_string(),
        ignore: LABEL_ID_IGNORE.to_string(),
    }
}

type ListScript = Vec<Result<Vec<String>, String>>;

#[derive(Default)]
struct StubInner {
    /// Listing scripts keyed by query; the "" key is the default script.
    /// A finished listing rewinds so repeated scans replay the same inbox.
    listings: Mutex<HashMap<String, ListScript>>,
    cursors: Mutex<HashMap<String, usize>>,
    list_calls: AtomicUsize,
    messages: Mutex<HashMap<String, Message>>,
    /// Remaining 429 rejections keyed by a contained message id
    rate_limits: Mutex<HashMap<String, u32>>,
    batch_calls: Mutex<Vec<(tokio::time::Instant, Vec<String>)>>,
    modify_log: Mutex<Vec<(String, Vec<String>, Vec<String>)>>,
    filters: Mutex<Vec<String>>,
}

/// Scripted in-memory mail transport
#[derive(Clone, Default)]
pub struct StubMailApi {
    inner: Arc<StubInner>,
}

impl StubMailApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a page to the default listing script
    pub fn with_page(self, ids: Vec<&str>) -> Self {
        self.inner
            .listings
            .lock()
            .unwrap()
            .entry(String::new())
            .or_default()
            .push(Ok(ids.into_iter().map(|s| s.to_string()).collect()));
        self
    }

    /// Append a transport error to the default listing script
    pub fn with_list_error(self, message: &str) -> Self {
        self.inner
            .listings
            .lock()
            .unwrap()
            .entry(String::new())
            .or_default()
            .push(Err(message.to_string()));
        self
    }

    /// Script the pages returned for one exact query
    pub fn with_listing(self, query: &str, pages: Vec<Vec<&str>>) -> Self {
        let script: ListScript = pages
            .into_iter()
            .map(|ids| Ok(ids.into_iter().map(|s| s.to_string()).collect()))
            .collect();
        self.inner
            .listings
            .lock()
            .unwrap()
            .insert(query.to_string(), script);
        self
    }

    pub fn with_message(self, message: Message) -> Self {
        let id = message.id.clone().expect("fixture message needs an id");
        self.inner.messages.lock().unwrap().insert(id, message);
        self
    }

    /// Reject the next `n` batch calls containing this id with a 429
    pub fn rate_limit_next_batches_containing(self, id: &str, n: u32) -> Self {
        self.inner
            .rate_limits
            .lock()
            .unwrap()
            .insert(id.to_string(), n);
        self
    }

    pub fn list_calls(&self) -> usize {
        self.inner.list_calls.load(Ordering::Relaxed)
    }

    pub fn batch_call_times_containing(&self, id: &str) -> Vec<tokio::time::Instant> {
        self.inner
            .batch_calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, ids)| ids.iter().any(|i| i == id))
            .map(|(at, _)| *at)
            .collect()
    }

    pub fn batch_calls_containing(&self, id: &str) -> usize {
        self.batch_call_times_containing(id).len()
    }

    pub fn modify_log(&self) -> Vec<(String, Vec<String>, Vec<String>)> {
        self.inner.modify_log.lock().unwrap().clone()
    }

    pub fn filters(&self) -> Vec<String> {
        self.inner.filters.lock().unwrap().clone()
    }
}

#[async_trait]
impl MailApi for StubMailApi {
    async fn list_messages(
        &self,
        query: &str,
        _page_token: Option<&str>,
    ) -> anyhow::Result<ListPage> {
        self.inner.list_calls.fetch_add(1, Ordering::Relaxed);

        let listings = self.inner.listings.lock().unwrap();
        let key = if listings.contains_key(query) {
            query.to_string()
        } else {
            String::new()
        };
        let script = listings.get(&key).cloned().unwrap_or_default();
        drop(listings);

        let mut cursors = self.inner.cursors.lock().unwrap();
        let cursor = cursors.entry(key).or_insert(0);

        if *cursor >= script.len() {
            *cursor = 0;
            return Ok(ListPage::default());
        }

        let entry = script[*cursor].clone();
        *cursor += 1;

        match entry {
            Err(message) => {
                *cursor = 0;
                Err(anyhow!(message))
            }
            Ok(ids) => {
                let next_page_token = if *cursor < script.len() {
                    Some(format!("page-{}", cursor))
                } else {
                    *cursor = 0;
                    None
                };
                Ok(ListPage {
                    ids,
                    next_page_token,
                })
            }
        }
    }

    async fn batch_get_messages(
        &self,
        ids: &[String],
        _format: MessageFormat,
        _metadata_headers: &[&str],
    ) -> Result<Vec<BatchFetchItem>, BatchError> {
        self.inner
            .batch_calls
            .lock()
            .unwrap()
            .push((tokio::time::Instant::now(), ids.to_vec()));

        {
            let mut rate_limits = self.inner.rate_limits.lock().unwrap();
            for id in ids {
                if let Some(remaining) = rate_limits.get_mut(id) {
                    if *remaining > 0 {
                        *remaining -= 1;
                        return Err(BatchError::RateLimited);
                    }
                }
            }
        }

        let messages = self.inner.messages.lock().unwrap();
        Ok(ids
            .iter()
            .map(|id| BatchFetchItem {
                id: id.clone(),
                result: match messages.get(id) {
                    Some(message) => Ok(message.clone()),
                    None => Err(FetchError::Failed("not found".to_string())),
                },
            })
            .collect())
    }

    async fn modify_labels(
        &self,
        message_id: &str,
        add: &[String],
        remove: &[String],
    ) -> anyhow::Result<()> {
        self.inner.modify_log.lock().unwrap().push((
            message_id.to_string(),
            add.to_vec(),
            remove.to_vec(),
        ));
        Ok(())
    }

    async fn list_labels(&self) -> anyhow::Result<Vec<Label>> {
        let label = |id: &str, name: &str| Label {
            id: Some(id.to_string()),
            name: Some(name.to_string()),
            ..Default::default()
        };
        Ok(vec![
            label("INBOX", "INBOX"),
            label(LABEL_ID_SPAM, &cfg.labels.spam),
            label(LABEL_ID_WHITELIST, &cfg.labels.whitelist),
            label(LABEL_ID_IGNORE, &cfg.labels.ignore),
        ])
    }

    async fn create_label(&self, name: &str) -> anyhow::Result<Label> {
        Ok(Label {
            id: Some(format!("L_{}", name.to_uppercase())),
            name: Some(name.to_string()),
            ..Default::default()
        })
    }

    async fn create_sender_filter(&self, sender: &str) -> anyhow::Result<()> {
        self.inner.filters.lock().unwrap().push(sender.to_string());
        Ok(())
    }
}

enum OracleScript {
    Answer(String),
    Fail,
}

/// Canned oracle that records every exchange
pub struct StubOracle {
    script: OracleScript,
    calls: AtomicUsize,
    exchanges: Mutex<Vec<(String, String)>>,
}

impl StubOracle {
    pub fn answering(answer: &str) -> Self {
        Self {
            script: OracleScript::Answer(answer.to_string()),
            calls: AtomicUsize::new(0),
            exchanges: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            script: OracleScript::Fail,
            calls: AtomicUsize::new(0),
            exchanges: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn last_exchange(&self) -> Option<(String, String)> {
        self.exchanges.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl Oracle for StubOracle {
    async fn complete(&self, system: &str, user: &str) -> anyhow::Result<String> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.exchanges
            .lock()
            .unwrap()
            .push((system.to_string(), user.to_string()));
        match &self.script {
            OracleScript::Answer(answer) => Ok(answer.clone()),
            OracleScript::Fail => Err(anyhow!("oracle unreachable")),
        }
    }
}

fn headers(from: &str, subject: &str) -> Vec<MessagePartHeader> {
    let header = |name: &str, value: &str| MessagePartHeader {
        name: Some(name.to_string()),
        value: Some(value.to_string()),
    };
    vec![
        header("Subject", subject),
        header("From", from),
        header("Date", "Mon, 1 Jan 2024 00:00:00 +0000"),
    ]
}

/// Minimal full-format message fixture with a plaintext body part
pub fn message_fixture_with_body(
    id: &str,
    from: &str,
    subject: &str,
    internal_date: i64,
    body: &str,
) -> Message {
    Message {
        id: Some(id.to_string()),
        label_ids: Some(vec!["INBOX".to_string(), "UNREAD".to_string()]),
        internal_date: Some(internal_date),
        payload: Some(MessagePart {
            mime_type: Some("text/plain".to_string()),
            headers: Some(headers(from, subject)),
            body: Some(MessagePartBody {
                data: Some(body.as_bytes().to_vec()),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn message_fixture(id: &str, from: &str, subject: &str, internal_date: i64) -> Message {
    message_fixture_with_body(id, from, subject, internal_date, "")
}
