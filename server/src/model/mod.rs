use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use entity::sea_orm_active_enums::{EmailStatus, TaskKind};

/// One triaged message, unique per (user, message id). Re-processing the
/// same id updates the record in place instead of duplicating it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailRecord {
    pub id: String,
    pub subject: String,
    pub sender: String,
    /// Raw `Date:` header, kept for display
    pub date: String,
    /// Epoch millis assigned by the mail service, used for ordering
    pub internal_date: i64,
    pub status: EmailStatus,
    pub llm_request: Option<String>,
    pub llm_response: Option<String>,
    pub llm_sent: bool,
    pub filter_created: bool,
    pub confirmed: bool,
}

/// One oracle exchange entry in a task's audit log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmExchange {
    pub role: String,
    pub content: String,
}

impl LlmExchange {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Scan lifecycle stage. Serialized as the lowercase wire strings the
/// poller sees ("queued", "listing whitelist", ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum TaskStage {
    Queued,
    Fetching,
    Processing,
    Done,
    Closed,
    /// Refresh task: listing message ids carrying one managed label
    Listing(EmailStatus),
    /// Refresh task: fetching sender headers for one managed label
    FetchingSenders(EmailStatus),
}

impl TaskStage {
    pub fn is_closed(&self) -> bool {
        matches!(self, TaskStage::Closed)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStage::Done | TaskStage::Closed)
    }
}

impl std::fmt::Display for TaskStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStage::Queued => write!(f, "queued"),
            TaskStage::Fetching => write!(f, "fetching"),
            TaskStage::Processing => write!(f, "processing"),
            TaskStage::Done => write!(f, "done"),
            TaskStage::Closed => write!(f, "closed"),
            TaskStage::Listing(status) => write!(f, "listing {}", status.as_str()),
            TaskStage::FetchingSenders(status) => write!(f, "fetching {}", status.as_str()),
        }
    }
}

fn parse_status(name: &str) -> Result<EmailStatus, String> {
    match name {
        "spam" => Ok(EmailStatus::Spam),
        "whitelist" => Ok(EmailStatus::Whitelist),
        "ignore" => Ok(EmailStatus::Ignore),
        "not_spam" => Ok(EmailStatus::NotSpam),
        other => Err(format!("unknown status: {}", other)),
    }
}

impl std::str::FromStr for TaskStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(TaskStage::Queued),
            "fetching" => Ok(TaskStage::Fetching),
            "processing" => Ok(TaskStage::Processing),
            "done" => Ok(TaskStage::Done),
            "closed" => Ok(TaskStage::Closed),
            other => match other.split_once(' ') {
                Some(("listing", status)) => Ok(TaskStage::Listing(parse_status(status)?)),
                Some(("fetching", status)) => {
                    Ok(TaskStage::FetchingSenders(parse_status(status)?))
                }
                _ => Err(format!("unknown task stage: {}", other)),
            },
        }
    }
}

impl From<TaskStage> for String {
    fn from(stage: TaskStage) -> Self {
        stage.to_string()
    }
}

impl TryFrom<String> for TaskStage {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// One run of the triage pipeline for a user, observed by pollers through
/// stage/progress/total. Mirrored to durable storage after every mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanTask {
    pub id: Uuid,
    pub user_id: String,
    pub kind: TaskKind,
    pub stage: TaskStage,
    pub progress: usize,
    pub total: usize,
    pub emails: Vec<EmailRecord>,
    pub log: Vec<LlmExchange>,
    pub created_at: DateTime<Utc>,
}

impl ScanTask {
    pub fn new(user_id: impl Into<String>, kind: TaskKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            kind,
            stage: TaskStage::Queued,
            progress: 0,
            total: 0,
            emails: Vec::new(),
            log: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn contains_email(&self, id: &str) -> bool {
        self.emails.iter().any(|e| e.id == id)
    }

    /// Merge a record into the email list: same id updates in place,
    /// new ids are inserted keeping the list newest-first by message date.
    pub fn upsert_email(&mut self, record: EmailRecord) {
        if let Some(existing) = self.emails.iter_mut().find(|e| e.id == record.id) {
            // confirmed is a one-way latch
            let confirmed = existing.confirmed || record.confirmed;
            *existing = record;
            existing.confirmed = confirmed;
            return;
        }

        let at = self
            .emails
            .partition_point(|e| e.internal_date > record.internal_date);
        self.emails.insert(at, record);
    }
}
