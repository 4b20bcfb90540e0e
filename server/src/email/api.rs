use async_trait::async_trait;
use derive_more::derive::Display;
use google_gmail1::api::{Label, Message};

/// Format parameter for message get requests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MessageFormat {
    /// Headers only, restricted by a header allowlist
    #[default]
    Metadata,
    /// Full message data with the body payload tree
    Full,
}

impl MessageFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageFormat::Metadata => "metadata",
            MessageFormat::Full => "full",
        }
    }
}

/// One page of a message search
#[derive(Debug, Default)]
pub struct ListPage {
    pub ids: Vec<String>,
    pub next_page_token: Option<String>,
}

/// Per-item failure inside an otherwise successful batch call
#[derive(Debug, Display)]
pub enum FetchError {
    #[display("rate limited")]
    RateLimited,
    #[display("{_0}")]
    Failed(String),
}

/// Failure of a whole batch call. A rate-limit signal here fails the whole
/// chunk; the fetcher retries it on a later pass.
#[derive(Debug, Display)]
pub enum BatchError {
    #[display("rate limited")]
    RateLimited,
    #[display("{_0}")]
    Transport(anyhow::Error),
}

impl From<anyhow::Error> for BatchError {
    fn from(error: anyhow::Error) -> Self {
        BatchError::Transport(error)
    }
}

#[derive(Debug)]
pub struct BatchFetchItem {
    pub id: String,
    pub result: Result<Message, FetchError>,
}

/// Boundary over the remote mail API. `GmailClient` is the production
/// implementation; tests inject a scripted stub.
#[async_trait]
pub trait MailApi: Send + Sync {
    /// One page of ids matching a search query. Transport errors propagate,
    /// pagination retry is the caller's problem.
    async fn list_messages(
        &self,
        query: &str,
        page_token: Option<&str>,
    ) -> anyhow::Result<ListPage>;

    /// One grouped fetch for a chunk of ids. `metadata_headers` applies to
    /// the Metadata format only.
    async fn batch_get_messages(
        &self,
        ids: &[String],
        format: MessageFormat,
        metadata_headers: &[&str],
    ) -> Result<Vec<BatchFetchItem>, BatchError>;

    async fn modify_labels(
        &self,
        message_id: &str,
        add: &[String],
        remove: &[String],
    ) -> anyhow::Result<()>;

    async fn list_labels(&self) -> anyhow::Result<Vec<Label>>;

    async fn create_label(&self, name: &str) -> anyhow::Result<Label>;

    /// Create a permanent server-side rule marking everything from this
    /// sender as spam.
    async fn create_sender_filter(&self, sender: &str) -> anyhow::Result<()>;
}
