use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use google_gmail1::api::{Label, ListLabelsResponse, ListMessagesResponse, Message};
use leaky_bucket::RateLimiter;
use serde_json::json;
use uuid::Uuid;

use crate::{
    email::api::{BatchError, BatchFetchItem, FetchError, ListPage, MailApi, MessageFormat},
    error::{AppError, AppResult},
    server_config::{self, cfg},
    HttpClient,
};

/// Gmail API error response structure
#[derive(Debug, Clone, serde::Deserialize)]
pub struct GmailApiError {
    pub error: GmailApiErrorDetail,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct GmailApiErrorDetail {
    pub code: u16,
    pub message: String,
    #[serde(default)]
    pub status: Option<String>,
}

macro_rules! gmail_url {
    ($($params:expr),*) => {
        {
            const GMAIL_ENDPOINT: &str = "https://www.googleapis.com/gmail/v1/users/me";
            let list_params = vec![$($params),*];
            let path = list_params.join("/");
            format!("{}/{}", GMAIL_ENDPOINT, path)
        }
    };
}

const GMAIL_BATCH_ENDPOINT: &str = "https://www.googleapis.com/batch/gmail/v1";

// Gmail grants 250 quota units per user per second; each unit cost below
// mirrors the published per-method pricing.
mod quota {
    pub const PER_SECOND: usize = 250;
    pub const MESSAGES_LIST: usize = 5;
    pub const MESSAGES_GET: usize = 5;
    pub const MESSAGES_MODIFY: usize = 5;
    pub const LABELS_LIST: usize = 1;
    pub const LABELS_CREATE: usize = 5;
    pub const FILTERS_CREATE: usize = 5;
}

#[derive(Clone)]
pub struct GmailClient {
    http_client: HttpClient,
    access_token: String,
    rate_limiter: Arc<RateLimiter>,
}

impl GmailClient {
    pub fn new(http_client: HttpClient, access_token: String) -> GmailClient {
        let rate_limiter = Arc::new(
            RateLimiter::builder()
                .initial(quota::PER_SECOND)
                .interval(Duration::from_secs(1))
                .refill(quota::PER_SECOND)
                .build(),
        );

        GmailClient {
            http_client,
            access_token,
            rate_limiter,
        }
    }

    /// Build a client from the stored OAuth token. The token exchange itself
    /// happens elsewhere; a missing token means the user never authenticated.
    pub fn from_token_file(http_client: HttpClient) -> AppResult<GmailClient> {
        let access_token = server_config::read_access_token()
            .ok_or_else(|| AppError::Unauthorized("Not authenticated".to_string()))?;
        Ok(GmailClient::new(http_client, access_token))
    }

    fn batch_request_path(&self, message_id: &str, format: MessageFormat, headers: &[&str]) -> String {
        let mut path = format!(
            "/gmail/v1/users/me/messages/{}?format={}",
            message_id,
            format.as_str().to_uppercase()
        );
        if matches!(format, MessageFormat::Metadata) {
            for header in headers {
                path.push_str(&format!("&metadataHeaders={}", header));
            }
        }
        path
    }
}

#[async_trait]
impl MailApi for GmailClient {
    async fn list_messages(
        &self,
        query: &str,
        page_token: Option<&str>,
    ) -> anyhow::Result<ListPage> {
        self.rate_limiter.acquire(quota::MESSAGES_LIST).await;

        let mut params = vec![
            ("q".to_string(), query.to_string()),
            ("maxResults".to_string(), cfg.scan.page_size.to_string()),
        ];
        if let Some(token) = page_token {
            params.push(("pageToken".to_string(), token.to_string()));
        }

        let resp = self
            .http_client
            .get(gmail_url!("messages"))
            .query(&params)
            .bearer_auth(&self.access_token)
            .send()
            .await?
            .error_for_status()?;

        let data = resp.json::<ListMessagesResponse>().await?;

        Ok(ListPage {
            ids: data
                .messages
                .unwrap_or_default()
                .into_iter()
                .filter_map(|m| m.id)
                .collect(),
            next_page_token: data.next_page_token,
        })
    }

    /// Batch fetch one chunk of messages using Gmail's multipart batch API.
    /// Gmail's hard limit is 100 requests per batch; callers chunk well
    /// below that.
    async fn batch_get_messages(
        &self,
        ids: &[String],
        format: MessageFormat,
        metadata_headers: &[&str],
    ) -> Result<Vec<BatchFetchItem>, BatchError> {
        for _ in 0..ids.len() {
            self.rate_limiter.acquire(quota::MESSAGES_GET).await;
        }

        let boundary = format!("batch_{}", Uuid::new_v4());

        let mut body = String::new();
        for (i, message_id) in ids.iter().enumerate() {
            body.push_str(&format!("--{}\r\n", boundary));
            body.push_str("Content-Type: application/http\r\n");
            body.push_str(&format!("Content-ID: <item{}>\r\n\r\n", i));
            body.push_str(&format!(
                "GET {}\r\n\r\n",
                self.batch_request_path(message_id, format, metadata_headers)
            ));
        }
        body.push_str(&format!("--{}--", boundary));

        let resp = self
            .http_client
            .post(GMAIL_BATCH_ENDPOINT)
            .bearer_auth(&self.access_token)
            .header(
                "Content-Type",
                format!("multipart/mixed; boundary={}", boundary),
            )
            .body(body)
            .send()
            .await
            .map_err(|e| BatchError::Transport(e.into()))?;

        if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(BatchError::RateLimited);
        }
        if !resp.status().is_success() {
            return Err(BatchError::Transport(anyhow!(
                "Batch request failed with status {}",
                resp.status()
            )));
        }

        let content_type = resp
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .context("Missing content-type header")?
            .to_string();

        let response_body = resp
            .text()
            .await
            .map_err(|e| BatchError::Transport(e.into()))?;

        let response_boundary = content_type
            .split("boundary=")
            .nth(1)
            .context("Missing boundary in response")?;

        // Parse multipart response; each part is one message get
        let mut results = Vec::new();
        let parts: Vec<&str> = response_body
            .split(&format!("--{}", response_boundary))
            .filter(|p| !p.trim().is_empty() && !p.trim().starts_with("--"))
            .collect();

        for part in parts {
            // Content-ID maps the part back to its message id
            // Format: Content-ID: <response-item{i}>
            let message_id = part
                .lines()
                .find(|line| line.to_lowercase().starts_with("content-id:"))
                .and_then(|line| {
                    line.split("item")
                        .nth(1)
                        .and_then(|s| s.trim_end_matches('>').parse::<usize>().ok())
                })
                .and_then(|idx| ids.get(idx))
                .map(|id| id.to_string())
                .unwrap_or_default();

            // Each part carries HTTP headers, a blank line, then the inner
            // HTTP response with its own headers and JSON body
            let Some(json_start) = part.find("\r\n\r\n") else {
                continue;
            };
            let after_outer_headers = &part[json_start + 4..];
            let Some(json_start2) = after_outer_headers.find("\r\n\r\n") else {
                continue;
            };
            let json_body = after_outer_headers[json_start2 + 4..].trim();
            if json_body.is_empty() || !json_body.starts_with('{') {
                continue;
            }

            if let Ok(error) = serde_json::from_str::<GmailApiError>(json_body) {
                let result = if error.error.code == 429 {
                    Err(FetchError::RateLimited)
                } else {
                    Err(FetchError::Failed(format!(
                        "{} (code: {})",
                        error.error.message, error.error.code
                    )))
                };
                results.push(BatchFetchItem { id: message_id, result });
            } else {
                match serde_json::from_str::<Message>(json_body) {
                    Ok(message) => {
                        let id = message.id.clone().unwrap_or(message_id);
                        results.push(BatchFetchItem {
                            id,
                            result: Ok(message),
                        });
                    }
                    Err(e) => {
                        tracing::warn!(
                            "Failed to parse message {} from batch response: {}",
                            message_id,
                            e
                        );
                        results.push(BatchFetchItem {
                            id: message_id,
                            result: Err(FetchError::Failed(e.to_string())),
                        });
                    }
                }
            }
        }

        Ok(results)
    }

    async fn modify_labels(
        &self,
        message_id: &str,
        add: &[String],
        remove: &[String],
    ) -> anyhow::Result<()> {
        self.rate_limiter.acquire(quota::MESSAGES_MODIFY).await;

        let resp = self
            .http_client
            .post(gmail_url!("messages", message_id, "modify"))
            .bearer_auth(&self.access_token)
            .json(&json!({
                "addLabelIds": add,
                "removeLabelIds": remove,
            }))
            .send()
            .await?;

        let data = resp.json::<serde_json::Value>().await?;
        if data.get("error").is_some() {
            return Err(anyhow!("Error modifying labels: {:?}", data));
        }

        Ok(())
    }

    async fn list_labels(&self) -> anyhow::Result<Vec<Label>> {
        self.rate_limiter.acquire(quota::LABELS_LIST).await;
        let resp = self
            .http_client
            .get(gmail_url!("labels"))
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        let data = resp.json::<ListLabelsResponse>().await?;

        data.labels.context("No labels found")
    }

    async fn create_label(&self, name: &str) -> anyhow::Result<Label> {
        self.rate_limiter.acquire(quota::LABELS_CREATE).await;

        let label = Label {
            name: Some(name.to_string()),
            type_: Some("user".to_string()),
            message_list_visibility: Some("show".to_string()),
            label_list_visibility: Some("labelShow".to_string()),
            ..Default::default()
        };

        let resp = self
            .http_client
            .post(gmail_url!("labels"))
            .bearer_auth(&self.access_token)
            .json(&label)
            .send()
            .await?;
        let data = resp.json::<serde_json::Value>().await?;
        if let Some(error) = data.get("error") {
            if error.get("code").is_some_and(|x| x.as_i64() == Some(409)) {
                // Label already exists
                return Ok(label);
            }
            return Err(anyhow!("Error creating label {}: {:?}", name, data));
        }

        Ok(serde_json::from_value(data)?)
    }

    async fn create_sender_filter(&self, sender: &str) -> anyhow::Result<()> {
        self.rate_limiter.acquire(quota::FILTERS_CREATE).await;

        let resp = self
            .http_client
            .post(gmail_url!("settings", "filters"))
            .bearer_auth(&self.access_token)
            .json(&json!({
                "criteria": { "from": sender },
                "action": { "addLabelIds": ["SPAM"], "removeLabelIds": [] },
            }))
            .send()
            .await?;

        let data = resp.json::<serde_json::Value>().await?;
        if data.get("error").is_some() {
            return Err(anyhow!("Error creating filter for {}: {:?}", sender, data));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gmail_url() {
        let url = gmail_url!("messages");
        assert_eq!(url, "https://www.googleapis.com/gmail/v1/users/me/messages");
        let url = gmail_url!("messages", "123");
        assert_eq!(
            url,
            "https://www.googleapis.com/gmail/v1/users/me/messages/123"
        );
    }

    #[test]
    fn test_batch_request_path_includes_metadata_headers() {
        let client = GmailClient::new(reqwest::Client::new(), "token".to_string());
        let path = client.batch_request_path("abc", MessageFormat::Metadata, &["From", "Subject"]);
        assert_eq!(
            path,
            "/gmail/v1/users/me/messages/abc?format=METADATA&metadataHeaders=From&metadataHeaders=Subject"
        );

        let path = client.batch_request_path("abc", MessageFormat::Full, &["From"]);
        assert_eq!(path, "/gmail/v1/users/me/messages/abc?format=FULL");
    }
}
