use anyhow::{anyhow, Context};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::{
    server_config::{self, cfg},
    HttpClient,
};

/// Boundary over the LLM chat-completions call. The engine only ever looks
/// for an affirmative marker in the reply text.
#[async_trait]
pub trait Oracle: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> anyhow::Result<String>;
}

#[derive(Debug, Deserialize)]
pub struct ChatApiResponse {
    pub choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
pub struct ChatChoice {
    pub message: ChatMessage,
}

#[derive(Debug, Deserialize)]
pub struct ChatMessage {
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatApiErrorDetail {
    pub message: String,
    #[serde(default)]
    pub code: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ChatApiResponseOrError {
    Error { error: ChatApiErrorDetail },
    Response(ChatApiResponse),
}

#[derive(Clone)]
pub struct OpenRouterClient {
    http_client: HttpClient,
    api_key: String,
    model: String,
    endpoint: String,
}

impl OpenRouterClient {
    pub fn new(http_client: HttpClient, api_key: String) -> Self {
        Self {
            http_client,
            api_key,
            model: cfg.oracle.model.clone(),
            endpoint: cfg.oracle.endpoint.clone(),
        }
    }

    /// None when no oracle key is configured; classification then skips the
    /// oracle step entirely.
    pub fn from_config(http_client: HttpClient) -> Option<Self> {
        server_config::read_oracle_key().map(|key| Self::new(http_client, key))
    }
}

#[async_trait]
impl Oracle for OpenRouterClient {
    async fn complete(&self, system: &str, user: &str) -> anyhow::Result<String> {
        let resp = self
            .http_client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": &self.model,
                "messages": [
                    { "role": "system", "content": system },
                    { "role": "user", "content": user },
                ],
            }))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(anyhow!("Oracle returned status {}", resp.status()));
        }

        let value = resp.json::<serde_json::Value>().await?;
        let parsed = serde_json::from_value::<ChatApiResponseOrError>(value.clone())
            .context(format!("Could not parse chat response: {}", value))?;

        let parsed = match parsed {
            ChatApiResponseOrError::Error { error } => {
                return Err(anyhow!("Chat API error: {:?}", error));
            }
            ChatApiResponseOrError::Response(parsed) => parsed,
        };

        let choice = parsed.choices.first().context("No choices in response")?;

        Ok(choice.message.content.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_parsing_handles_both_shapes() {
        let ok = serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": "<RESULT>NO</RESULT>" } }]
        });
        match serde_json::from_value::<ChatApiResponseOrError>(ok).unwrap() {
            ChatApiResponseOrError::Response(resp) => {
                assert_eq!(resp.choices[0].message.content, "<RESULT>NO</RESULT>");
            }
            ChatApiResponseOrError::Error { .. } => panic!("expected response"),
        }

        let err = serde_json::json!({
            "error": { "message": "Requests rate limit exceeded", "code": 429 }
        });
        match serde_json::from_value::<ChatApiResponseOrError>(err).unwrap() {
            ChatApiResponseOrError::Error { error } => {
                assert_eq!(error.code, Some(429));
            }
            ChatApiResponseOrError::Response(_) => panic!("expected error"),
        }
    }
}
