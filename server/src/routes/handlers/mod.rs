pub mod email;
pub mod scan;

use std::sync::Arc;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

use crate::{
    email::client::GmailClient,
    error::{AppError, AppResult},
    prompt::{OpenRouterClient, Oracle},
    state::scanner::ScanEnv,
    ServerState,
};

/// Caller identity. Identity assignment (cookies, sessions) lives outside
/// this core; the boundary is a plain header with a single-user default.
pub struct UserId(pub String);

const USER_ID_HEADER: &str = "x-user-id";
const DEFAULT_USER_ID: &str = "default";

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for UserId {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or(DEFAULT_USER_ID);
        Ok(UserId(user_id.to_string()))
    }
}

/// Assemble the worker environment for one request: authenticated mail
/// client, shared stores, and the oracle when a key is configured.
pub fn scan_env(state: &ServerState) -> AppResult<ScanEnv<GmailClient>> {
    let api = GmailClient::from_token_file(state.http_client.clone())?;
    let oracle = OpenRouterClient::from_config(state.http_client.clone())
        .map(|client| Arc::new(client) as Arc<dyn Oracle>);

    Ok(ScanEnv {
        api,
        store: state.store.clone(),
        tasks: state.tasks.clone(),
        oracle,
    })
}
