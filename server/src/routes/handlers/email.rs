use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;
use uuid::Uuid;

use crate::{error::AppResult, model::EmailStatus, state::scanner, ServerState};

use super::{scan_env, UserId};

#[derive(Debug, Deserialize)]
pub struct UpdateStatusPayload {
    pub id: String,
    pub status: EmailStatus,
}

/// Manual status override from the review surface
pub async fn update_status(
    State(state): State<ServerState>,
    UserId(user_id): UserId,
    Json(payload): Json<UpdateStatusPayload>,
) -> AppResult<StatusCode> {
    let env = scan_env(&state)?;
    scanner::override_status(&env, &user_id, &payload.id, payload.status).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct ConfirmPayload {
    pub ids: Vec<String>,
    /// When set, the originating task is closed once results are confirmed
    pub task_id: Option<Uuid>,
}

/// Escalate spam verdicts to permanent block rules
pub async fn confirm(
    State(state): State<ServerState>,
    UserId(user_id): UserId,
    Json(payload): Json<ConfirmPayload>,
) -> AppResult<StatusCode> {
    let env = scan_env(&state)?;
    scanner::confirm_emails(&env, &user_id, &payload.ids).await?;

    if let Some(task_id) = payload.task_id {
        state.tasks.close(task_id).await?;
    }

    Ok(StatusCode::NO_CONTENT)
}
