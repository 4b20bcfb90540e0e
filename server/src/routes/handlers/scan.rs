use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::{AppError, AppJsonResult, AppResult},
    model::ScanTask,
    server_config::cfg,
    state::scanner::{self, ScanRequest},
    ServerState,
};

use super::{scan_env, UserId};

#[derive(Debug, Default, Deserialize)]
pub struct ScanParams {
    pub prompt: Option<String>,
    pub days: Option<i64>,
}

#[derive(Serialize)]
pub struct TaskCreated {
    pub task_id: Uuid,
}

/// Start a background scan and return its task id immediately; callers
/// follow along via the status endpoint.
pub async fn start_scan(
    State(state): State<ServerState>,
    UserId(user_id): UserId,
    payload: Option<Json<ScanParams>>,
) -> AppJsonResult<TaskCreated> {
    let params = payload.map(|Json(p)| p).unwrap_or_default();
    let env = scan_env(&state)?;

    let req = ScanRequest {
        user_id,
        prompt: params
            .prompt
            .unwrap_or_else(|| cfg.oracle.default_prompt.clone()),
        days: params.days.unwrap_or(cfg.scan.default_days),
    };

    let task_id = scanner::spawn_scan(env, req).await?;
    Ok(Json(TaskCreated { task_id }))
}

/// Start a background sender-cache refresh
pub async fn start_refresh(
    State(state): State<ServerState>,
    UserId(user_id): UserId,
) -> AppJsonResult<TaskCreated> {
    let env = scan_env(&state)?;
    let task_id = scanner::spawn_refresh(env, user_id).await?;
    Ok(Json(TaskCreated { task_id }))
}

pub async fn scan_status(
    State(state): State<ServerState>,
    Path(task_id): Path<Uuid>,
) -> AppJsonResult<ScanTask> {
    state
        .tasks
        .get_or_load(task_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound("not found".to_string()))
}

pub async fn active_task(
    State(state): State<ServerState>,
    UserId(user_id): UserId,
) -> AppJsonResult<Option<ScanTask>> {
    let task = state.tasks.list_active(&user_id).await?;
    Ok(Json(task))
}

pub async fn delete_task(
    State(state): State<ServerState>,
    Path(task_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    state.tasks.delete(task_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
