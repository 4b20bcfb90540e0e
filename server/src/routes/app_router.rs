use axum::{
    http::{HeaderValue, StatusCode},
    response::IntoResponse,
    routing::{delete, get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{server_config::cfg, ServerState};

use super::handlers::{email, scan};

pub struct AppRouter;

impl AppRouter {
    pub fn create(state: ServerState) -> Router {
        let origins = cfg
            .http
            .allowed_origins
            .iter()
            .map(|origin| origin.parse::<HeaderValue>().unwrap())
            .collect::<Vec<_>>();

        let cors_layer = CorsLayer::new()
            .allow_origin(origins)
            .allow_credentials(true);

        Router::new()
            .route("/", get(|| async { "Mailsift server" }))
            .route("/scan", post(scan::start_scan))
            .route("/refresh", post(scan::start_refresh))
            .route("/scan-status/:task_id", get(scan::scan_status))
            .route("/tasks/active", get(scan::active_task))
            .route("/tasks/:task_id", delete(scan::delete_task))
            .route("/update-status", post(email::update_status))
            .route("/confirm", post(email::confirm))
            .layer(TraceLayer::new_for_http())
            .layer(cors_layer)
            .with_state(state)
            .fallback(handler_404)
    }
}

pub async fn handler_404() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "Route does not exist")
}
