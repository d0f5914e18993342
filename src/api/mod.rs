pub mod search;
pub mod server;

use axum::{
    routing::{get, post},
    Router,
};
use serde::Serialize;
use std::sync::Arc;

use crate::state::AppState;

#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: 200,
            message: "success".to_string(),
            data: Some(data),
        }
    }
}

/// Build the API router / 构建路由
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(server::health_check))
        .route("/api/search/project/:id", post(search::search_project))
        .route("/api/search/dataset/:id", get(search::search_dataset))
        .route("/api/search/featurestore/:id", get(search::search_featurestore))
        .route("/api/search/global", get(search::search_global))
        .route("/api/admin/pipeline/health", get(search::pipeline_health))
        .route("/api/admin/pipeline/restart", post(search::restart_consumers))
        .route("/api/admin/pipeline/await", post(search::await_drained))
        .route("/api/admin/log/:table", post(search::append_log))
        .with_state(state)
}
