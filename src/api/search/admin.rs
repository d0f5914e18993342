use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use std::time::Duration;

use epipe_backend::models::{Operation, SourceTable};

use super::types::*;
use crate::api::ApiResponse;
use crate::state::{AppState, DEFAULT_AWAIT_TIMEOUT};

/// GET /api/admin/pipeline/health - 管道健康状态
pub async fn pipeline_health(
    State(state): State<Arc<AppState>>,
) -> Json<ApiResponse<PipelineHealth>> {
    let storage = match &state.search_db {
        Some(db) => db.get_stats().await.ok(),
        None => None,
    };

    Json(ApiResponse::success(PipelineHealth {
        tables: state.pipeline.monitor().health(),
        index: state.pipeline.index().stats(),
        storage,
    }))
}

/// POST /api/admin/pipeline/restart?table= - 重启消费者
pub async fn restart_consumers(
    State(state): State<Arc<AppState>>,
    Query(params): Query<TableParams>,
) -> Result<Json<ApiResponse<Vec<SourceTable>>>, ApiError> {
    let supervisor = state.pipeline.supervisor();
    let tables = match params.table.as_deref() {
        Some(raw) => {
            let table = parse_table(raw)?;
            supervisor.restart(table);
            vec![table]
        }
        None => {
            supervisor.restart_all();
            SourceTable::ALL.to_vec()
        }
    };
    tracing::info!("Consumers restarted via admin api: {:?}", tables);
    Ok(Json(ApiResponse::success(tables)))
}

/// POST /api/admin/pipeline/await?table=&timeout_ms= - 等待传播完成
pub async fn await_drained(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AwaitParams>,
) -> Result<Json<ApiResponse<DrainedResponse>>, ApiError> {
    let timeout = params
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or(DEFAULT_AWAIT_TIMEOUT);
    let monitor = state.pipeline.monitor();

    let tables = match params.table.as_deref() {
        Some(raw) => {
            let table = parse_table(raw)?;
            monitor.await_drained(table, timeout).await.map_err(propagation_error)?;
            vec![table]
        }
        None => {
            monitor.await_all_drained(timeout).await.map_err(propagation_error)?;
            SourceTable::ALL.to_vec()
        }
    };

    Ok(Json(ApiResponse::success(DrainedResponse { tables, drained: true })))
}

/// POST /api/admin/log/:table - 追加操作日志
pub async fn append_log(
    State(state): State<Arc<AppState>>,
    Path(table): Path<String>,
    Json(req): Json<AppendLogRequest>,
) -> Result<Json<ApiResponse<AppendLogResponse>>, ApiError> {
    let table = parse_table(&table)?;
    let operation: Operation = req
        .operation
        .parse()
        .map_err(|e: String| error_response(StatusCode::BAD_REQUEST, e))?;
    if req.entity_ref.trim().is_empty() {
        return Err(error_response(StatusCode::BAD_REQUEST, "entity_ref is required"));
    }

    let payload = req.payload_text();
    let sequence_id = state
        .pipeline
        .append(table, req.entity_ref.trim(), operation, &payload)
        .await
        .map_err(store_error)?;

    Ok(Json(ApiResponse::success(AppendLogResponse { table, sequence_id })))
}
