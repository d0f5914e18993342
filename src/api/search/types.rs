use axum::{http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use epipe_backend::error::{PropagationError, QueryError, StoreError};
use epipe_backend::models::SourceTable;
use epipe_backend::pipeline::TableHealth;
use epipe_backend::search::{DbIndexStats, IndexStats};

/// 错误响应
pub type ApiError = (StatusCode, Json<Value>);

pub fn error_response(status: StatusCode, message: impl ToString) -> ApiError {
    (status, Json(json!({"error": message.to_string()})))
}

/// 查询参数错误 → 400
pub fn query_error(e: QueryError) -> ApiError {
    error_response(StatusCode::BAD_REQUEST, e)
}

pub fn store_error(e: StoreError) -> ApiError {
    tracing::error!("Log store error: {}", e);
    error_response(StatusCode::INTERNAL_SERVER_ERROR, e)
}

/// 超时 → 504，停滞 → 503
pub fn propagation_error(e: PropagationError) -> ApiError {
    let status = match &e {
        PropagationError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        PropagationError::Stalled { .. } => StatusCode::SERVICE_UNAVAILABLE,
        PropagationError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(status, e)
}

pub fn parse_table(raw: &str) -> Result<SourceTable, ApiError> {
    raw.parse::<SourceTable>()
        .map_err(|e| error_response(StatusCode::BAD_REQUEST, e))
}

/// 搜索参数
#[derive(Debug, Deserialize)]
pub struct TermParams {
    #[serde(default)]
    pub term: Option<String>,
}

/// 带类型的搜索参数
#[derive(Debug, Deserialize)]
pub struct KindTermParams {
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub term: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TableParams {
    #[serde(default)]
    pub table: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AwaitParams {
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// 追加日志请求
#[derive(Debug, Deserialize)]
pub struct AppendLogRequest {
    pub entity_ref: String,
    pub operation: String,
    /// JSON 对象或 JSON 文本
    #[serde(default)]
    pub payload: Value,
}

impl AppendLogRequest {
    pub fn payload_text(&self) -> String {
        match &self.payload {
            Value::Null => String::new(),
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AppendLogResponse {
    pub table: SourceTable,
    pub sequence_id: u64,
}

/// 管道健康状态
#[derive(Debug, Serialize)]
pub struct PipelineHealth {
    pub tables: Vec<TableHealth>,
    pub index: IndexStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage: Option<DbIndexStats>,
}

#[derive(Debug, Serialize)]
pub struct DrainedResponse {
    pub tables: Vec<SourceTable>,
    pub drained: bool,
}
