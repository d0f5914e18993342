use axum::{
    extract::{Path, Query, State},
    Json,
};
use std::sync::Arc;

use epipe_backend::search::{SearchKind, SearchResults};

use super::types::*;
use crate::api::ApiResponse;
use crate::state::AppState;

/// POST /api/search/project/:id?term= - 项目内搜索
pub async fn search_project(
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<i64>,
    Query(params): Query<TermParams>,
) -> Result<Json<ApiResponse<SearchResults>>, ApiError> {
    let term = params.term.unwrap_or_default();
    let results = state.query.search_project(project_id, &term).map_err(query_error)?;
    Ok(Json(ApiResponse::success(results)))
}

/// GET /api/search/dataset/:id?term= - 数据集内搜索
pub async fn search_dataset(
    State(state): State<Arc<AppState>>,
    Path(dataset_id): Path<i64>,
    Query(params): Query<TermParams>,
) -> Result<Json<ApiResponse<SearchResults>>, ApiError> {
    let term = params.term.unwrap_or_default();
    let results = state.query.search_dataset(dataset_id, &term).map_err(query_error)?;
    Ok(Json(ApiResponse::success(results)))
}

/// GET /api/search/featurestore/:id?kind=&term= - 特征存储搜索
pub async fn search_featurestore(
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<i64>,
    Query(params): Query<KindTermParams>,
) -> Result<Json<ApiResponse<SearchResults>>, ApiError> {
    let kind = SearchKind::parse_param(params.kind.as_deref()).map_err(query_error)?;
    let term = params.term.unwrap_or_default();
    let results = state.query.search_featurestore(project_id, kind, &term).map_err(query_error)?;
    Ok(Json(ApiResponse::success(results)))
}

/// GET /api/search/global?kind=&term= - 全局搜索
pub async fn search_global(
    State(state): State<Arc<AppState>>,
    Query(params): Query<KindTermParams>,
) -> Result<Json<ApiResponse<SearchResults>>, ApiError> {
    let kind = SearchKind::parse_param(params.kind.as_deref()).map_err(query_error)?;
    let term = params.term.unwrap_or_default();
    let results = state.query.search_global(kind, &term).map_err(query_error)?;
    Ok(Json(ApiResponse::success(results)))
}
