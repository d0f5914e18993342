use std::sync::Arc;
use std::time::Duration;

use epipe_backend::pipeline::Pipeline;
use epipe_backend::search::{DbIndex, QueryEngine};

/// Default wait of the admin await endpoint / 默认等待时间
pub const DEFAULT_AWAIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared application state / 应用共享状态
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub query: QueryEngine,
    /// Search database, `None` for a purely in-memory index / 搜索数据库
    pub search_db: Option<DbIndex>,
}

impl AppState {
    pub fn new(pipeline: Arc<Pipeline>, max_results: usize, search_db: Option<DbIndex>) -> Self {
        let query = QueryEngine::new(pipeline.index().clone(), max_results);
        Self { pipeline, query, search_db }
    }
}
