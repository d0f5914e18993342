use sqlx::sqlite::SqlitePool;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod state;

use epipe_backend::config;
use epipe_backend::pipeline::{Pipeline, SqliteLogStore};
use epipe_backend::search::{DbIndex, SearchIndex};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "epipe_backend=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 加载配置
    config::init_config().map_err(anyhow::Error::msg)?;
    let app_config = config::config();
    tracing::info!("Server will listen on {}:{}", app_config.server.host, app_config.server.port);

    std::fs::create_dir_all(app_config.get_data_dir())?;

    // 操作日志数据库
    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| app_config.get_database_url());
    let db = SqlitePool::connect(&database_url).await?;
    let log_store = SqliteLogStore::new(db.clone());
    log_store.init().await?;
    tracing::info!("Operation log database ready: {}", database_url);

    // 搜索索引
    let search_db = DbIndex::open(&app_config.get_search_db_path()).await?;
    let (index, writer) = SearchIndex::open(search_db.clone()).await?;
    tracing::info!("Search index loaded: {} documents", index.document_count());

    let pipeline = Arc::new(Pipeline::new(
        Arc::new(log_store),
        writer,
        app_config.pipeline.clone(),
    ));
    pipeline.start().await?;

    let state = Arc::new(AppState::new(
        pipeline.clone(),
        app_config.search.max_results,
        Some(search_db.clone()),
    ));

    let app = api::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let bind_address = app_config.get_bind_address();
    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    tracing::info!("Server running on http://{}", bind_address);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down propagation pipeline");
    pipeline.shutdown().await;
    search_db.close().await;
    db.close().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
}
