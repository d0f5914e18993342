//! Application configuration module / 应用配置模块
//!
//! Manages application configuration loaded from config.json
//! Creates default config file on first run / 首次运行时创建默认配置文件

use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Global configuration instance / 全局配置实例
static CONFIG: OnceCell<Arc<RwLock<AppConfig>>> = OnceCell::new();

/// Application configuration / 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration / 服务器配置
    #[serde(default)]
    pub server: ServerConfig,
    /// Operation log database configuration / 操作日志数据库配置
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Search index configuration / 搜索索引配置
    #[serde(default)]
    pub search: SearchConfig,
    /// Propagation pipeline configuration / 传播管道配置
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// Server configuration / 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server host address / 服务器监听地址
    pub host: String,
    /// Server port / 服务器端口
    pub port: u16,
}

/// Database configuration / 数据库配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Data directory path / 数据目录路径
    pub data_dir: String,
    /// Operation log database file (relative to data_dir) / 操作日志数据库文件
    pub db_file: String,
}

/// Search configuration / 搜索配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Search database directory (relative to data_dir) / 搜索数据库目录
    pub db_dir: String,
    /// Search database file name / 搜索数据库文件名
    pub db_file: String,
    /// Default result cap when a query gives none / 默认最大结果数
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

fn default_max_results() -> usize { 1000 }

/// Pipeline configuration / 管道配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Entries drained per batch / 每批拉取条目数
    pub batch_size: usize,
    /// Idle sleep of a consumer when its table is empty / 空闲轮询间隔
    pub poll_interval_ms: u64,
    /// Retries of a failed batch commit / 批次提交重试次数
    pub apply_retries: u32,
    /// Base backoff between commit retries (doubles each attempt) / 重试退避基数
    pub retry_backoff_ms: u64,
    /// Monitor poll interval / 监控轮询间隔
    pub monitor_poll_ms: u64,
    /// No-progress window after which a consumer counts as stalled / 停滞判定窗口
    pub stall_after_ms: u64,
    /// Restarts attempted before a stall becomes fatal / 最大重启次数
    pub restart_repeat: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8181,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            data_dir: "data".to_string(),
            db_file: "epipe.db".to_string(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            db_dir: "search".to_string(),
            db_file: "index.db".to_string(),
            max_results: default_max_results(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 500,
            poll_interval_ms: 200,
            apply_retries: 3,
            retry_backoff_ms: 100,
            monitor_poll_ms: 100,
            stall_after_ms: 5000,
            restart_repeat: 3,
        }
    }
}

impl PipelineConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn monitor_poll(&self) -> Duration {
        Duration::from_millis(self.monitor_poll_ms)
    }

    pub fn stall_after(&self) -> Duration {
        Duration::from_millis(self.stall_after_ms)
    }

    /// Backoff before retry number `attempt` (0-based) / 第 attempt 次重试前的退避时间
    pub fn retry_backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.min(10);
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(factor))
    }
}

impl AppConfig {
    /// Get the full log database URL / 获取完整的日志数据库URL
    pub fn get_database_url(&self) -> String {
        let db_path = Path::new(&self.database.data_dir).join(&self.database.db_file);
        format!("sqlite:{}?mode=rwc", db_path.to_string_lossy())
    }

    /// Get the full data directory path / 获取完整的数据目录路径
    pub fn get_data_dir(&self) -> PathBuf {
        PathBuf::from(&self.database.data_dir)
    }

    /// Get the full search database path / 获取完整的搜索数据库路径
    pub fn get_search_db_path(&self) -> PathBuf {
        self.get_search_db_dir().join(&self.search.db_file)
    }

    /// Get search database directory / 获取搜索数据库目录
    pub fn get_search_db_dir(&self) -> PathBuf {
        let data_dir = self.get_data_dir();
        if self.search.db_dir.is_empty() {
            data_dir
        } else {
            data_dir.join(&self.search.db_dir)
        }
    }

    /// Get the server bind address / 获取服务器绑定地址
    pub fn get_bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

/// Get the config file path / 获取配置文件路径
fn get_config_path() -> PathBuf {
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join("config.json")
}

/// Load configuration from file, or create default if not exists / 加载配置文件，不存在则创建默认配置
pub fn load_config() -> Result<AppConfig, String> {
    load_config_from(&get_config_path())
}

/// Load configuration from an explicit path / 从指定路径加载配置
pub fn load_config_from(config_path: &Path) -> Result<AppConfig, String> {
    if config_path.exists() {
        let content = std::fs::read_to_string(config_path)
            .map_err(|e| format!("Failed to read config file: {}", e))?;

        let config: AppConfig = serde_json::from_str(&content)
            .map_err(|e| format!("Failed to parse config file: {}", e))?;

        tracing::info!("Loaded configuration from {:?}", config_path);
        Ok(config)
    } else {
        let config = AppConfig::default();
        save_config_to(&config, config_path)?;
        tracing::info!("Created default configuration at {:?}", config_path);
        Ok(config)
    }
}

fn save_config_to(config: &AppConfig, config_path: &Path) -> Result<(), String> {
    let content = serde_json::to_string_pretty(config)
        .map_err(|e| format!("Failed to serialize config: {}", e))?;

    std::fs::write(config_path, content)
        .map_err(|e| format!("Failed to write config file: {}", e))?;

    Ok(())
}

/// Initialize global configuration / 初始化全局配置
pub fn init_config() -> Result<Arc<RwLock<AppConfig>>, String> {
    let config = load_config()?;

    let config_arc = Arc::new(RwLock::new(config));

    CONFIG.set(config_arc.clone())
        .map_err(|_| "Config already initialized".to_string())?;

    Ok(config_arc)
}

/// Get global configuration instance / 获取全局配置实例
pub fn get_config() -> Arc<RwLock<AppConfig>> {
    CONFIG.get_or_init(|| {
        let config = load_config().unwrap_or_default();
        Arc::new(RwLock::new(config))
    }).clone()
}

/// Get a read-only snapshot of current config / 获取当前配置的只读快照
pub fn config() -> AppConfig {
    get_config().read().clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_written_and_reloaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let created = load_config_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(created.pipeline.batch_size, 500);

        let reloaded = load_config_from(&path).unwrap();
        assert_eq!(reloaded.server.port, created.server.port);
        assert_eq!(reloaded.search.max_results, 1000);
    }

    #[test]
    fn test_partial_pipeline_section_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"pipeline": {"batch_size": 10}}"#).unwrap();

        let config = load_config_from(&path).unwrap();
        assert_eq!(config.pipeline.batch_size, 10);
        assert_eq!(config.pipeline.restart_repeat, 3);
        assert_eq!(config.database.db_file, "epipe.db");
    }

    #[test]
    fn test_retry_backoff_doubles() {
        let pipeline = PipelineConfig { retry_backoff_ms: 50, ..Default::default() };
        assert_eq!(pipeline.retry_backoff(0), Duration::from_millis(50));
        assert_eq!(pipeline.retry_backoff(2), Duration::from_millis(200));
    }

    #[test]
    fn test_search_db_path_under_data_dir() {
        let config = AppConfig::default();
        assert_eq!(config.get_search_db_path(), PathBuf::from("data").join("search").join("index.db"));
        assert_eq!(config.get_bind_address(), "0.0.0.0:8181");
    }
}
