//! 数据库搜索索引 - 索引文档持久化
//!
//! 存储方案：
//! - index_documents：每个实体一行，文档体以 JSON 存储
//! - applied_marks：每个 (实体, 来源表) 的已应用高水位，删除文档后仍保留
//! - deferred_mutations：等待实体创建的属性变更
//! - index_tombstones：已删除的实体，迟到的属性变更直接丢弃
//! - index_meta：索引更新时间等信息
//!
//! 特性：
//! - 独立SQLite + WAL模式（并发安全）
//! - 每个批次在一个事务中写入

use sqlx::{sqlite::SqlitePoolOptions, Pool, Sqlite};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

use super::engine::{DeferredMutation, StagedBatch};
use crate::error::{ApplyError, StoreError};
use crate::models::{EntityKey, EntityType, IndexDocument, SourceTable};

/// 索引统计
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DbIndexStats {
    pub document_count: u64,
    pub mark_count: u64,
    pub deferred_count: u64,
    pub tombstone_count: u64,
    pub last_updated: Option<i64>,
}

/// 启动时加载的索引状态
#[derive(Debug, Default)]
pub struct LoadedIndex {
    pub documents: Vec<IndexDocument>,
    pub marks: HashMap<(EntityKey, SourceTable), u64>,
    pub deferred: HashMap<EntityKey, Vec<DeferredMutation>>,
    pub tombstones: HashSet<EntityKey>,
}

/// 数据库搜索索引
#[derive(Clone)]
pub struct DbIndex {
    db: Pool<Sqlite>,
}

impl DbIndex {
    /// 创建独立的搜索数据库（使用WAL模式）
    pub async fn open(db_path: &Path) -> Result<Self, StoreError> {
        // 确保目录存在
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let db_url = format!("sqlite:{}?mode=rwc", db_path.to_string_lossy());

        let db = SqlitePoolOptions::new()
            .max_connections(4)
            .connect(&db_url)
            .await?;

        // 启用WAL模式，提高并发性能
        sqlx::query("PRAGMA journal_mode=WAL").execute(&db).await?;
        // 设置busy_timeout，避免锁超时
        sqlx::query("PRAGMA busy_timeout=5000").execute(&db).await?;
        // 优化写入性能
        sqlx::query("PRAGMA synchronous=NORMAL").execute(&db).await?;

        tracing::info!("Search database opened: {:?} (WAL mode)", db_path);

        Ok(Self { db })
    }

    /// 使用现有数据库连接池
    pub fn new(db: Pool<Sqlite>) -> Self {
        Self { db }
    }

    /// 关闭数据库连接池 / Close database connection pool
    pub async fn close(&self) {
        self.db.close().await;
    }

    /// 初始化表结构，只在表不存在时创建
    pub async fn init(&self) -> Result<(), StoreError> {
        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS index_documents (
                entity_type TEXT NOT NULL,
                entity_id INTEGER NOT NULL,
                project_id INTEGER NOT NULL,
                body TEXT NOT NULL,
                PRIMARY KEY(entity_type, entity_id)
            ) WITHOUT ROWID
        "#)
        .execute(&self.db)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_project ON index_documents(project_id)")
            .execute(&self.db)
            .await?;

        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS applied_marks (
                entity_type TEXT NOT NULL,
                entity_id INTEGER NOT NULL,
                source_table TEXT NOT NULL,
                sequence_id INTEGER NOT NULL,
                PRIMARY KEY(entity_type, entity_id, source_table)
            ) WITHOUT ROWID
        "#)
        .execute(&self.db)
        .await?;

        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS deferred_mutations (
                entity_type TEXT NOT NULL,
                entity_id INTEGER NOT NULL,
                body TEXT NOT NULL,
                PRIMARY KEY(entity_type, entity_id)
            ) WITHOUT ROWID
        "#)
        .execute(&self.db)
        .await?;

        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS index_tombstones (
                entity_type TEXT NOT NULL,
                entity_id INTEGER NOT NULL,
                PRIMARY KEY(entity_type, entity_id)
            ) WITHOUT ROWID
        "#)
        .execute(&self.db)
        .await?;

        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS index_meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )
        "#)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    /// 加载全部持久化状态，无法解析的行记录警告后跳过
    pub async fn load(&self) -> Result<LoadedIndex, StoreError> {
        let mut loaded = LoadedIndex::default();

        let rows: Vec<(String, i64, String)> = sqlx::query_as(
            "SELECT entity_type, entity_id, body FROM index_documents"
        )
        .fetch_all(&self.db)
        .await?;
        for (entity_type, entity_id, body) in rows {
            match serde_json::from_str::<IndexDocument>(&body) {
                Ok(doc) => loaded.documents.push(doc),
                Err(e) => tracing::warn!("Skipping unreadable document {}:{}: {}", entity_type, entity_id, e),
            }
        }

        let rows: Vec<(String, i64, String, i64)> = sqlx::query_as(
            "SELECT entity_type, entity_id, source_table, sequence_id FROM applied_marks"
        )
        .fetch_all(&self.db)
        .await?;
        for (entity_type, entity_id, source_table, sequence_id) in rows {
            let (Some(key), Ok(table)) = (parse_key(&entity_type, entity_id), source_table.parse::<SourceTable>()) else {
                tracing::warn!("Skipping unreadable mark {}:{} ({})", entity_type, entity_id, source_table);
                continue;
            };
            loaded.marks.insert((key, table), sequence_id as u64);
        }

        let rows: Vec<(String, i64, String)> = sqlx::query_as(
            "SELECT entity_type, entity_id, body FROM deferred_mutations"
        )
        .fetch_all(&self.db)
        .await?;
        for (entity_type, entity_id, body) in rows {
            let key = parse_key(&entity_type, entity_id);
            match (key, serde_json::from_str::<Vec<DeferredMutation>>(&body)) {
                (Some(key), Ok(parked)) => {
                    loaded.deferred.insert(key, parked);
                }
                _ => tracing::warn!("Skipping unreadable deferred mutations of {}:{}", entity_type, entity_id),
            }
        }

        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT entity_type, entity_id FROM index_tombstones"
        )
        .fetch_all(&self.db)
        .await?;
        for (entity_type, entity_id) in rows {
            match parse_key(&entity_type, entity_id) {
                Some(key) => {
                    loaded.tombstones.insert(key);
                }
                None => tracing::warn!("Skipping unreadable tombstone {}:{}", entity_type, entity_id),
            }
        }

        Ok(loaded)
    }

    /// 在一个事务中写入批次（文档、高水位、延迟变更、更新时间）
    pub async fn persist(&self, batch: &StagedBatch) -> Result<(), ApplyError> {
        let mut tx = self.db.begin().await?;

        for (key, doc) in &batch.documents {
            match doc {
                Some(doc) => {
                    let body = serde_json::to_string(doc)
                        .map_err(|e| ApplyError::Storage(e.to_string()))?;
                    sqlx::query(
                        "INSERT OR REPLACE INTO index_documents (entity_type, entity_id, project_id, body) VALUES (?, ?, ?, ?)"
                    )
                    .bind(key.entity_type.as_str())
                    .bind(key.entity_id)
                    .bind(doc.parent_project_id)
                    .bind(body)
                    .execute(&mut *tx)
                    .await?;
                }
                None => {
                    sqlx::query("DELETE FROM index_documents WHERE entity_type = ? AND entity_id = ?")
                        .bind(key.entity_type.as_str())
                        .bind(key.entity_id)
                        .execute(&mut *tx)
                        .await?;
                }
            }
        }

        for (key, sequence_id) in &batch.marks {
            sqlx::query(
                "INSERT OR REPLACE INTO applied_marks (entity_type, entity_id, source_table, sequence_id) VALUES (?, ?, ?, ?)"
            )
            .bind(key.entity_type.as_str())
            .bind(key.entity_id)
            .bind(batch.table.as_str())
            .bind(*sequence_id as i64)
            .execute(&mut *tx)
            .await?;
        }

        for (key, parked) in &batch.deferred {
            if parked.is_empty() {
                sqlx::query("DELETE FROM deferred_mutations WHERE entity_type = ? AND entity_id = ?")
                    .bind(key.entity_type.as_str())
                    .bind(key.entity_id)
                    .execute(&mut *tx)
                    .await?;
                continue;
            }
            let body = serde_json::to_string(parked)
                .map_err(|e| ApplyError::Storage(e.to_string()))?;
            sqlx::query(
                "INSERT OR REPLACE INTO deferred_mutations (entity_type, entity_id, body) VALUES (?, ?, ?)"
            )
            .bind(key.entity_type.as_str())
            .bind(key.entity_id)
            .bind(body)
            .execute(&mut *tx)
            .await?;
        }

        for (key, deleted) in &batch.tombstones {
            let sql = if *deleted {
                "INSERT OR REPLACE INTO index_tombstones (entity_type, entity_id) VALUES (?, ?)"
            } else {
                "DELETE FROM index_tombstones WHERE entity_type = ? AND entity_id = ?"
            };
            sqlx::query(sql)
                .bind(key.entity_type.as_str())
                .bind(key.entity_id)
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query("INSERT OR REPLACE INTO index_meta (key, value) VALUES ('last_updated', ?)")
            .bind(chrono::Utc::now().timestamp().to_string())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// 获取索引更新时间 / Get index last updated time
    pub async fn get_last_updated(&self) -> Option<i64> {
        let result: Option<(String,)> = sqlx::query_as(
            "SELECT value FROM index_meta WHERE key = 'last_updated'"
        )
        .fetch_optional(&self.db)
        .await
        .ok()
        .flatten();

        result.and_then(|(v,)| v.parse::<i64>().ok())
    }

    /// 获取索引统计
    pub async fn get_stats(&self) -> Result<DbIndexStats, StoreError> {
        let (document_count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM index_documents")
            .fetch_one(&self.db)
            .await?;
        let (mark_count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM applied_marks")
            .fetch_one(&self.db)
            .await?;
        let (deferred_count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM deferred_mutations")
            .fetch_one(&self.db)
            .await?;
        let (tombstone_count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM index_tombstones")
            .fetch_one(&self.db)
            .await?;

        Ok(DbIndexStats {
            document_count: document_count as u64,
            mark_count: mark_count as u64,
            deferred_count: deferred_count as u64,
            tombstone_count: tombstone_count as u64,
            last_updated: self.get_last_updated().await,
        })
    }
}

fn parse_key(entity_type: &str, entity_id: i64) -> Option<EntityKey> {
    entity_type.parse::<EntityType>().ok().map(|t| EntityKey::new(t, entity_id))
}
