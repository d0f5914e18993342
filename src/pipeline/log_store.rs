//! Operation log store - append-only per-table queues / 操作日志存储
//!
//! `drain` only peeks; entries disappear on `ack`. Delivery is at-least-once.

use async_trait::async_trait;
use parking_lot::Mutex;
use sqlx::{Pool, Row, Sqlite};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::StoreError;
use crate::models::{LogEntry, Operation, SourceTable};

/// Query surface of the operation log / 操作日志接口
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Number of un-acked entries / 未确认条目数
    async fn count(&self, table: SourceTable) -> Result<u64, StoreError>;

    /// Oldest `batch_size` entries in sequence order, without removing them / 按序读取但不删除
    async fn drain(&self, table: SourceTable, batch_size: usize) -> Result<Vec<LogEntry>, StoreError>;

    /// Remove entries up to and including `up_to`, returns removed count / 确认并删除
    async fn ack(&self, table: SourceTable, up_to: u64) -> Result<u64, StoreError>;

    /// Append an entry, returns its sequence id / 追加条目
    async fn append(
        &self,
        table: SourceTable,
        entity_ref: &str,
        operation: Operation,
        payload: &str,
    ) -> Result<u64, StoreError>;
}

/// SQLite-backed log store, one table per source / SQLite 日志存储
#[derive(Clone)]
pub struct SqliteLogStore {
    db: Pool<Sqlite>,
}

impl SqliteLogStore {
    pub fn new(db: Pool<Sqlite>) -> Self {
        Self { db }
    }

    /// Create the log tables if missing / 创建日志表
    pub async fn init(&self) -> Result<(), StoreError> {
        for table in SourceTable::ALL {
            // AUTOINCREMENT keeps sequence ids monotonic after acked rows are deleted
            sqlx::query(&format!(
                r#"
                CREATE TABLE IF NOT EXISTS {} (
                    sequence_id INTEGER PRIMARY KEY AUTOINCREMENT,
                    entity_ref TEXT NOT NULL,
                    operation TEXT NOT NULL CHECK (operation IN ('CREATE', 'UPDATE', 'DELETE')),
                    payload TEXT NOT NULL DEFAULT '',
                    created_at TEXT NOT NULL
                )
                "#,
                table.table_name()
            ))
            .execute(&self.db)
            .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl LogStore for SqliteLogStore {
    async fn count(&self, table: SourceTable) -> Result<u64, StoreError> {
        let (count,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {}", table.table_name()))
            .fetch_one(&self.db)
            .await?;
        Ok(count as u64)
    }

    async fn drain(&self, table: SourceTable, batch_size: usize) -> Result<Vec<LogEntry>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT sequence_id, entity_ref, operation, payload FROM {} ORDER BY sequence_id LIMIT ?",
            table.table_name()
        ))
        .bind(batch_size as i64)
        .fetch_all(&self.db)
        .await?;

        rows.into_iter()
            .map(|row| -> Result<LogEntry, StoreError> {
                let sequence_id = row.get::<i64, _>("sequence_id") as u64;
                let operation: String = row.get("operation");
                let operation = operation.parse::<Operation>()
                    .map_err(|reason| StoreError::Corrupt { table, sequence_id, reason })?;
                Ok(LogEntry {
                    source_table: table,
                    sequence_id,
                    entity_ref: row.get("entity_ref"),
                    operation,
                    payload: row.get("payload"),
                })
            })
            .collect()
    }

    async fn ack(&self, table: SourceTable, up_to: u64) -> Result<u64, StoreError> {
        let result = sqlx::query(&format!("DELETE FROM {} WHERE sequence_id <= ?", table.table_name()))
            .bind(up_to as i64)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected())
    }

    async fn append(
        &self,
        table: SourceTable,
        entity_ref: &str,
        operation: Operation,
        payload: &str,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(&format!(
            "INSERT INTO {} (entity_ref, operation, payload, created_at) VALUES (?, ?, ?, ?)",
            table.table_name()
        ))
        .bind(entity_ref)
        .bind(operation.as_str())
        .bind(payload)
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&self.db)
        .await?;
        Ok(result.last_insert_rowid() as u64)
    }
}

#[derive(Default)]
struct MemoryTable {
    entries: VecDeque<LogEntry>,
    next_sequence: u64,
}

/// In-memory log store with drain failure injection / 内存日志存储
#[derive(Default)]
pub struct MemoryLogStore {
    tables: Mutex<[MemoryTable; 3]>,
    failing_drains: AtomicBool,
}

impl MemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `drain` fail, simulating a stuck consumer / 模拟读取失败
    pub fn fail_drains(&self, failing: bool) {
        self.failing_drains.store(failing, Ordering::SeqCst);
    }

    /// Put an already consumed entry back, simulating redelivery / 模拟重复投递
    pub fn redeliver(&self, entry: LogEntry) {
        let mut tables = self.tables.lock();
        let table = &mut tables[entry.source_table.index()];
        let pos = table.entries.iter()
            .position(|e| e.sequence_id > entry.sequence_id)
            .unwrap_or(table.entries.len());
        table.entries.insert(pos, entry);
    }
}

#[async_trait]
impl LogStore for MemoryLogStore {
    async fn count(&self, table: SourceTable) -> Result<u64, StoreError> {
        Ok(self.tables.lock()[table.index()].entries.len() as u64)
    }

    async fn drain(&self, table: SourceTable, batch_size: usize) -> Result<Vec<LogEntry>, StoreError> {
        if self.failing_drains.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(format!("{} drain failed", table)));
        }
        let tables = self.tables.lock();
        Ok(tables[table.index()].entries.iter().take(batch_size).cloned().collect())
    }

    async fn ack(&self, table: SourceTable, up_to: u64) -> Result<u64, StoreError> {
        let mut tables = self.tables.lock();
        let entries = &mut tables[table.index()].entries;
        let before = entries.len();
        entries.retain(|e| e.sequence_id > up_to);
        Ok((before - entries.len()) as u64)
    }

    async fn append(
        &self,
        table: SourceTable,
        entity_ref: &str,
        operation: Operation,
        payload: &str,
    ) -> Result<u64, StoreError> {
        let mut tables = self.tables.lock();
        let slot = &mut tables[table.index()];
        slot.next_sequence += 1;
        let sequence_id = slot.next_sequence;
        slot.entries.push_back(LogEntry {
            source_table: table,
            sequence_id,
            entity_ref: entity_ref.to_string(),
            operation,
            payload: payload.to_string(),
        });
        Ok(sequence_id)
    }
}
