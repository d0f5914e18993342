//! Error types of the propagation pipeline and query surface / 传播管道与查询错误类型

use std::time::Duration;
use thiserror::Error;

use crate::models::SourceTable;

/// Malformed log entry. Poison: logged, counted, acknowledged / 格式错误的日志条目
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("invalid entity ref '{0}'")]
    EntityRef(String),

    #[error("payload is not valid JSON: {0}")]
    Payload(String),

    #[error("missing field '{0}'")]
    MissingField(&'static str),

    #[error("xattr '{name}' exceeds size limit ({len} > {max} bytes)")]
    XattrTooLarge { name: String, len: usize, max: usize },

    #[error("invalid tags encoding: {0}")]
    Tags(String),

    #[error("attribute payload mixed with other fields: {0}")]
    MixedPayload(String),

    #[error("invalid project id {0}")]
    InvalidProjectId(i64),

    #[error("unsupported operation {operation} on {target}")]
    Unsupported { operation: String, target: String },
}

/// Failure while applying a batch to the index / 批次写入索引失败
#[derive(Debug, Error)]
pub enum ApplyError {
    /// Persistence failed; the whole batch may be retried / 持久化失败，可重试
    #[error("index storage error: {0}")]
    Storage(String),

    /// Mutation contradicts a document invariant; never retried / 违反文档不变量
    #[error("conflict on {entity}: {reason}")]
    Conflict { entity: String, reason: String },
}

impl ApplyError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ApplyError::Storage(_))
    }
}

impl From<sqlx::Error> for ApplyError {
    fn from(e: sqlx::Error) -> Self {
        ApplyError::Storage(e.to_string())
    }
}

/// Operation log store failure / 操作日志存储错误
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("log store database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("log store unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt {table} entry {sequence_id}: {reason}")]
    Corrupt { table: SourceTable, sequence_id: u64, reason: String },
}

/// Failure of one consumer batch / 单个批次失败
#[derive(Debug, Error)]
pub enum BatchError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Commit kept failing; entries stay un-acked and are retried on the next poll / 批次被放弃
    #[error("{table} batch abandoned after {attempts} attempts: {source}")]
    Abandoned {
        table: SourceTable,
        attempts: u32,
        #[source]
        source: ApplyError,
    },
}

/// Errors surfaced to callers waiting on propagation / 等待传播完成时的错误
#[derive(Debug, Error)]
pub enum PropagationError {
    #[error("{table} not drained within {timeout:?} ({pending} pending)")]
    Timeout { table: SourceTable, timeout: Duration, pending: u64 },

    #[error("{table} stalled with {pending} pending after {restarts} restarts")]
    Stalled { table: SourceTable, pending: u64, restarts: u32 },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Malformed query parameters, reported synchronously / 查询参数错误
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("search term must not be empty")]
    EmptyTerm,

    #[error("unknown search kind '{0}'")]
    InvalidKind(String),

    #[error("search kind {kind} is not allowed for {endpoint} search")]
    KindNotAllowed { kind: String, endpoint: &'static str },

    #[error("invalid scope: {0}")]
    InvalidScope(String),
}
