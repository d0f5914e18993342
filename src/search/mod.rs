//! Search module - index documents and query them / 搜索模块
//!
//! Architecture principles / 架构原则：
//! - The live index is read-only; `IndexWriter` is its single writer
//! - The pipeline drives writes, queries never wait on it / 查询从不等待写入
//! - Call direction: Pipeline → Search (unidirectional) / 调用方向
//!
//! Index features / 索引特性：
//! - In-memory documents keyed by (entity_type, entity_id)
//! - SQLite persistence of documents, applied marks and deferred mutations
//! - Case-insensitive substring/token matching on names, xattrs, tags and features

pub mod db_index;
pub mod engine;
pub mod query;
pub mod schema;
pub mod tokenizer;

pub use db_index::{DbIndex, DbIndexStats};
pub use engine::{ApplyOutcome, IndexStats, IndexWriter, SearchIndex, StagedBatch};
pub use query::QueryEngine;
pub use schema::{Highlights, OwnerRef, Scope, SearchHit, SearchKind, SearchQuery, SearchResults};
