//! Search index - live documents plus the single writer handle / 搜索索引
//!
//! Architecture principle / 架构原则:
//! - `SearchIndex` is read-only to everyone: queries scan it under a short read lock
//! - `IndexWriter` is the only way to change it, created once together with the index
//! - Writes are staged in a `StagedBatch`, persisted, then swapped in / 先暂存，再持久化，最后替换

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use super::db_index::{DbIndex, LoadedIndex};
use crate::error::{ApplyError, StoreError};
use crate::models::{EntityKey, IndexDocument, SourceTable};
use crate::pipeline::decoder::{EntityBody, Mutation};

/// Attribute mutation parked until its document exists / 等待文档创建的属性变更
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeferredMutation {
    pub table: SourceTable,
    pub sequence_id: u64,
    pub mutation: Mutation,
}

/// Result of staging one mutation / 单条变更的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// Parked until the entity is created / 已延迟
    Deferred,
    /// At or below the applied mark / 重复投递
    Duplicate,
    /// Attribute change for an entity that was already deleted / 实体已删除
    Stale,
    /// Documents removed by a project purge / 清理的文档数
    Purged(usize),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexStats {
    pub document_count: usize,
    pub last_updated: Option<i64>,
}

/// Live search index / 在线搜索索引
pub struct SearchIndex {
    /// Document storage: key -> document / 文档存储
    documents: RwLock<HashMap<EntityKey, Arc<IndexDocument>>>,
    last_updated: AtomicI64,
}

impl SearchIndex {
    /// In-memory index without persistence / 纯内存索引
    pub fn new() -> (Arc<Self>, IndexWriter) {
        Self::assemble(LoadedIndex::default(), None, None)
    }

    /// Open a persisted index, loading documents, marks and parked mutations / 打开持久化索引
    pub async fn open(store: DbIndex) -> Result<(Arc<Self>, IndexWriter), StoreError> {
        store.init().await?;
        let loaded = store.load().await?;
        let last_updated = store.get_last_updated().await;
        tracing::info!(
            "Search index loaded: {} documents, {} marks, {} deferred entities, {} tombstones",
            loaded.documents.len(), loaded.marks.len(), loaded.deferred.len(), loaded.tombstones.len()
        );
        Ok(Self::assemble(loaded, last_updated, Some(store)))
    }

    fn assemble(
        loaded: LoadedIndex,
        last_updated: Option<i64>,
        store: Option<DbIndex>,
    ) -> (Arc<Self>, IndexWriter) {
        let LoadedIndex { documents, marks, deferred, tombstones } = loaded;
        let documents = documents.into_iter()
            .map(|doc| (doc.key(), Arc::new(doc)))
            .collect();
        let index = Arc::new(Self {
            documents: RwLock::new(documents),
            last_updated: AtomicI64::new(last_updated.unwrap_or(0)),
        });
        let writer = IndexWriter {
            index: index.clone(),
            marks,
            deferred,
            tombstones,
            store,
        };
        (index, writer)
    }

    pub fn get(&self, key: &EntityKey) -> Option<Arc<IndexDocument>> {
        self.documents.read().get(key).cloned()
    }

    pub fn document_count(&self) -> usize {
        self.documents.read().len()
    }

    /// Run `f` over all committed documents under the read lock / 在读锁下遍历文档
    pub fn scan<R>(&self, f: impl FnOnce(&mut dyn Iterator<Item = &IndexDocument>) -> R) -> R {
        let docs = self.documents.read();
        let mut iter = docs.values().map(|doc| doc.as_ref());
        f(&mut iter)
    }

    /// Get index statistics / 获取索引统计信息
    pub fn stats(&self) -> IndexStats {
        let last = self.last_updated.load(Ordering::Relaxed);
        IndexStats {
            document_count: self.document_count(),
            last_updated: (last > 0).then_some(last),
        }
    }
}

/// Changes of one batch, not yet visible to queries / 尚未对查询可见的批次变更
#[derive(Debug)]
pub struct StagedBatch {
    pub(crate) table: SourceTable,
    /// `None` marks a removal / None 表示删除
    pub(crate) documents: HashMap<EntityKey, Option<IndexDocument>>,
    pub(crate) marks: HashMap<EntityKey, u64>,
    /// Full replacement list per entity, empty clears it / 每个实体的完整延迟列表
    pub(crate) deferred: HashMap<EntityKey, Vec<DeferredMutation>>,
    /// `true` records a deletion, `false` clears it on re-creation / 删除标记
    pub(crate) tombstones: HashMap<EntityKey, bool>,
}

impl StagedBatch {
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
            && self.marks.is_empty()
            && self.deferred.is_empty()
            && self.tombstones.is_empty()
    }

    pub fn changed_documents(&self) -> usize {
        self.documents.len()
    }
}

/// The single writer of a `SearchIndex` / 索引的唯一写入者
///
/// Not `Clone`; share it behind an async mutex.
pub struct IndexWriter {
    index: Arc<SearchIndex>,
    marks: HashMap<(EntityKey, SourceTable), u64>,
    deferred: HashMap<EntityKey, Vec<DeferredMutation>>,
    /// Deleted entities; late attribute changes for them are dropped / 已删除实体
    tombstones: HashSet<EntityKey>,
    store: Option<DbIndex>,
}

impl IndexWriter {
    pub fn index(&self) -> &Arc<SearchIndex> {
        &self.index
    }

    pub fn begin(&self, table: SourceTable) -> StagedBatch {
        StagedBatch {
            table,
            documents: HashMap::new(),
            marks: HashMap::new(),
            deferred: HashMap::new(),
            tombstones: HashMap::new(),
        }
    }

    /// Committed high-water mark for (entity, table) / 已提交的高水位
    pub fn applied_mark(&self, key: &EntityKey, table: SourceTable) -> Option<u64> {
        self.marks.get(&(*key, table)).copied()
    }

    /// Number of parked attribute mutations / 延迟变更数量
    pub fn deferred_count(&self) -> usize {
        self.deferred.values().map(Vec::len).sum()
    }

    /// Stage one mutation on top of the committed index and the batch so far / 暂存一条变更
    pub fn stage(
        &self,
        batch: &mut StagedBatch,
        sequence_id: u64,
        mutation: Mutation,
    ) -> Result<ApplyOutcome, ApplyError> {
        let key = match &mutation {
            Mutation::PurgeProject { project_id } => {
                return Ok(ApplyOutcome::Purged(self.stage_purge(batch, *project_id)));
            }
            Mutation::UpsertEntity { key, .. }
            | Mutation::DeleteEntity { key }
            | Mutation::SetXattr { key, .. }
            | Mutation::RemoveXattr { key, .. }
            | Mutation::SetTags { key, .. } => *key,
        };

        if self.mark(batch, &key).is_some_and(|mark| sequence_id <= mark) {
            return Ok(ApplyOutcome::Duplicate);
        }
        batch.marks.insert(key, sequence_id);

        let current = self.current(batch, &key);
        match mutation {
            Mutation::UpsertEntity { body, .. } => {
                let doc = match current {
                    Some(mut doc) => {
                        if doc.parent_project_id != body.project_id {
                            return Err(ApplyError::Conflict {
                                entity: key.to_string(),
                                reason: format!(
                                    "parent project {} cannot change to {}",
                                    doc.parent_project_id, body.project_id
                                ),
                            });
                        }
                        merge_body(&mut doc, body);
                        doc
                    }
                    None => {
                        if self.is_tombstoned(batch, &key) {
                            batch.tombstones.insert(key, false);
                        }
                        let mut doc = IndexDocument::new(key, "", body.project_id, "");
                        merge_body(&mut doc, body);
                        let parked = self.parked(batch, &key);
                        if !parked.is_empty() {
                            tracing::debug!("Replaying {} deferred mutations for {}", parked.len(), key);
                            for deferred in parked {
                                apply_attribute(&mut doc, deferred.mutation);
                            }
                            batch.deferred.insert(key, Vec::new());
                        }
                        doc
                    }
                };
                batch.documents.insert(key, Some(doc));
                Ok(ApplyOutcome::Applied)
            }
            Mutation::DeleteEntity { .. } => {
                if current.is_some() || self.index.get(&key).is_some() {
                    batch.documents.insert(key, None);
                }
                if !self.parked(batch, &key).is_empty() {
                    batch.deferred.insert(key, Vec::new());
                }
                batch.tombstones.insert(key, true);
                Ok(ApplyOutcome::Applied)
            }
            attribute => match current {
                Some(mut doc) => {
                    apply_attribute(&mut doc, attribute);
                    batch.documents.insert(key, Some(doc));
                    Ok(ApplyOutcome::Applied)
                }
                None if self.is_tombstoned(batch, &key) => Ok(ApplyOutcome::Stale),
                None => {
                    let mut parked = self.parked(batch, &key);
                    parked.push(DeferredMutation {
                        table: batch.table,
                        sequence_id,
                        mutation: attribute,
                    });
                    batch.deferred.insert(key, parked);
                    Ok(ApplyOutcome::Deferred)
                }
            },
        }
    }

    /// Persist a staged batch in one transaction; no-op without a store / 在一个事务中持久化
    pub async fn persist(&self, batch: &StagedBatch) -> Result<(), ApplyError> {
        match &self.store {
            Some(store) if !batch.is_empty() => store.persist(batch).await,
            _ => Ok(()),
        }
    }

    /// Swap a persisted batch into the live index / 将已持久化的批次替换到在线索引
    pub fn publish(&mut self, batch: StagedBatch) {
        let table = batch.table;
        let documents: Vec<(EntityKey, Option<Arc<IndexDocument>>)> = batch.documents
            .into_iter()
            .map(|(key, doc)| (key, doc.map(Arc::new)))
            .collect();

        if !documents.is_empty() {
            let mut live = self.index.documents.write();
            for (key, doc) in documents {
                match doc {
                    Some(doc) => {
                        live.insert(key, doc);
                    }
                    None => {
                        live.remove(&key);
                    }
                }
            }
        }

        for (key, seq) in batch.marks {
            self.marks.insert((key, table), seq);
        }
        for (key, parked) in batch.deferred {
            if parked.is_empty() {
                self.deferred.remove(&key);
            } else {
                self.deferred.insert(key, parked);
            }
        }
        for (key, deleted) in batch.tombstones {
            if deleted {
                self.tombstones.insert(key);
            } else {
                self.tombstones.remove(&key);
            }
        }
        self.index.last_updated.store(chrono::Utc::now().timestamp(), Ordering::Relaxed);
    }

    fn mark(&self, batch: &StagedBatch, key: &EntityKey) -> Option<u64> {
        batch.marks.get(key).copied().or_else(|| self.applied_mark(key, batch.table))
    }

    fn current(&self, batch: &StagedBatch, key: &EntityKey) -> Option<IndexDocument> {
        match batch.documents.get(key) {
            Some(staged) => staged.clone(),
            None => self.index.get(key).map(|doc| doc.as_ref().clone()),
        }
    }

    fn is_tombstoned(&self, batch: &StagedBatch, key: &EntityKey) -> bool {
        batch.tombstones.get(key).copied().unwrap_or_else(|| self.tombstones.contains(key))
    }

    fn parked(&self, batch: &StagedBatch, key: &EntityKey) -> Vec<DeferredMutation> {
        batch.deferred.get(key)
            .or_else(|| self.deferred.get(key))
            .cloned()
            .unwrap_or_default()
    }

    fn stage_purge(&self, batch: &mut StagedBatch, project_id: i64) -> usize {
        let mut doomed: Vec<EntityKey> = self.index.scan(|docs| {
            docs.filter(|doc| doc.parent_project_id == project_id)
                .map(IndexDocument::key)
                .filter(|key| !matches!(batch.documents.get(key), Some(None)))
                .collect()
        });
        for (key, doc) in &batch.documents {
            if doc.as_ref().is_some_and(|d| d.parent_project_id == project_id) && !doomed.contains(key) {
                doomed.push(*key);
            }
        }

        for key in &doomed {
            batch.documents.insert(*key, None);
            batch.tombstones.insert(*key, true);
            if !self.parked(batch, key).is_empty() {
                batch.deferred.insert(*key, Vec::new());
            }
        }
        tracing::info!("Purging {} documents of removed project {}", doomed.len(), project_id);
        doomed.len()
    }
}

/// Present fields overwrite, absent keep / 有值覆盖，无值保留
fn merge_body(doc: &mut IndexDocument, body: EntityBody) {
    doc.name = body.name;
    if !body.project_name.is_empty() {
        doc.parent_project_name = body.project_name;
    }
    if body.dataset_id.is_some() {
        doc.dataset_id = body.dataset_id;
    }
    if body.version.is_some() {
        doc.version = body.version;
    }
    if body.description.is_some() {
        doc.description = body.description;
    }
    if body.creator.is_some() {
        doc.creator = body.creator;
    }
    if body.created.is_some() {
        doc.created = body.created;
    }
    if body.featurestore_id.is_some() {
        doc.featurestore_id = body.featurestore_id;
    }
    if let Some(features) = body.features {
        doc.features = features;
    }
}

fn apply_attribute(doc: &mut IndexDocument, mutation: Mutation) {
    match mutation {
        Mutation::SetXattr { name, value, .. } => {
            doc.xattrs.insert(name, value);
        }
        Mutation::RemoveXattr { name, .. } => {
            doc.xattrs.remove(&name);
        }
        Mutation::SetTags { tags, .. } => doc.tags = tags,
        _ => {}
    }
}
