//! Propagation pipeline - operation logs to search index / 传播管道
//!
//! Leaf-first: log_store → decoder → projector → (search index)
//! supervisor runs one consumer per table, monitor watches depth and stalls.

pub mod decoder;
pub mod log_store;
pub mod monitor;
pub mod projector;
pub mod state;
pub mod supervisor;

use std::sync::Arc;

pub use decoder::{decode, EntityBody, Mutation};
pub use log_store::{LogStore, MemoryLogStore, SqliteLogStore};
pub use monitor::Monitor;
pub use projector::Projector;
pub use state::{BatchReport, PropagationState, TableHealth};
pub use supervisor::Supervisor;

use crate::config::PipelineConfig;
use crate::error::StoreError;
use crate::models::{Operation, SourceTable};
use crate::search::{IndexWriter, SearchIndex};

/// Wires store, projector, supervisor and monitor together / 管道装配
pub struct Pipeline {
    store: Arc<dyn LogStore>,
    index: Arc<SearchIndex>,
    state: Arc<PropagationState>,
    projector: Arc<Projector>,
    supervisor: Arc<Supervisor>,
    monitor: Arc<Monitor>,
}

impl Pipeline {
    pub fn new(store: Arc<dyn LogStore>, writer: IndexWriter, config: PipelineConfig) -> Self {
        let index = writer.index().clone();
        let state = Arc::new(PropagationState::new());
        let projector = Arc::new(Projector::new(store.clone(), writer, state.clone(), config.clone()));
        let supervisor = Arc::new(Supervisor::new(projector.clone(), state.clone(), config.poll_interval()));
        let monitor = Arc::new(Monitor::new(store.clone(), state.clone(), supervisor.clone(), config));
        Self { store, index, state, projector, supervisor, monitor }
    }

    /// Seed pending counts from the store and start the consumers / 启动消费者
    pub async fn start(&self) -> Result<(), StoreError> {
        for table in SourceTable::ALL {
            let pending = self.store.count(table).await?;
            self.state.set_pending(table, pending);
            tracing::info!("{} log: {} pending entries", table, pending);
        }
        self.supervisor.start();
        Ok(())
    }

    /// Append a log entry and wake its consumer / 追加日志并唤醒消费者
    pub async fn append(
        &self,
        table: SourceTable,
        entity_ref: &str,
        operation: Operation,
        payload: &str,
    ) -> Result<u64, StoreError> {
        let sequence_id = self.store.append(table, entity_ref, operation, payload).await?;
        self.state.add_pending(table, 1);
        self.supervisor.poke(table);
        Ok(sequence_id)
    }

    pub fn index(&self) -> &Arc<SearchIndex> {
        &self.index
    }

    pub fn state(&self) -> &Arc<PropagationState> {
        &self.state
    }

    pub fn projector(&self) -> &Arc<Projector> {
        &self.projector
    }

    pub fn supervisor(&self) -> &Arc<Supervisor> {
        &self.supervisor
    }

    pub fn monitor(&self) -> &Arc<Monitor> {
        &self.monitor
    }

    pub async fn shutdown(&self) {
        self.supervisor.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::{QueryEngine, SearchKind};
    use serde_json::json;
    use std::time::Duration;

    fn config() -> PipelineConfig {
        PipelineConfig {
            poll_interval_ms: 10,
            monitor_poll_ms: 5,
            ..Default::default()
        }
    }

    async fn create(pipeline: &Pipeline, entity_ref: &str, body: serde_json::Value) {
        pipeline.append(SourceTable::Metadata, entity_ref, Operation::Create, &body.to_string()).await.unwrap();
    }

    #[tokio::test]
    async fn test_end_to_end_featurestore_search() {
        let (index, writer) = SearchIndex::new();
        let pipeline = Pipeline::new(Arc::new(MemoryLogStore::new()), writer, config());
        pipeline.start().await.unwrap();

        for (id, name) in [(1, "car1"), (2, "car2"), (3, "othername1"), (4, "othername2"), (5, "othername3")] {
            create(&pipeline, &format!("featuregroup:{}", id), json!({
                "name": name, "project_id": 1, "project_name": "demo", "version": 1
            })).await;
        }
        create(&pipeline, "featuregroup:6", json!({
            "name": "animals", "project_id": 1, "project_name": "demo", "version": 1,
            "features": [{"name": "dog", "type": "INT"}]
        })).await;
        create(&pipeline, "featuregroup:7", json!({"name": "car_other", "project_id": 2})).await;

        let xattr = |name: &str, value: &str| json!({"xattr": {"name": name, "value": value}}).to_string();
        pipeline.append(SourceTable::FileProv, "featuregroup:4", Operation::Update, &xattr("car", "audi")).await.unwrap();
        pipeline.append(SourceTable::FileProv, "featuregroup:5", Operation::Update, &xattr("hobby", "cars")).await.unwrap();
        pipeline.append(SourceTable::AppProv, "featuregroup:6", Operation::Update, &xattr("tags", r#"[{"key":"dog","value":"Luna"}]"#)).await.unwrap();

        pipeline.monitor().await_all_drained(Duration::from_secs(5)).await.unwrap();
        let engine = QueryEngine::new(index, 100);

        let results = engine.search_featurestore(1, SearchKind::Featuregroup, "car").unwrap();
        let names: Vec<&str> = results.featuregroups.iter().map(|h| h.name.as_str()).collect();
        assert_eq!(names, vec!["car1", "car2", "othername3"]);
        assert_eq!(results.featuregroups[2].highlights.other_xattrs["hobby"], "cars");

        let results = engine.search_featurestore(1, SearchKind::Featuregroup, "dog").unwrap();
        assert_eq!(results.featuregroups.len(), 1);
        assert!(results.featuregroups[0].highlights.fields().contains(&"tags"));

        let results = engine.search_featurestore(1, SearchKind::Feature, "dog").unwrap();
        assert_eq!(results.features.len(), 1);
        assert_eq!(results.features[0].featuregroup.as_ref().unwrap().id, 6);

        let global = engine.search_global(SearchKind::Featuregroup, "car").unwrap();
        assert_eq!(global.featuregroups.len(), 4);

        assert!(pipeline.monitor().health().iter().all(|h| h.pending == 0 && h.poison == 0));
        pipeline.shutdown().await;
    }

    #[tokio::test]
    async fn test_purge_project_through_log() {
        let (index, writer) = SearchIndex::new();
        let pipeline = Pipeline::new(Arc::new(MemoryLogStore::new()), writer, config());
        pipeline.start().await.unwrap();

        create(&pipeline, "dataset:1", json!({"name": "a", "project_id": 1})).await;
        create(&pipeline, "dataset:2", json!({"name": "b", "project_id": 2})).await;
        pipeline.append(SourceTable::Metadata, "project:1", Operation::Delete, "").await.unwrap();
        pipeline.monitor().await_drained(SourceTable::Metadata, Duration::from_secs(5)).await.unwrap();

        assert_eq!(index.document_count(), 1);
        pipeline.shutdown().await;
    }
}
