//! Propagation monitor - pending depth, drain waits and stall handling / 传播监控

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::log_store::LogStore;
use super::state::{PropagationState, TableHealth};
use super::supervisor::Supervisor;
use crate::config::PipelineConfig;
use crate::error::PropagationError;
use crate::models::SourceTable;

pub struct Monitor {
    store: Arc<dyn LogStore>,
    state: Arc<PropagationState>,
    supervisor: Arc<Supervisor>,
    config: PipelineConfig,
}

impl Monitor {
    pub fn new(
        store: Arc<dyn LogStore>,
        state: Arc<PropagationState>,
        supervisor: Arc<Supervisor>,
        config: PipelineConfig,
    ) -> Self {
        Self { store, state, supervisor, config }
    }

    /// Pending entries as last seen by the projector / 待处理条目数
    pub fn pending_count(&self, table: SourceTable) -> u64 {
        self.state.pending(table)
    }

    pub fn health(&self) -> Vec<TableHealth> {
        self.state.health()
    }

    /// Wait until `table` has no un-acked entries / 等待表被消费完
    ///
    /// A table whose count does not decrease for `stall_after` gets its consumer
    /// restarted; after `restart_repeat` restarts the wait fails with `Stalled`.
    /// Exceeding `timeout` fails with `Timeout`.
    pub async fn await_drained(&self, table: SourceTable, timeout: Duration) -> Result<(), PropagationError> {
        match tokio::time::timeout(timeout, self.watch(table)).await {
            Ok(result) => result,
            Err(_) => {
                let pending = match self.store.count(table).await {
                    Ok(count) => count,
                    Err(_) => self.state.pending(table),
                };
                tracing::warn!("{} not drained within {:?}, {} pending", table, timeout, pending);
                Err(PropagationError::Timeout { table, timeout, pending })
            }
        }
    }

    /// `await_drained` for every table under one shared deadline / 等待所有表
    pub async fn await_all_drained(&self, timeout: Duration) -> Result<(), PropagationError> {
        let deadline = Instant::now() + timeout;
        for table in SourceTable::ALL {
            let remaining = deadline.saturating_duration_since(Instant::now());
            self.await_drained(table, remaining).await?;
        }
        Ok(())
    }

    async fn watch(&self, table: SourceTable) -> Result<(), PropagationError> {
        let stall_after = self.config.stall_after();
        let mut restarts = 0u32;
        let mut lowest = u64::MAX;
        let mut last_progress = Instant::now();

        loop {
            let pending = self.store.count(table).await?;
            if pending == 0 {
                return Ok(());
            }

            if pending < lowest {
                lowest = pending;
                last_progress = Instant::now();
            } else if last_progress.elapsed() >= stall_after {
                if restarts >= self.config.restart_repeat {
                    tracing::error!("{} stalled with {} pending after {} restarts", table, pending, restarts);
                    return Err(PropagationError::Stalled { table, pending, restarts });
                }
                restarts += 1;
                tracing::warn!(
                    "{} made no progress for {:?} ({} pending), restarting consumer ({}/{})",
                    table, stall_after, pending, restarts, self.config.restart_repeat
                );
                self.supervisor.restart(table);
                last_progress = Instant::now();
            }

            tokio::time::sleep(self.config.monitor_poll()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Operation;
    use crate::pipeline::log_store::MemoryLogStore;
    use crate::pipeline::projector::Projector;
    use crate::search::SearchIndex;

    fn config() -> PipelineConfig {
        PipelineConfig {
            poll_interval_ms: 10,
            monitor_poll_ms: 5,
            stall_after_ms: 50,
            restart_repeat: 2,
            ..Default::default()
        }
    }

    fn monitor(store: Arc<MemoryLogStore>, config: PipelineConfig) -> (Monitor, Arc<Supervisor>) {
        let (_, writer) = SearchIndex::new();
        let state = Arc::new(PropagationState::new());
        let projector = Arc::new(Projector::new(store.clone(), writer, state.clone(), config.clone()));
        let supervisor = Arc::new(Supervisor::new(projector, state.clone(), config.poll_interval()));
        (Monitor::new(store, state, supervisor.clone(), config), supervisor)
    }

    async fn fill(store: &MemoryLogStore, table: SourceTable, n: i64) {
        for i in 0..n {
            let payload = format!(r#"{{"name":"d{}","project_id":1}}"#, i);
            store.append(table, &format!("dataset:{}", i), Operation::Create, &payload).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_await_drained_with_running_consumers() {
        let store = Arc::new(MemoryLogStore::new());
        let (monitor, supervisor) = monitor(store.clone(), config());
        fill(&store, SourceTable::Metadata, 20).await;
        fill(&store, SourceTable::AppProv, 3).await;
        supervisor.start();

        monitor.await_all_drained(Duration::from_secs(5)).await.unwrap();
        assert_eq!(monitor.pending_count(SourceTable::Metadata), 0);
        assert_eq!(monitor.health()[0].applied, 20);
        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_empty_table_is_drained() {
        let store = Arc::new(MemoryLogStore::new());
        let (monitor, _) = monitor(store, config());
        monitor.await_drained(SourceTable::FileProv, Duration::from_millis(10)).await.unwrap();
    }

    #[tokio::test]
    async fn test_timeout_is_distinguishable() {
        let store = Arc::new(MemoryLogStore::new());
        let slow = PipelineConfig { stall_after_ms: 60_000, ..config() };
        let (monitor, _) = monitor(store.clone(), slow);
        fill(&store, SourceTable::Metadata, 2).await;

        let err = monitor.await_drained(SourceTable::Metadata, Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(err, PropagationError::Timeout { pending: 2, .. }));
    }

    #[tokio::test]
    async fn test_stall_restarts_then_fails() {
        let store = Arc::new(MemoryLogStore::new());
        let (monitor, supervisor) = monitor(store.clone(), config());
        fill(&store, SourceTable::FileProv, 1).await;
        store.fail_drains(true);
        supervisor.start();

        let err = monitor.await_drained(SourceTable::FileProv, Duration::from_secs(5)).await.unwrap_err();
        match err {
            PropagationError::Stalled { table, pending, restarts } => {
                assert_eq!(table, SourceTable::FileProv);
                assert_eq!(pending, 1);
                assert_eq!(restarts, 2);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(monitor.health()[1].restarts, 2);
        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_drains_after_transient_store_failure() {
        let store = Arc::new(MemoryLogStore::new());
        let (monitor, supervisor) = monitor(store.clone(), config());
        fill(&store, SourceTable::Metadata, 1).await;
        store.fail_drains(true);
        supervisor.start();

        let healer = {
            let store = store.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                store.fail_drains(false);
            })
        };
        monitor.await_drained(SourceTable::Metadata, Duration::from_secs(5)).await.unwrap();
        healer.await.unwrap();
        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_pending_is_non_increasing_without_appends() {
        let store = Arc::new(MemoryLogStore::new());
        let small = PipelineConfig { batch_size: 3, ..config() };
        let (_, writer) = SearchIndex::new();
        let state = Arc::new(PropagationState::new());
        let projector = Projector::new(store.clone(), writer, state.clone(), small);
        fill(&store, SourceTable::Metadata, 10).await;
        state.add_pending(SourceTable::Metadata, 10);

        let mut previous = state.pending(SourceTable::Metadata);
        loop {
            let report = projector.run_batch(SourceTable::Metadata).await.unwrap();
            let pending = state.pending(SourceTable::Metadata);
            assert!(pending <= previous);
            previous = pending;
            if report.consumed == 0 {
                break;
            }
        }
        assert_eq!(previous, 0);
    }
}
