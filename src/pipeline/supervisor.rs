//! Consumer supervisor - one background task per source table / 消费者监管
//!
//! Consumers sleep `poll_interval` when their table is empty and wake early on a poke.
//! `restart` aborts the task and spawns a fresh consumer.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use super::projector::Projector;
use super::state::PropagationState;
use crate::models::SourceTable;

struct Worker {
    handle: JoinHandle<()>,
    notify: Arc<Notify>,
}

pub struct Supervisor {
    projector: Arc<Projector>,
    state: Arc<PropagationState>,
    poll_interval: Duration,
    workers: Mutex<HashMap<SourceTable, Worker>>,
}

impl Supervisor {
    pub fn new(projector: Arc<Projector>, state: Arc<PropagationState>, poll_interval: Duration) -> Self {
        Self {
            projector,
            state,
            poll_interval,
            workers: Mutex::new(HashMap::new()),
        }
    }

    /// Spawn consumers for every table that has none running / 启动所有消费者
    pub fn start(&self) {
        let mut workers = self.workers.lock();
        for table in SourceTable::ALL {
            let running = workers.get(&table).is_some_and(|w| !w.handle.is_finished());
            if !running {
                workers.insert(table, self.spawn(table));
            }
        }
    }

    /// Abort the table's consumer and spawn a fresh one / 重启指定表的消费者
    pub fn restart(&self, table: SourceTable) {
        let mut workers = self.workers.lock();
        if let Some(old) = workers.remove(&table) {
            old.handle.abort();
        }
        workers.insert(table, self.spawn(table));
        self.state.record_restart(table);
        tracing::warn!("Consumer for {} restarted", table);
    }

    pub fn restart_all(&self) {
        for table in SourceTable::ALL {
            self.restart(table);
        }
    }

    /// Wake the table's consumer before its poll interval elapses / 提前唤醒消费者
    pub fn poke(&self, table: SourceTable) {
        if let Some(worker) = self.workers.lock().get(&table) {
            worker.notify.notify_one();
        }
    }

    pub fn is_running(&self, table: SourceTable) -> bool {
        self.workers.lock()
            .get(&table)
            .is_some_and(|w| !w.handle.is_finished())
    }

    /// Cancel all consumers and wait for them to stop / 停止所有消费者
    pub async fn shutdown(&self) {
        let handles: Vec<JoinHandle<()>> = self.workers.lock()
            .drain()
            .map(|(_, worker)| {
                worker.handle.abort();
                worker.handle
            })
            .collect();
        futures::future::join_all(handles).await;
        tracing::info!("All consumers stopped");
    }

    fn spawn(&self, table: SourceTable) -> Worker {
        let notify = Arc::new(Notify::new());
        // pending work may already be waiting
        notify.notify_one();
        let handle = tokio::spawn(consume(
            self.projector.clone(),
            table,
            notify.clone(),
            self.poll_interval,
        ));
        Worker { handle, notify }
    }
}

/// Consumer loop of one table / 单表消费循环
async fn consume(projector: Arc<Projector>, table: SourceTable, notify: Arc<Notify>, poll_interval: Duration) {
    tracing::info!("Consumer for {} started", table);
    loop {
        match projector.run_batch(table).await {
            Ok(report) if report.consumed > 0 => continue,
            Ok(_) => {}
            Err(e) => tracing::warn!("Consumer for {} failed a batch: {}", table, e),
        }
        tokio::select! {
            _ = notify.notified() => {}
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::models::Operation;
    use crate::pipeline::log_store::{LogStore, MemoryLogStore};
    use crate::search::SearchIndex;

    fn supervisor(store: Arc<MemoryLogStore>) -> (Supervisor, Arc<PropagationState>) {
        let (_, writer) = SearchIndex::new();
        let state = Arc::new(PropagationState::new());
        let projector = Arc::new(Projector::new(store, writer, state.clone(), PipelineConfig::default()));
        (Supervisor::new(projector, state.clone(), Duration::from_secs(60)), state)
    }

    #[tokio::test]
    async fn test_poke_wakes_idle_consumer() {
        let store = Arc::new(MemoryLogStore::new());
        let (supervisor, _) = supervisor(store.clone());
        supervisor.start();
        tokio::time::sleep(Duration::from_millis(20)).await;

        store.append(SourceTable::Metadata, "dataset:1", Operation::Create, r#"{"name":"a","project_id":1}"#).await.unwrap();
        supervisor.poke(SourceTable::Metadata);

        let drained = tokio::time::timeout(Duration::from_secs(5), async {
            while store.count(SourceTable::Metadata).await.unwrap() > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(drained.is_ok());
        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_restart_and_shutdown() {
        let store = Arc::new(MemoryLogStore::new());
        let (supervisor, state) = supervisor(store);
        supervisor.start();
        assert!(SourceTable::ALL.iter().all(|t| supervisor.is_running(*t)));

        supervisor.restart(SourceTable::FileProv);
        assert!(supervisor.is_running(SourceTable::FileProv));
        assert_eq!(state.snapshot(SourceTable::FileProv).restarts, 1);

        supervisor.restart_all();
        assert_eq!(state.snapshot(SourceTable::FileProv).restarts, 2);
        assert_eq!(state.snapshot(SourceTable::Metadata).restarts, 1);

        supervisor.shutdown().await;
        assert!(!supervisor.is_running(SourceTable::Metadata));
    }
}
