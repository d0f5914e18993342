//! Index projector - drains a table, applies mutations, acks / 索引投影器
//!
//! Per batch: drain → decode → stage → persist (retried) → publish → ack → state.
//! A crash between publish and ack only causes re-application, which the
//! applied marks turn into duplicates.

use std::sync::Arc;
use tokio::sync::Mutex;

use super::decoder::{decode, Mutation};
use super::log_store::LogStore;
use super::state::{BatchReport, PropagationState};
use crate::config::PipelineConfig;
use crate::error::{ApplyError, BatchError};
use crate::models::SourceTable;
use crate::search::{ApplyOutcome, IndexWriter, StagedBatch};

pub struct Projector {
    store: Arc<dyn LogStore>,
    writer: Mutex<IndexWriter>,
    state: Arc<PropagationState>,
    config: PipelineConfig,
}

impl Projector {
    pub fn new(
        store: Arc<dyn LogStore>,
        writer: IndexWriter,
        state: Arc<PropagationState>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            writer: Mutex::new(writer),
            state,
            config,
        }
    }

    /// Apply a single mutation outside of a log batch / 直接应用单条变更
    pub async fn apply(
        &self,
        table: SourceTable,
        sequence_id: u64,
        mutation: Mutation,
    ) -> Result<ApplyOutcome, ApplyError> {
        let mut writer = self.writer.lock().await;
        let mut batch = writer.begin(table);
        let outcome = writer.stage(&mut batch, sequence_id, mutation)?;
        self.commit(&mut writer, batch).await.map_err(|(_, e)| e)?;
        Ok(outcome)
    }

    /// Drain, apply and ack one batch of `table` / 处理一个批次
    pub async fn run_batch(&self, table: SourceTable) -> Result<BatchReport, BatchError> {
        let entries = self.store.drain(table, self.config.batch_size.max(1)).await?;
        let Some(last_sequence) = entries.last().map(|e| e.sequence_id) else {
            self.state.set_pending(table, self.store.count(table).await?);
            return Ok(BatchReport::default());
        };

        let mut report = BatchReport {
            consumed: entries.len() as u64,
            ..Default::default()
        };

        let mut writer = self.writer.lock().await;
        let mut batch = writer.begin(table);
        for entry in &entries {
            let mutation = match decode(entry) {
                Ok(mutation) => mutation,
                Err(e) => {
                    tracing::warn!(
                        "Poison entry {}#{} ({} {}): {}",
                        table, entry.sequence_id, entry.operation, entry.entity_ref, e
                    );
                    report.poison += 1;
                    continue;
                }
            };
            match writer.stage(&mut batch, entry.sequence_id, mutation) {
                Ok(ApplyOutcome::Applied) | Ok(ApplyOutcome::Purged(_)) => report.applied += 1,
                Ok(ApplyOutcome::Deferred) => report.deferred += 1,
                Ok(ApplyOutcome::Duplicate) => {
                    tracing::debug!("Dropping redelivered {}#{} for {}", table, entry.sequence_id, entry.entity_ref);
                    report.duplicates += 1;
                }
                Ok(ApplyOutcome::Stale) => {
                    tracing::debug!("Dropping {}#{}: {} was deleted", table, entry.sequence_id, entry.entity_ref);
                    report.duplicates += 1;
                }
                Err(e) => {
                    tracing::warn!("Skipping {}#{}: {}", table, entry.sequence_id, e);
                    report.poison += 1;
                }
            }
        }

        let changed = batch.changed_documents();
        if let Err((attempts, e)) = self.commit(&mut writer, batch).await {
            tracing::error!(
                "{} batch of {} entries (up to #{}) abandoned after {} attempts: {}",
                table, entries.len(), last_sequence, attempts, e
            );
            self.state.record_failed_batch(table);
            return Err(BatchError::Abandoned { table, attempts, source: e });
        }
        drop(writer);

        let acked = self.store.ack(table, last_sequence).await?;
        // the log may also be written outside this process
        let remaining = self.store.count(table).await?;
        self.state.record_batch(table, &report, last_sequence, remaining);
        tracing::debug!(
            "{} batch up to #{}: {} applied, {} deferred, {} duplicates, {} poison, {} documents changed, {} acked, {} remaining",
            table, last_sequence, report.applied, report.deferred, report.duplicates, report.poison,
            changed, acked, remaining
        );
        Ok(report)
    }

    /// Persist with exponential backoff, then publish / 持久化（指数退避重试）后发布
    async fn commit(&self, writer: &mut IndexWriter, batch: StagedBatch) -> Result<(), (u32, ApplyError)> {
        let mut attempt = 0;
        loop {
            match writer.persist(&batch).await {
                Ok(()) => break,
                Err(e) if e.is_retryable() && attempt < self.config.apply_retries => {
                    let delay = self.config.retry_backoff(attempt);
                    attempt += 1;
                    tracing::warn!(
                        "Index commit failed, retrying in {:?} (attempt {}/{}): {}",
                        delay, attempt, self.config.apply_retries, e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err((attempt + 1, e)),
            }
        }
        writer.publish(batch);
        Ok(())
    }
}
