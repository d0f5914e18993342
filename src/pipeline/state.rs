//! Propagation state - lock-free per-table counters / 传播状态
//!
//! Written by the projector (restarts by the supervisor), read by the monitor and health probe.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use crate::models::SourceTable;

/// Counters of a single batch / 单个批次的统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    /// Entries drained in this batch / 本批次读取条目数
    pub consumed: u64,
    pub applied: u64,
    pub deferred: u64,
    /// Redelivered entries and changes for deleted entities / 重复或过期条目
    pub duplicates: u64,
    /// Undecodable or conflicting entries, skipped / 毒条目
    pub poison: u64,
}

/// Health snapshot of one table / 单表健康状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableHealth {
    pub table: SourceTable,
    pub pending: u64,
    pub applied: u64,
    pub deferred: u64,
    pub duplicates: u64,
    pub poison: u64,
    pub failed_batches: u64,
    pub restarts: u64,
    pub last_sequence: Option<u64>,
    /// Unix seconds of the last committed batch / 最后提交时间
    pub last_batch_at: Option<i64>,
}

#[derive(Default)]
struct TableCounters {
    pending: AtomicU64,
    applied: AtomicU64,
    deferred: AtomicU64,
    duplicates: AtomicU64,
    poison: AtomicU64,
    failed_batches: AtomicU64,
    restarts: AtomicU64,
    last_sequence: AtomicU64,
    last_batch_at: AtomicI64,
}

/// Process-wide propagation state / 全局传播状态
#[derive(Default)]
pub struct PropagationState {
    tables: [TableCounters; 3],
}

impl PropagationState {
    pub fn new() -> Self {
        Self::default()
    }

    fn counters(&self, table: SourceTable) -> &TableCounters {
        &self.tables[table.index()]
    }

    pub fn pending(&self, table: SourceTable) -> u64 {
        self.counters(table).pending.load(Ordering::SeqCst)
    }

    /// Overwrite pending with the store's authoritative count / 用存储的实际数量覆盖
    pub fn set_pending(&self, table: SourceTable, pending: u64) {
        self.counters(table).pending.store(pending, Ordering::SeqCst);
    }

    pub fn add_pending(&self, table: SourceTable, n: u64) {
        self.counters(table).pending.fetch_add(n, Ordering::SeqCst);
    }

    /// Record a committed batch; `remaining` is the store's count after the ack / 记录已提交批次
    pub fn record_batch(&self, table: SourceTable, report: &BatchReport, last_sequence: u64, remaining: u64) {
        let c = self.counters(table);
        c.pending.store(remaining, Ordering::SeqCst);
        c.applied.fetch_add(report.applied, Ordering::Relaxed);
        c.deferred.fetch_add(report.deferred, Ordering::Relaxed);
        c.duplicates.fetch_add(report.duplicates, Ordering::Relaxed);
        c.poison.fetch_add(report.poison, Ordering::Relaxed);
        c.last_sequence.fetch_max(last_sequence, Ordering::Relaxed);
        c.last_batch_at.store(chrono::Utc::now().timestamp(), Ordering::Relaxed);
    }

    pub fn record_failed_batch(&self, table: SourceTable) {
        self.counters(table).failed_batches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_restart(&self, table: SourceTable) {
        self.counters(table).restarts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, table: SourceTable) -> TableHealth {
        let c = self.counters(table);
        let last_sequence = c.last_sequence.load(Ordering::Relaxed);
        let last_batch_at = c.last_batch_at.load(Ordering::Relaxed);
        TableHealth {
            table,
            pending: c.pending.load(Ordering::SeqCst),
            applied: c.applied.load(Ordering::Relaxed),
            deferred: c.deferred.load(Ordering::Relaxed),
            duplicates: c.duplicates.load(Ordering::Relaxed),
            poison: c.poison.load(Ordering::Relaxed),
            failed_batches: c.failed_batches.load(Ordering::Relaxed),
            restarts: c.restarts.load(Ordering::Relaxed),
            last_sequence: (last_sequence > 0).then_some(last_sequence),
            last_batch_at: (last_batch_at > 0).then_some(last_batch_at),
        }
    }

    pub fn health(&self) -> Vec<TableHealth> {
        SourceTable::ALL.iter().map(|t| self.snapshot(*t)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_batch_takes_remaining_count() {
        let state = PropagationState::new();
        state.add_pending(SourceTable::Metadata, 2);
        let report = BatchReport { consumed: 3, applied: 2, poison: 1, ..Default::default() };
        state.record_batch(SourceTable::Metadata, &report, 3, 4);

        let health = state.snapshot(SourceTable::Metadata);
        assert_eq!(health.pending, 4);
        assert_eq!(health.applied, 2);
        assert_eq!(health.poison, 1);
        assert_eq!(health.last_sequence, Some(3));
        assert!(health.last_batch_at.is_some());
    }

    #[test]
    fn test_tables_are_independent() {
        let state = PropagationState::new();
        state.set_pending(SourceTable::FileProv, 7);
        state.record_restart(SourceTable::AppProv);

        let health = state.health();
        assert_eq!(health.len(), 3);
        assert_eq!(health[0].pending, 0);
        assert_eq!(health[1].pending, 7);
        assert_eq!(health[2].restarts, 1);
        assert_eq!(health[2].last_sequence, None);
    }
}
