//! In-memory log stores.
//!
//! Records are kept in a copy-on-write vector of `Arc`ed records. A writer
//! appends under a short write lock and copies only the pointer vector while a
//! reader still holds the previous snapshot. Readers clone the `Arc` of the
//! current snapshot, so queries never observe a partially written collection
//! and never hold the lock while they filter.
//!
//! Summary counters and histogram buckets are updated under the same write
//! lock and read under its read lock, so a summary always describes a whole
//! number of saved records.
//!
//! There is no retention policy. Every saved record stays in memory for the
//! lifetime of the store.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use crate::model::{SqlExecutionLog, TransactionLog, TransactionStatus};
use crate::query::{self, PageRequest, PageResponse};

/// Inclusive duration bucket in milliseconds. `max_millis == None` is unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DurationRange {
    pub min_millis: i64,
    pub max_millis: Option<i64>,
}

impl DurationRange {
    pub fn new(min_millis: i64, max_millis: Option<i64>) -> Self {
        Self {
            min_millis,
            max_millis,
        }
    }

    pub fn matches(&self, millis: i64) -> bool {
        millis >= self.min_millis && self.max_millis.map_or(true, |max| millis <= max)
    }

    pub fn is_overflow(&self) -> bool {
        self.max_millis.is_none()
    }
}

impl std::fmt::Display for DurationRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.max_millis {
            Some(max) => write!(f, "[{}, {}] ms", self.min_millis, max),
            None => write!(f, "[{}, inf) ms", self.min_millis),
        }
    }
}

/// Bucket count reported by [`DurationHistogram::distribution`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DurationDistribution {
    pub range: DurationRange,
    pub count: u64,
}

/// Fixed set of contiguous duration buckets plus an overflow bucket.
///
/// Boundaries `[b1, b2, ...]` produce `[0, b1]`, `[b1 + 1, b2]`, ... and the
/// overflow bucket `[last + 1, inf)`. Durations that match no configured
/// bucket, negative ones included, are counted in the overflow bucket.
#[derive(Debug)]
pub struct DurationHistogram {
    buckets: Vec<(DurationRange, AtomicU64)>,
    overflow: (DurationRange, AtomicU64),
}

impl DurationHistogram {
    /// `boundaries` must be ascending; [`crate::TxBoardConfig::validate`]
    /// guarantees this for configured values.
    pub fn new(boundaries: &[u64]) -> Self {
        let mut buckets = Vec::with_capacity(boundaries.len());
        let mut min = 0i64;
        for &boundary in boundaries {
            let max = i64::try_from(boundary).unwrap_or(i64::MAX);
            if max < min {
                continue;
            }
            buckets.push((DurationRange::new(min, Some(max)), AtomicU64::new(0)));
            min = max.saturating_add(1);
        }
        Self {
            buckets,
            overflow: (DurationRange::new(min, None), AtomicU64::new(0)),
        }
    }

    /// Bucket that `millis` falls into.
    pub fn range_for(&self, millis: i64) -> DurationRange {
        self.buckets
            .iter()
            .map(|(range, _)| *range)
            .find(|range| range.matches(millis))
            .unwrap_or(self.overflow.0)
    }

    pub fn record(&self, millis: i64) {
        let counter = self
            .buckets
            .iter()
            .find(|(range, _)| range.matches(millis))
            .map(|(_, count)| count)
            .unwrap_or(&self.overflow.1);
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Every configured bucket in order, followed by the overflow bucket.
    pub fn distribution(&self) -> Vec<DurationDistribution> {
        self.buckets
            .iter()
            .chain(std::iter::once(&self.overflow))
            .map(|(range, count)| DurationDistribution {
                range: *range,
                count: count.load(Ordering::Relaxed),
            })
            .collect()
    }
}

/// Aggregate counters over all stored transactions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionSummary {
    pub committed_count: u64,
    pub rolled_back_count: u64,
    pub errored_count: u64,
    pub total_duration: i64,
    pub alarming_count: u64,
    pub connection_acquisition_count: u64,
    pub total_connection_occupied_time: i64,
    pub alarming_connection_count: u64,
    pub total_transaction: u64,
    pub average_duration: f64,
    pub average_connection_occupied_time: f64,
}

/// Headline metrics derived from a [`TransactionSummary`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionMetrics {
    pub total_transactions: u64,
    pub committed_count: u64,
    pub rolled_back_count: u64,
    /// Percentage of committed transactions; 0 when nothing is stored.
    pub success_rate: f64,
    pub avg_duration: f64,
}

impl From<&TransactionSummary> for TransactionMetrics {
    fn from(summary: &TransactionSummary) -> Self {
        let total = summary.total_transaction;
        Self {
            total_transactions: total,
            committed_count: summary.committed_count,
            rolled_back_count: total - summary.committed_count,
            success_rate: ratio(summary.committed_count as f64 * 100.0, total),
            avg_duration: summary.average_duration,
        }
    }
}

fn ratio(numerator: f64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator / denominator as f64
    }
}

#[derive(Debug, Default)]
struct SummaryCounters {
    committed: AtomicU64,
    rolled_back: AtomicU64,
    errored: AtomicU64,
    total_duration: AtomicI64,
    alarming: AtomicU64,
    connection_acquisitions: AtomicU64,
    connection_occupied_time: AtomicI64,
    alarming_connections: AtomicU64,
}

impl SummaryCounters {
    fn record(&self, log: &TransactionLog) {
        let status = match log.status() {
            TransactionStatus::Committed => &self.committed,
            TransactionStatus::RolledBack => &self.rolled_back,
            TransactionStatus::Errored => &self.errored,
        };
        status.fetch_add(1, Ordering::Relaxed);
        self.total_duration.fetch_add(log.duration(), Ordering::Relaxed);
        if log.is_alarming_transaction() {
            self.alarming.fetch_add(1, Ordering::Relaxed);
        }

        let connections = log.connection_summary();
        self.connection_acquisitions
            .fetch_add(connections.acquisition_count, Ordering::Relaxed);
        self.connection_occupied_time
            .fetch_add(connections.occupied_time, Ordering::Relaxed);
        self.alarming_connections
            .fetch_add(connections.alarming_connection_count, Ordering::Relaxed);
    }

    fn snapshot(&self) -> TransactionSummary {
        let committed_count = self.committed.load(Ordering::Relaxed);
        let rolled_back_count = self.rolled_back.load(Ordering::Relaxed);
        let errored_count = self.errored.load(Ordering::Relaxed);
        let total_duration = self.total_duration.load(Ordering::Relaxed);
        let connection_acquisition_count = self.connection_acquisitions.load(Ordering::Relaxed);
        let total_connection_occupied_time = self.connection_occupied_time.load(Ordering::Relaxed);
        let total_transaction = committed_count + rolled_back_count + errored_count;

        TransactionSummary {
            committed_count,
            rolled_back_count,
            errored_count,
            total_duration,
            alarming_count: self.alarming.load(Ordering::Relaxed),
            connection_acquisition_count,
            total_connection_occupied_time,
            alarming_connection_count: self.alarming_connections.load(Ordering::Relaxed),
            total_transaction,
            average_duration: ratio(total_duration as f64, total_transaction),
            average_connection_occupied_time: ratio(
                total_connection_occupied_time as f64,
                connection_acquisition_count,
            ),
        }
    }
}

/// Append-only vector readable through cheap snapshots.
#[derive(Debug)]
struct CowLog<T> {
    items: RwLock<Arc<Vec<Arc<T>>>>,
}

impl<T> CowLog<T> {
    fn new() -> Self {
        Self {
            items: RwLock::new(Arc::new(Vec::new())),
        }
    }

    fn push(&self, item: T) {
        self.push_with(item, |_| {});
    }

    /// Appends `item`, running `on_push` while the write lock is held.
    fn push_with(&self, item: T, on_push: impl FnOnce(&T)) {
        let mut guard = self.items.write();
        on_push(&item);
        Arc::make_mut(&mut guard).push(Arc::new(item));
    }

    /// Runs `read` while no push is in progress.
    fn read_with<R>(&self, read: impl FnOnce() -> R) -> R {
        let _guard = self.items.read();
        read()
    }

    fn snapshot(&self) -> Arc<Vec<Arc<T>>> {
        Arc::clone(&self.items.read())
    }
}

/// Storage for finalized root transactions.
pub trait TransactionLogStore: Send + Sync {
    fn save(&self, log: TransactionLog);

    /// Snapshot of every stored record, in insertion order.
    fn records(&self) -> Arc<Vec<Arc<TransactionLog>>>;

    fn find_all(&self, request: &PageRequest) -> PageResponse<TransactionLog>;

    fn summary(&self) -> TransactionSummary;

    fn duration_distribution(&self) -> Vec<DurationDistribution>;

    fn count(&self) -> usize {
        self.records().len()
    }

    fn count_by_status(&self, status: TransactionStatus) -> usize {
        self.records().iter().filter(|log| log.status() == status).count()
    }

    fn average_duration(&self) -> f64 {
        self.summary().average_duration
    }

    fn metrics(&self) -> TransactionMetrics {
        TransactionMetrics::from(&self.summary())
    }
}

/// Storage for connection sessions that ran outside any transaction.
pub trait SqlExecutionLogStore: Send + Sync {
    fn save(&self, log: SqlExecutionLog);

    fn find_all(&self, request: &PageRequest) -> PageResponse<SqlExecutionLog>;
}

/// Unbounded in-memory [`TransactionLogStore`].
#[derive(Debug)]
pub struct InMemoryTransactionLogStore {
    logs: CowLog<TransactionLog>,
    counters: SummaryCounters,
    histogram: DurationHistogram,
}

impl InMemoryTransactionLogStore {
    pub fn new(duration_buckets: &[u64]) -> Self {
        let histogram = DurationHistogram::new(duration_buckets);
        tracing::debug!(
            buckets = ?histogram.distribution().iter().map(|d| d.range.to_string()).collect::<Vec<_>>(),
            "In-memory transaction log store initialized"
        );
        Self {
            logs: CowLog::new(),
            counters: SummaryCounters::default(),
            histogram,
        }
    }

    pub fn histogram(&self) -> &DurationHistogram {
        &self.histogram
    }
}

impl TransactionLogStore for InMemoryTransactionLogStore {
    fn save(&self, log: TransactionLog) {
        self.logs.push_with(log, |log| {
            self.histogram.record(log.duration());
            self.counters.record(log);
        });
    }

    fn records(&self) -> Arc<Vec<Arc<TransactionLog>>> {
        self.logs.snapshot()
    }

    fn find_all(&self, request: &PageRequest) -> PageResponse<TransactionLog> {
        let snapshot = self.logs.snapshot();
        query::find_all_refs(snapshot.iter().map(|log| &**log), request)
    }

    fn summary(&self) -> TransactionSummary {
        self.logs.read_with(|| self.counters.snapshot())
    }

    fn duration_distribution(&self) -> Vec<DurationDistribution> {
        self.logs.read_with(|| self.histogram.distribution())
    }
}

/// Unbounded in-memory [`SqlExecutionLogStore`].
#[derive(Debug)]
pub struct InMemorySqlExecutionLogStore {
    logs: CowLog<SqlExecutionLog>,
}

impl Default for InMemorySqlExecutionLogStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemorySqlExecutionLogStore {
    pub fn new() -> Self {
        Self { logs: CowLog::new() }
    }

    pub fn records(&self) -> Arc<Vec<Arc<SqlExecutionLog>>> {
        self.logs.snapshot()
    }
}

impl SqlExecutionLogStore for InMemorySqlExecutionLogStore {
    fn save(&self, log: SqlExecutionLog) {
        self.logs.push(log);
    }

    fn find_all(&self, request: &PageRequest) -> PageResponse<SqlExecutionLog> {
        let snapshot = self.logs.snapshot();
        query::find_all_refs(snapshot.iter().map(|log| &**log), request)
    }
}
