//! In-flight transaction frames and their conversion into [`TransactionLog`]s.
//!
//! A [`Frame`] is the mutable accumulator owned by a single tracking context.
//! Frames of one root live in an arena (`Vec<Frame>`) and refer to their
//! children by index, so a child can be registered with its parent the moment
//! it begins while still sitting on the context's stack.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};

use crate::analyzer;
use crate::model::{
    ConnectionSummary, EventType, IsolationLevel, PropagationBehavior, TransactionEvent,
    TransactionLog, TransactionStatus,
};

static NEXT_FRAME_ID: AtomicU64 = AtomicU64::new(1);

/// Process-wide, monotonically increasing frame id. Not stable across restarts.
pub(crate) fn next_frame_id() -> u64 {
    NEXT_FRAME_ID.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug)]
pub(crate) struct Frame {
    id: u64,
    method: String,
    propagation: PropagationBehavior,
    isolation: IsolationLevel,
    thread: String,
    most_parent: bool,
    created_at: DateTime<Utc>,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    status: Option<TransactionStatus>,
    children: Vec<usize>,
    executed_queries: Vec<String>,
    post_transaction_queries: Vec<String>,
    events: Vec<TransactionEvent>,
}

impl Frame {
    pub(crate) fn new(
        method: impl Into<String>,
        propagation: PropagationBehavior,
        isolation: IsolationLevel,
        thread: impl Into<String>,
        most_parent: bool,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: next_frame_id(),
            method: method.into(),
            propagation,
            isolation,
            thread: thread.into(),
            most_parent,
            created_at,
            start_time: None,
            end_time: None,
            status: None,
            children: Vec::new(),
            executed_queries: Vec::new(),
            post_transaction_queries: Vec::new(),
            events: Vec::new(),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn method(&self) -> &str {
        &self.method
    }

    pub(crate) fn is_most_parent(&self) -> bool {
        self.most_parent
    }

    pub(crate) fn is_completed(&self) -> bool {
        self.end_time.is_some()
    }

    /// Record the start timestamp. Returns `false` if it was already set.
    pub(crate) fn start(&mut self, at: DateTime<Utc>) -> bool {
        if self.start_time.is_some() {
            return false;
        }
        self.start_time = Some(at);
        true
    }

    /// Record the terminal status. Returns `false` if the frame already ended.
    pub(crate) fn end(&mut self, status: TransactionStatus, at: DateTime<Utc>) -> bool {
        if self.end_time.is_some() {
            return false;
        }
        self.end_time = Some(at);
        self.status = Some(status);
        true
    }

    pub(crate) fn add_child(&mut self, index: usize) {
        self.children.push(index);
    }

    pub(crate) fn add_executed_query(&mut self, sql: impl Into<String>) {
        self.executed_queries.push(sql.into());
    }

    pub(crate) fn add_post_transaction_query(&mut self, sql: impl Into<String>) {
        self.post_transaction_queries.push(sql.into());
    }

    pub(crate) fn push_event(&mut self, event: TransactionEvent) {
        self.events.push(event);
    }
}

/// Thresholds applied while freezing frames.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FreezeSettings {
    pub transaction_threshold_ms: i64,
    pub connection_threshold_ms: i64,
    pub n_plus_one_threshold: usize,
}

/// Pair acquire/release events last-in-first-out and total the occupied time.
///
/// Releases without a pending acquire are skipped and do not change any count.
pub(crate) fn correlate_connections(
    events: &[TransactionEvent],
    connection_threshold_ms: i64,
) -> ConnectionSummary {
    let mut summary = ConnectionSummary::default();
    let mut pending: Vec<DateTime<Utc>> = Vec::new();

    for event in events {
        match event.kind {
            EventType::ConnectionAcquired => {
                summary.acquisition_count += 1;
                pending.push(event.timestamp);
            }
            EventType::ConnectionReleased => match pending.pop() {
                Some(acquired_at) => {
                    let interval = (event.timestamp - acquired_at).num_milliseconds();
                    summary.occupied_time += interval;
                    if interval > connection_threshold_ms {
                        summary.alarming_connection_count += 1;
                    }
                }
                None => {
                    tracing::debug!(
                        released_at = %event.timestamp,
                        "Connection release without a matching acquire"
                    );
                }
            },
            EventType::TransactionStart | EventType::TransactionEnd => {}
        }
    }

    summary
}

/// Convert the arena rooted at `root` into an immutable record tree.
///
/// Frames that never received an end event fall back to their start time and
/// an `ERRORED` status.
pub(crate) fn freeze(frames: Vec<Frame>, root: usize, settings: &FreezeSettings) -> Option<TransactionLog> {
    let mut slots: Vec<Option<Frame>> = frames.into_iter().map(Some).collect();
    freeze_slot(&mut slots, root, settings)
}

fn freeze_slot(
    slots: &mut [Option<Frame>],
    index: usize,
    settings: &FreezeSettings,
) -> Option<TransactionLog> {
    let frame = slots.get_mut(index)?.take()?;

    let child: Vec<TransactionLog> = frame
        .children
        .iter()
        .filter_map(|&c| freeze_slot(slots, c, settings))
        .collect();

    let start_time = frame.start_time.unwrap_or(frame.created_at);
    let end_time = frame.end_time.unwrap_or(start_time);
    let duration = (end_time - start_time).num_milliseconds();
    let connection_summary = correlate_connections(&frame.events, settings.connection_threshold_ms);

    let total_query_count =
        frame.executed_queries.len() + child.iter().map(|c| c.total_query_count).sum::<usize>();
    let total_transaction_count = 1 + child.iter().map(|c| c.total_transaction_count).sum::<usize>();

    let mut queries: Vec<&str> = frame.executed_queries.iter().map(String::as_str).collect();
    for c in &child {
        collect_queries(c, &mut queries);
    }
    let n_plus_one_detected =
        analyzer::detect_n_plus_one(&queries, settings.n_plus_one_threshold);

    Some(TransactionLog {
        tx_id: frame.id,
        method: frame.method,
        propagation: frame.propagation,
        isolation: frame.isolation,
        start_time,
        end_time,
        duration,
        status: frame.status.unwrap_or(TransactionStatus::Errored),
        thread: frame.thread,
        most_parent: frame.most_parent,
        connection_summary,
        connection_oriented: connection_summary.acquisition_count > 0,
        executed_queries: frame.executed_queries,
        post_transaction_queries: frame.post_transaction_queries,
        child,
        events: frame.events,
        alarming_transaction: duration > settings.transaction_threshold_ms,
        having_alarming_connection: connection_summary.alarming_connection_count > 0,
        n_plus_one_detected,
        total_query_count,
        total_transaction_count,
    })
}

/// Executed statements of `log` and all of its descendants, depth first.
pub(crate) fn subtree_queries(log: &TransactionLog) -> Vec<&str> {
    let mut out = Vec::with_capacity(log.total_query_count);
    collect_queries(log, &mut out);
    out
}

fn collect_queries<'a>(log: &'a TransactionLog, out: &mut Vec<&'a str>) {
    out.extend(log.executed_queries.iter().map(String::as_str));
    for c in &log.child {
        collect_queries(c, out);
    }
}
