//! Per-context transaction tracking.
//!
//! A [`TransactionTracker`] is the shared, cheaply cloneable entry point that
//! owns the configuration and the registered listeners. Each flow of execution
//! (a thread, a task, a request) obtains its own [`TrackingContext`] from it and
//! reports transaction and connection lifecycle events through `&mut self`
//! methods, so no state is shared between contexts and nothing is locked.
//!
//! ```rust
//! use tx_board::{IsolationLevel, PropagationBehavior, TransactionTracker, TxBoardConfig};
//!
//! let tracker = TransactionTracker::new(TxBoardConfig::default()).unwrap();
//! let mut ctx = tracker.context();
//!
//! ctx.begin_frame("OrderService.place", PropagationBehavior::Required, IsolationLevel::Default);
//! ctx.acknowledge_start(None);
//! ctx.connection_acquired();
//! ctx.executed_query("insert into orders (id) values (1)");
//! ctx.commit();
//! ctx.connection_released();
//! assert!(ctx.is_idle());
//! ```

use std::fmt::Write as _;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::analyzer;
use crate::config::{LogType, TxBoardConfig};
use crate::error::ConfigError;
use crate::frame::{self, Frame, FreezeSettings};
use crate::listener::{self, SqlExecutionLogListener, TransactionLogListener};
use crate::model::{
    EventType, IsolationLevel, PropagationBehavior, SqlExecutionLog, TransactionEvent,
    TransactionLog, TransactionStatus,
};

struct TrackerInner {
    config: TxBoardConfig,
    settings: FreezeSettings,
    listeners: Vec<Arc<dyn TransactionLogListener>>,
    sql_listeners: Vec<Arc<dyn SqlExecutionLogListener>>,
}

/// Shared tracking entry point. Clones share configuration and listeners.
#[derive(Clone)]
pub struct TransactionTracker {
    inner: Arc<TrackerInner>,
}

impl std::fmt::Debug for TransactionTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionTracker")
            .field("config", &self.inner.config)
            .field("listeners", &self.inner.listeners.len())
            .field("sql_listeners", &self.inner.sql_listeners.len())
            .finish()
    }
}

impl TransactionTracker {
    /// Tracker without any listener. Finalized logs are only written to the log.
    pub fn new(config: TxBoardConfig) -> Result<Self, ConfigError> {
        Self::builder(config).build()
    }

    pub fn builder(config: TxBoardConfig) -> TransactionTrackerBuilder {
        TransactionTrackerBuilder {
            config,
            listeners: Vec::new(),
            sql_listeners: Vec::new(),
        }
    }

    pub fn config(&self) -> &TxBoardConfig {
        &self.inner.config
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.config.enabled
    }

    /// New context labelled with the current thread's name.
    pub fn context(&self) -> TrackingContext {
        let current = std::thread::current();
        let label = match current.name() {
            Some(name) => name.to_string(),
            None => format!("{:?}", current.id()),
        };
        self.context_named(label)
    }

    /// New context with an explicit label, e.g. a task or request name.
    pub fn context_named(&self, label: impl Into<String>) -> TrackingContext {
        TrackingContext {
            tracker: self.clone(),
            label: label.into(),
            frames: Vec::new(),
            stack: Vec::new(),
            connection_depth: 0,
            session: None,
        }
    }

    fn publish(&self, log: &TransactionLog) {
        for target in &self.inner.listeners {
            listener::dispatch(target.name(), Some(log.tx_id()), || target.listen(log));
        }
    }

    fn publish_sql(&self, log: &SqlExecutionLog) {
        for target in &self.inner.sql_listeners {
            listener::dispatch(target.name(), None, || target.listen(log));
        }
    }
}

/// Builder for [`TransactionTracker`].
pub struct TransactionTrackerBuilder {
    config: TxBoardConfig,
    listeners: Vec<Arc<dyn TransactionLogListener>>,
    sql_listeners: Vec<Arc<dyn SqlExecutionLogListener>>,
}

impl TransactionTrackerBuilder {
    /// Register a listener. Listeners run in registration order.
    pub fn with_listener(mut self, listener: impl TransactionLogListener + 'static) -> Self {
        self.listeners.push(Arc::new(listener));
        self
    }

    pub fn with_shared_listener(mut self, listener: Arc<dyn TransactionLogListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn with_sql_listener(mut self, listener: impl SqlExecutionLogListener + 'static) -> Self {
        self.sql_listeners.push(Arc::new(listener));
        self
    }

    pub fn with_shared_sql_listener(mut self, listener: Arc<dyn SqlExecutionLogListener>) -> Self {
        self.sql_listeners.push(listener);
        self
    }

    /// Validate the configuration and build the tracker.
    pub fn build(self) -> Result<TransactionTracker, ConfigError> {
        let config = self.config.validate()?;
        let settings = FreezeSettings {
            transaction_threshold_ms: config.alarming_threshold.transaction_millis(),
            connection_threshold_ms: config.alarming_threshold.connection_millis(),
            n_plus_one_threshold: config.n_plus_one_threshold,
        };
        Ok(TransactionTracker {
            inner: Arc::new(TrackerInner {
                config,
                settings,
                listeners: self.listeners,
                sql_listeners: self.sql_listeners,
            }),
        })
    }
}

/// Lifecycle state of a [`TrackingContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    /// No transaction in flight.
    Idle,
    /// `depth` transactions are open, the root included.
    Active { depth: usize },
    /// The root transaction ended; waiting for its connections to be released.
    Finalizing { open_connections: usize },
}

#[derive(Debug)]
struct ConnectionSession {
    acquired_at: DateTime<Utc>,
    depth: usize,
    queries: Vec<String>,
}

/// Transaction state of one flow of execution.
///
/// Frames of the current root live in an arena; `stack` holds the indices of
/// the open frames, outermost first.
#[derive(Debug)]
pub struct TrackingContext {
    tracker: TransactionTracker,
    label: String,
    frames: Vec<Frame>,
    stack: Vec<usize>,
    connection_depth: usize,
    session: Option<ConnectionSession>,
}

impl TrackingContext {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn state(&self) -> ContextState {
        match self.root() {
            None => ContextState::Idle,
            Some(root) if root.is_completed() => ContextState::Finalizing {
                open_connections: self.connection_depth,
            },
            Some(_) => ContextState::Active {
                depth: self.stack.len(),
            },
        }
    }

    pub fn is_idle(&self) -> bool {
        self.stack.is_empty()
    }

    /// Number of connections currently held by the in-flight transaction.
    pub fn connection_depth(&self) -> usize {
        self.connection_depth
    }

    /// Open a new transaction frame nested under the current one, if any.
    pub fn begin_frame(
        &mut self,
        method: impl Into<String>,
        propagation: PropagationBehavior,
        isolation: IsolationLevel,
    ) {
        if !self.tracker.is_enabled() {
            return;
        }
        if self.stack.is_empty() {
            self.frames.clear();
        }

        let index = self.frames.len();
        let frame = Frame::new(
            method,
            propagation,
            isolation,
            self.label.clone(),
            self.stack.is_empty(),
            Utc::now(),
        );
        tracing::trace!(frame.id = frame.id(), method = frame.method(), "Transaction frame begun");
        self.frames.push(frame);

        if let Some(&parent) = self.stack.last() {
            self.frames[parent].add_child(index);
        }
        self.stack.push(index);
    }

    /// Mark the current frame as started. A begin failure ends it as `ERRORED`.
    pub fn acknowledge_start(&mut self, failure: Option<&dyn std::error::Error>) {
        if !self.tracker.is_enabled() {
            return;
        }
        let Some(&top) = self.stack.last() else {
            tracing::debug!(context = %self.label, "Start acknowledged without an open transaction");
            return;
        };

        let now = Utc::now();
        self.frames[top].start(now);
        let details = format!("Transaction Start [{}]", self.frames[top].method());
        self.push_event(TransactionEvent::new(EventType::TransactionStart, now, details));

        if let Some(error) = failure {
            tracing::debug!(error = %error, "Transaction failed to begin");
            self.end_frame(TransactionStatus::Errored);
        }
    }

    pub fn commit(&mut self) {
        self.end_frame(TransactionStatus::Committed);
    }

    pub fn rollback(&mut self) {
        self.end_frame(TransactionStatus::RolledBack);
    }

    pub fn error_occurred(&mut self, error: &dyn std::error::Error) {
        if self.tracker.is_enabled() && !self.stack.is_empty() {
            tracing::debug!(error = %error, "Error during transaction phase");
        }
        self.end_frame(TransactionStatus::Errored);
    }

    /// Record a connection checkout.
    ///
    /// With a transaction in flight the acquisition is charged to the
    /// outermost frame. Otherwise it opens (or deepens) a standalone
    /// connection session.
    pub fn connection_acquired(&mut self) {
        if !self.tracker.is_enabled() {
            return;
        }
        let now = Utc::now();

        if self.stack.is_empty() {
            let session = self.session.get_or_insert_with(|| ConnectionSession {
                acquired_at: now,
                depth: 0,
                queries: Vec::new(),
            });
            session.depth += 1;
            return;
        }

        self.connection_depth += 1;
        let details = format!("Connection Acquired [{}]", self.connection_depth);
        self.push_event(TransactionEvent::new(EventType::ConnectionAcquired, now, details));
    }

    /// Record a connection return. Finalizes a completed root once every
    /// connection it holds has been released.
    pub fn connection_released(&mut self) {
        if !self.tracker.is_enabled() {
            return;
        }
        let now = Utc::now();

        let owned_by_frame = !self.stack.is_empty() && self.connection_depth > 0;
        if !owned_by_frame && self.session.is_some() {
            self.release_session(now);
            return;
        }
        if self.stack.is_empty() {
            tracing::trace!(context = %self.label, "Connection released on an idle context");
            return;
        }

        if self.connection_depth == 0 {
            tracing::debug!(context = %self.label, "Connection released without a matching acquire");
        }
        let released = self.connection_depth;
        self.connection_depth = self.connection_depth.saturating_sub(1);
        let details = format!("Connection Released [{}]", released);
        self.push_event(TransactionEvent::new(EventType::ConnectionReleased, now, details));

        if self.connection_depth == 0 && self.root().is_some_and(Frame::is_completed) {
            self.finalize();
        }
    }

    /// Attribute a statement to the innermost open transaction.
    ///
    /// Statements are only recorded while a connection is held. Statements run
    /// after the root ended go to its post-transaction list.
    pub fn executed_query(&mut self, sql: impl Into<String>) {
        if !self.tracker.is_enabled() {
            return;
        }

        if self.connection_depth > 0 {
            if let Some(&top) = self.stack.last() {
                let frame = &mut self.frames[top];
                if frame.is_most_parent() && frame.is_completed() {
                    frame.add_post_transaction_query(sql);
                } else {
                    frame.add_executed_query(sql);
                }
                return;
            }
        }

        match &mut self.session {
            Some(session) => session.queries.push(sql.into()),
            None => tracing::trace!(context = %self.label, "Statement dropped, no connection held"),
        }
    }

    fn root(&self) -> Option<&Frame> {
        self.stack.first().map(|&index| &self.frames[index])
    }

    fn push_event(&mut self, event: TransactionEvent) {
        if let Some(&bottom) = self.stack.first() {
            self.frames[bottom].push_event(event);
        }
    }

    fn end_frame(&mut self, status: TransactionStatus) {
        if !self.tracker.is_enabled() {
            return;
        }
        let Some(&top) = self.stack.last() else {
            tracing::debug!(context = %self.label, status = %status, "End without an open transaction");
            return;
        };

        let now = Utc::now();
        let frame = &mut self.frames[top];
        if !frame.end(status, now) {
            tracing::debug!(frame.id = frame.id(), status = %status, "Transaction already ended");
            return;
        }
        let details = format!("Transaction End [{}]", frame.method());
        let most_parent = frame.is_most_parent();
        self.push_event(TransactionEvent::new(EventType::TransactionEnd, now, details));

        if !most_parent {
            self.stack.pop();
        } else if self.connection_depth == 0 {
            self.finalize();
        }
    }

    fn finalize(&mut self) {
        let Some(&root) = self.stack.first() else {
            return;
        };
        let frames = std::mem::take(&mut self.frames);
        self.stack.clear();
        self.connection_depth = 0;

        let inner = &self.tracker.inner;
        let Some(log) = frame::freeze(frames, root, &inner.settings) else {
            return;
        };

        let span = tracing::info_span!(
            "tx_board.transaction",
            tx.id = log.tx_id(),
            tx.method = %log.method(),
            tx.status = %log.status(),
        );
        let _guard = span.enter();
        report(&log, inner.config.log_type);
        self.tracker.publish(&log);
    }

    fn release_session(&mut self, now: DateTime<Utc>) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.depth -= 1;
        if session.depth > 0 {
            return;
        }
        if let Some(session) = self.session.take() {
            let log = SqlExecutionLog::new(session.acquired_at, now, self.label.clone(), session.queries);
            tracing::debug!(
                occupied_ms = log.con_occupied_time(),
                queries = log.executed_queries().len(),
                "Connection session completed outside a transaction"
            );
            self.tracker.publish_sql(&log);
        }
    }
}

impl Drop for TrackingContext {
    fn drop(&mut self) {
        if !self.stack.is_empty() {
            tracing::debug!(
                context = %self.label,
                open_frames = self.stack.len(),
                open_connections = self.connection_depth,
                "Tracking context dropped with an unfinished transaction"
            );
        }
    }
}

fn report(log: &TransactionLog, log_type: LogType) {
    let n_plus_one = log.is_n_plus_one_detected();
    let healthy = log.is_healthy_transaction() && !n_plus_one;
    let connections = log.connection_acquisition_count();

    match (log_type, healthy) {
        (LogType::Simple, true) => tracing::info!(
            duration_ms = log.duration(),
            "Transaction [{}] took {} ms, Status: {}",
            log.method(),
            log.duration(),
            log.status()
        ),
        (LogType::Simple, false) => tracing::warn!(
            duration_ms = log.duration(),
            alarming = log.is_alarming_transaction(),
            alarming_connection = log.having_alarming_connection(),
            "Transaction [{}] took {} ms, Status: {}, Connections: {}, Queries: {}",
            log.method(),
            log.duration(),
            log.status(),
            connections,
            log.total_query_count()
        ),
        (LogType::Details, true) => tracing::info!("{}", render_details(log)),
        (LogType::Details, false) => tracing::warn!("{}", render_details(log)),
    }

    if n_plus_one {
        let queries = frame::subtree_queries(log);
        if let Some(repeated) = analyzer::most_repeated(&queries) {
            tracing::warn!(
                shape = %repeated.shape,
                occurrences = repeated.occurrences,
                pattern = %repeated.pattern,
                "Potential N+1 query pattern detected in transaction [{}]",
                log.method()
            );
        }
    }
}

/// Multi-line report including the tree of inner transactions.
pub(crate) fn render_details(log: &TransactionLog) -> String {
    let mut out = String::new();
    let _ = write!(
        out,
        "Transaction Completed:\n  \
         - ID: {}\n  \
         - Method: {}\n  \
         - Status: {}\n  \
         - Duration: {} ms\n  \
         - Connections Acquired: {}\n  \
         - Queries Executed: {}\n  \
         - Started At: {}\n  \
         - Ended At: {}\n",
        log.tx_id(),
        log.method(),
        log.status(),
        log.duration(),
        log.connection_acquisition_count(),
        log.total_query_count(),
        log.start_time().to_rfc3339(),
        log.end_time().to_rfc3339(),
    );
    if !log.child().is_empty() {
        out.push_str("  - Inner Transactions:\n");
        render_tree(log, "    ", &mut out);
    }
    out
}

fn render_tree(log: &TransactionLog, prefix: &str, out: &mut String) {
    let children = log.child();
    for (i, child) in children.iter().enumerate() {
        let last = i + 1 == children.len();
        let _ = writeln!(
            out,
            "{prefix}{}{} ({} ms, {})",
            if last { "└── " } else { "├── " },
            child.method(),
            child.duration(),
            child.status()
        );
        let child_prefix = format!("{prefix}{}", if last { "    " } else { "│   " });
        render_tree(child, &child_prefix, out);
    }
}
