//! # tx-board
//!
//! Transaction execution tracking for database-backed services.
//!
//! Every transaction, nested ones included, is recorded as a tree of
//! immutable [`TransactionLog`]s carrying timing, propagation and isolation
//! metadata, connection usage, executed statements and derived health signals
//! (slow transactions, long-held connections, potential N+1 query patterns).
//! Finalized logs are handed to listeners; the bundled persistence listener
//! stores them in memory where they can be filtered, sorted and paged, and
//! summarized into counters and a duration histogram.
//!
//! ## Features
//!
//! - **Nested Transactions**: inner transactions are attached to the one that was
//!   open when they began
//! - **Connection Accounting**: acquire/release pairs are matched last-in-first-out
//! - **N+1 Heuristic**: statements differing only by literals are grouped
//! - **Queryable Store**: generic filter/sort/page over any log type
//! - **Structured Logging**: one `tracing` event per finalized transaction
//!
//! ## Quick Start
//!
//! ```rust
//! use tx_board::prelude::*;
//!
//! let board = TxBoard::new(TxBoardConfig::default()).unwrap();
//! let mut ctx = board.context();
//!
//! ctx.begin_frame("UserService.loadUsers", PropagationBehavior::Required, IsolationLevel::Default);
//! ctx.acknowledge_start(None);
//! ctx.connection_acquired();
//! ctx.executed_query("select * from users");
//! ctx.commit();
//! ctx.connection_released();
//!
//! let summary = board.transaction_logs().summary();
//! assert_eq!(summary.committed_count, 1);
//! ```
//!
//! ## Configuration
//!
//! ```rust
//! use std::time::Duration;
//! use tx_board::{LogType, TxBoardConfig};
//!
//! let config = TxBoardConfig::default()
//!     .with_transaction_threshold(Duration::from_millis(500))
//!     .with_log_type(LogType::Details)
//!     .with_n_plus_one_threshold(3)
//!     .unwrap();
//! # let _ = config;
//! ```
//!
//! ## Log Fields
//!
//! Finalized transactions are reported inside a `tx_board.transaction` span:
//!
//! | Field | Description |
//! |-------|-------------|
//! | `tx.id` | Process-wide transaction id |
//! | `tx.method` | Short method name |
//! | `tx.status` | `COMMITTED`, `ROLLED_BACK` or `ERRORED` |
//! | `duration_ms` | Transaction duration |

use std::sync::Arc;

mod analyzer;
mod config;
mod error;
mod frame;
mod listener;
mod model;
mod parser;
pub mod query;
mod store;
mod tracker;

pub use analyzer::{
    detect_n_plus_one, most_repeated, normalize, RepeatedPattern, DEFAULT_REPEAT_THRESHOLD,
    MAX_PATTERN_LEN,
};
pub use config::{
    AlarmingThreshold, LogType, TxBoardConfig, MAX_DURATION_BUCKETS, MIN_N_PLUS_ONE_THRESHOLD,
};
pub use error::{ConfigError, ListenerError, QueryError};
pub use listener::{
    SqlExecutionLogListener, SqlExecutionLogPersistenceListener, TransactionLogListener,
    TransactionLogPersistenceListener,
};
pub use model::{
    method_name_from_definition, ConnectionSummary, EventType, IsolationLevel,
    PropagationBehavior, SqlExecutionLog, TransactionEvent, TransactionLog, TransactionStatus,
};
pub use parser::{SqlOperation, StatementShape};
pub use query::{
    Direction, Filter, FilterNode, Logic, Operator, PageRequest, PageResponse, Queryable, Sort,
    Value,
};
pub use store::{
    DurationDistribution, DurationHistogram, DurationRange, InMemorySqlExecutionLogStore,
    InMemoryTransactionLogStore, SqlExecutionLogStore, TransactionLogStore, TransactionMetrics,
    TransactionSummary,
};
pub use tracker::{ContextState, TrackingContext, TransactionTracker, TransactionTrackerBuilder};

/// Tracker wired to in-memory stores.
#[derive(Debug, Clone)]
pub struct TxBoard {
    tracker: TransactionTracker,
    transaction_logs: Arc<InMemoryTransactionLogStore>,
    sql_logs: Arc<InMemorySqlExecutionLogStore>,
}

impl TxBoard {
    /// Validate `config` and build a tracker whose finalized logs are persisted
    /// into fresh in-memory stores.
    pub fn new(config: TxBoardConfig) -> Result<Self, ConfigError> {
        Self::with_builder(config, |builder| builder)
    }

    /// Like [`TxBoard::new`], with a hook to register additional listeners.
    /// They run after the persistence listeners.
    pub fn with_builder<F>(config: TxBoardConfig, customize: F) -> Result<Self, ConfigError>
    where
        F: FnOnce(TransactionTrackerBuilder) -> TransactionTrackerBuilder,
    {
        let config = config.validate()?;
        let transaction_logs = Arc::new(InMemoryTransactionLogStore::new(&config.duration_buckets));
        let sql_logs = Arc::new(InMemorySqlExecutionLogStore::new());

        let builder = TransactionTracker::builder(config)
            .with_listener(TransactionLogPersistenceListener::new(transaction_logs.clone()))
            .with_sql_listener(SqlExecutionLogPersistenceListener::new(sql_logs.clone()));
        let tracker = customize(builder).build()?;

        Ok(Self {
            tracker,
            transaction_logs,
            sql_logs,
        })
    }

    pub fn tracker(&self) -> &TransactionTracker {
        &self.tracker
    }

    /// New tracking context for the current thread.
    pub fn context(&self) -> TrackingContext {
        self.tracker.context()
    }

    pub fn transaction_logs(&self) -> &Arc<InMemoryTransactionLogStore> {
        &self.transaction_logs
    }

    pub fn sql_logs(&self) -> &Arc<InMemorySqlExecutionLogStore> {
        &self.sql_logs
    }
}

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        IsolationLevel, PropagationBehavior, SqlExecutionLogStore, TransactionLogStore,
        TransactionStatus, TrackingContext, TransactionTracker, TxBoard, TxBoardConfig,
    };
}
