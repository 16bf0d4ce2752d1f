//! Immutable records produced by the tracker.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::Serialize;

use crate::query::{PropertyTable, Queryable, Value};

/// Transaction propagation behavior, as reported by the transaction manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PropagationBehavior {
    Unknown,
    Required,
    Supports,
    Mandatory,
    RequiresNew,
    NotSupported,
    Never,
    Nested,
}

impl PropagationBehavior {
    /// Map a numeric propagation code; unrecognized codes become `Unknown`.
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Required,
            1 => Self::Supports,
            2 => Self::Mandatory,
            3 => Self::RequiresNew,
            4 => Self::NotSupported,
            5 => Self::Never,
            6 => Self::Nested,
            _ => Self::Unknown,
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            Self::Unknown => -1,
            Self::Required => 0,
            Self::Supports => 1,
            Self::Mandatory => 2,
            Self::RequiresNew => 3,
            Self::NotSupported => 4,
            Self::Never => 5,
            Self::Nested => 6,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::Required => "REQUIRED",
            Self::Supports => "SUPPORTS",
            Self::Mandatory => "MANDATORY",
            Self::RequiresNew => "REQUIRES_NEW",
            Self::NotSupported => "NOT_SUPPORTED",
            Self::Never => "NEVER",
            Self::Nested => "NESTED",
        }
    }
}

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IsolationLevel {
    Default,
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    /// Map a numeric isolation code; unrecognized codes become `Default`.
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => Self::ReadUncommitted,
            2 => Self::ReadCommitted,
            4 => Self::RepeatableRead,
            8 => Self::Serializable,
            _ => Self::Default,
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            Self::Default => -1,
            Self::ReadUncommitted => 1,
            Self::ReadCommitted => 2,
            Self::RepeatableRead => 4,
            Self::Serializable => 8,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "DEFAULT",
            Self::ReadUncommitted => "READ_UNCOMMITTED",
            Self::ReadCommitted => "READ_COMMITTED",
            Self::RepeatableRead => "REPEATABLE_READ",
            Self::Serializable => "SERIALIZABLE",
        }
    }
}

/// Terminal outcome of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Committed,
    RolledBack,
    Errored,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Committed => "COMMITTED",
            Self::RolledBack => "ROLLED_BACK",
            Self::Errored => "ERRORED",
        }
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    TransactionStart,
    TransactionEnd,
    ConnectionAcquired,
    ConnectionReleased,
}

/// One entry of a transaction's chronological event list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionEvent {
    #[serde(rename = "type")]
    pub kind: EventType,
    pub timestamp: DateTime<Utc>,
    pub details: String,
}

impl TransactionEvent {
    pub fn new(kind: EventType, timestamp: DateTime<Utc>, details: impl Into<String>) -> Self {
        Self {
            kind,
            timestamp,
            details: details.into(),
        }
    }
}

/// Connection usage derived by pairing acquire/release events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSummary {
    /// Number of `CONNECTION_ACQUIRED` events.
    pub acquisition_count: u64,
    /// Number of single acquire/release intervals above the connection threshold.
    pub alarming_connection_count: u64,
    /// Sum of all paired intervals in milliseconds.
    pub occupied_time: i64,
}

/// Finalized, immutable snapshot of a transaction and its inner transactions.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionLog {
    pub(crate) tx_id: u64,
    pub(crate) method: String,
    pub(crate) propagation: PropagationBehavior,
    pub(crate) isolation: IsolationLevel,
    pub(crate) start_time: DateTime<Utc>,
    pub(crate) end_time: DateTime<Utc>,
    pub(crate) duration: i64,
    pub(crate) status: TransactionStatus,
    pub(crate) thread: String,
    pub(crate) most_parent: bool,
    pub(crate) connection_summary: ConnectionSummary,
    pub(crate) connection_oriented: bool,
    pub(crate) executed_queries: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub(crate) post_transaction_queries: Vec<String>,
    pub(crate) child: Vec<TransactionLog>,
    pub(crate) events: Vec<TransactionEvent>,
    pub(crate) alarming_transaction: bool,
    pub(crate) having_alarming_connection: bool,
    pub(crate) n_plus_one_detected: bool,
    pub(crate) total_query_count: usize,
    pub(crate) total_transaction_count: usize,
}

impl TransactionLog {
    pub fn tx_id(&self) -> u64 {
        self.tx_id
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn propagation(&self) -> PropagationBehavior {
        self.propagation
    }

    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn end_time(&self) -> DateTime<Utc> {
        self.end_time
    }

    /// Milliseconds between start and end. Negative if the clock moved backward.
    pub fn duration(&self) -> i64 {
        self.duration
    }

    pub fn status(&self) -> TransactionStatus {
        self.status
    }

    /// Name of the thread or task that ran the transaction.
    pub fn thread(&self) -> &str {
        &self.thread
    }

    /// `true` for the outermost transaction of a nesting chain.
    pub fn is_most_parent(&self) -> bool {
        self.most_parent
    }

    pub fn connection_summary(&self) -> &ConnectionSummary {
        &self.connection_summary
    }

    pub fn connection_acquisition_count(&self) -> u64 {
        self.connection_summary.acquisition_count
    }

    pub fn connection_occupied_time(&self) -> i64 {
        self.connection_summary.occupied_time
    }

    pub fn connection_oriented(&self) -> bool {
        self.connection_oriented
    }

    /// Statements attributed to this transaction (not its children).
    pub fn executed_queries(&self) -> &[String] {
        &self.executed_queries
    }

    /// Statements run on the still-open connection after the transaction ended.
    pub fn post_transaction_queries(&self) -> &[String] {
        &self.post_transaction_queries
    }

    /// Inner transactions in the order they began.
    pub fn child(&self) -> &[TransactionLog] {
        &self.child
    }

    pub fn events(&self) -> &[TransactionEvent] {
        &self.events
    }

    pub fn is_alarming_transaction(&self) -> bool {
        self.alarming_transaction
    }

    pub fn having_alarming_connection(&self) -> bool {
        self.having_alarming_connection
    }

    pub fn is_n_plus_one_detected(&self) -> bool {
        self.n_plus_one_detected
    }

    /// Executed statements of this transaction and all descendants.
    pub fn total_query_count(&self) -> usize {
        self.total_query_count
    }

    /// This transaction plus all descendants.
    pub fn total_transaction_count(&self) -> usize {
        self.total_transaction_count
    }

    pub fn is_healthy_transaction(&self) -> bool {
        !self.alarming_transaction && !self.having_alarming_connection
    }
}

/// Statements executed on a connection that was acquired outside any transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SqlExecutionLog {
    pub(crate) con_acquired_time: DateTime<Utc>,
    pub(crate) con_release_time: DateTime<Utc>,
    pub(crate) con_occupied_time: i64,
    pub(crate) thread: String,
    pub(crate) executed_queries: Vec<String>,
}

impl SqlExecutionLog {
    pub fn new(
        con_acquired_time: DateTime<Utc>,
        con_release_time: DateTime<Utc>,
        thread: impl Into<String>,
        executed_queries: Vec<String>,
    ) -> Self {
        Self {
            con_acquired_time,
            con_release_time,
            con_occupied_time: (con_release_time - con_acquired_time).num_milliseconds(),
            thread: thread.into(),
            executed_queries,
        }
    }

    pub fn con_acquired_time(&self) -> DateTime<Utc> {
        self.con_acquired_time
    }

    pub fn con_release_time(&self) -> DateTime<Utc> {
        self.con_release_time
    }

    /// Milliseconds the connection was held.
    pub fn con_occupied_time(&self) -> i64 {
        self.con_occupied_time
    }

    pub fn thread(&self) -> &str {
        &self.thread
    }

    pub fn executed_queries(&self) -> &[String] {
        &self.executed_queries
    }
}

static TRANSACTION_LOG_PROPERTIES: Lazy<PropertyTable<TransactionLog>> = Lazy::new(|| {
    PropertyTable::<TransactionLog>::new("TransactionLog")
        .with("txId", |t| Value::from(t.tx_id))
        .with("method", |t| Value::from(t.method.as_str()))
        .with("propagation", |t| Value::from(t.propagation.as_str()))
        .with("isolation", |t| Value::from(t.isolation.as_str()))
        .with("startTime", |t| Value::from(t.start_time))
        .with("endTime", |t| Value::from(t.end_time))
        .with("duration", |t| Value::from(t.duration))
        .with("status", |t| Value::from(t.status.as_str()))
        .with("thread", |t| Value::from(t.thread.as_str()))
        .with("mostParent", |t| Value::from(t.most_parent))
        .with("connectionAcquisitionCount", |t| {
            Value::from(t.connection_summary.acquisition_count)
        })
        .with("connectionOccupiedTime", |t| Value::from(t.connection_summary.occupied_time))
        .with("alarmingConnectionCount", |t| {
            Value::from(t.connection_summary.alarming_connection_count)
        })
        .with("connectionOriented", |t| Value::from(t.connection_oriented))
        .with("alarmingTransaction", |t| Value::from(t.alarming_transaction))
        .with("havingAlarmingConnection", |t| Value::from(t.having_alarming_connection))
        .with("nPlusOneDetected", |t| Value::from(t.n_plus_one_detected))
        .with("totalQueryCount", |t| Value::from(t.total_query_count))
        .with("totalTransactionCount", |t| Value::from(t.total_transaction_count))
        .with("childCount", |t| Value::from(t.child.len()))
        .with("executedQueries", |t| Value::from(t.executed_queries.as_slice()))
});

impl Queryable for TransactionLog {
    fn property_table() -> &'static PropertyTable<Self> {
        &TRANSACTION_LOG_PROPERTIES
    }
}

static SQL_EXECUTION_LOG_PROPERTIES: Lazy<PropertyTable<SqlExecutionLog>> = Lazy::new(|| {
    PropertyTable::<SqlExecutionLog>::new("SqlExecutionLog")
        .with("conAcquiredTime", |s| Value::from(s.con_acquired_time))
        .with("conReleaseTime", |s| Value::from(s.con_release_time))
        .with("conOccupiedTime", |s| Value::from(s.con_occupied_time))
        .with("thread", |s| Value::from(s.thread.as_str()))
        .with("queryCount", |s| Value::from(s.executed_queries.len()))
        .with("executedQueries", |s| Value::from(s.executed_queries.as_slice()))
});

impl Queryable for SqlExecutionLog {
    fn property_table() -> &'static PropertyTable<Self> {
        &SQL_EXECUTION_LOG_PROPERTIES
    }
}

/// Derive a short method name from a fully qualified transaction name.
///
/// `com.example.UserService.loadUsers` becomes `UserService.loadUsers`.
/// Missing or single-segment names become `anonymous`.
pub fn method_name_from_definition(name: Option<&str>) -> String {
    let Some(name) = name else {
        return "anonymous".to_string();
    };
    let segments: Vec<&str> = name.split('.').collect();
    match segments.as_slice() {
        [.., owner, method] => format!("{owner}.{method}"),
        _ => "anonymous".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_name_from_definition() {
        assert_eq!(
            method_name_from_definition(Some("com.example.UserService.loadUsers")),
            "UserService.loadUsers"
        );
        assert_eq!(
            method_name_from_definition(Some("OrderService.place")),
            "OrderService.place"
        );
        assert_eq!(method_name_from_definition(Some("standalone")), "anonymous");
        assert_eq!(method_name_from_definition(None), "anonymous");
    }

    #[test]
    fn test_code_mapping() {
        assert_eq!(PropagationBehavior::from_code(3), PropagationBehavior::RequiresNew);
        assert_eq!(PropagationBehavior::from_code(42), PropagationBehavior::Unknown);
        assert_eq!(PropagationBehavior::Nested.code(), 6);
        assert_eq!(IsolationLevel::from_code(8), IsolationLevel::Serializable);
        assert_eq!(IsolationLevel::from_code(3), IsolationLevel::Default);
        assert_eq!(IsolationLevel::ReadCommitted.code(), 2);
    }

    #[test]
    fn test_sql_execution_log_occupied_time() {
        let acquired = DateTime::from_timestamp_millis(1_000).unwrap();
        let released = DateTime::from_timestamp_millis(1_250).unwrap();
        let log = SqlExecutionLog::new(acquired, released, "worker-1", vec!["select 1".into()]);
        assert_eq!(log.con_occupied_time(), 250);
        assert_eq!(log.thread(), "worker-1");
    }

    #[test]
    fn test_property_tables_resolve() {
        let acquired = DateTime::from_timestamp_millis(0).unwrap();
        let log = SqlExecutionLog::new(acquired, acquired, "t", vec!["select 1".into()]);
        let table = SqlExecutionLog::property_table();
        assert_eq!(table.resolve(&log, "queryCount"), Ok(Value::Int(1)));
        assert!(table.resolve(&log, "nope").is_err());
        assert!(TransactionLog::property_table().contains("nPlusOneDetected"));
        assert!(TransactionLog::property_table().contains("duration"));
    }

    #[test]
    fn test_status_serializes_screaming_case() {
        let json = serde_json::to_string(&TransactionStatus::RolledBack).unwrap();
        assert_eq!(json, "\"ROLLED_BACK\"");
    }
}
