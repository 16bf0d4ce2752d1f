//! Consumers of finalized logs.
//!
//! Listeners are invoked synchronously on the context that finalized the log.
//! A failing or panicking listener is logged and skipped; it never prevents
//! the remaining listeners from running.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::error::ListenerError;
use crate::model::{SqlExecutionLog, TransactionLog};
use crate::store::{SqlExecutionLogStore, TransactionLogStore};

/// Receives every finalized root [`TransactionLog`].
pub trait TransactionLogListener: Send + Sync {
    fn listen(&self, log: &TransactionLog) -> Result<(), ListenerError>;

    /// Name used when reporting a failure.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Receives every completed standalone connection session.
pub trait SqlExecutionLogListener: Send + Sync {
    fn listen(&self, log: &SqlExecutionLog) -> Result<(), ListenerError>;

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Saves transaction logs into a [`TransactionLogStore`].
pub struct TransactionLogPersistenceListener {
    store: Arc<dyn TransactionLogStore>,
}

impl TransactionLogPersistenceListener {
    pub fn new(store: Arc<dyn TransactionLogStore>) -> Self {
        Self { store }
    }
}

impl TransactionLogListener for TransactionLogPersistenceListener {
    fn listen(&self, log: &TransactionLog) -> Result<(), ListenerError> {
        self.store.save(log.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "TransactionLogPersistenceListener"
    }
}

/// Saves connection sessions into a [`SqlExecutionLogStore`].
pub struct SqlExecutionLogPersistenceListener {
    store: Arc<dyn SqlExecutionLogStore>,
}

impl SqlExecutionLogPersistenceListener {
    pub fn new(store: Arc<dyn SqlExecutionLogStore>) -> Self {
        Self { store }
    }
}

impl SqlExecutionLogListener for SqlExecutionLogPersistenceListener {
    fn listen(&self, log: &SqlExecutionLog) -> Result<(), ListenerError> {
        self.store.save(log.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "SqlExecutionLogPersistenceListener"
    }
}

/// Run `call` inside its own failure boundary.
///
/// Returns `false` if the listener returned an error or panicked.
pub(crate) fn dispatch<F>(listener_name: &str, tx_id: Option<u64>, call: F) -> bool
where
    F: FnOnce() -> Result<(), ListenerError>,
{
    match panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            tracing::error!(
                listener = listener_name,
                tx.id = ?tx_id,
                error = %e,
                "Failed to publish log to listener"
            );
            false
        }
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::error!(
                listener = listener_name,
                tx.id = ?tx_id,
                panic = %message,
                "Listener panicked while handling log"
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::tests::{at, root_log};
    use crate::model::TransactionStatus;
    use crate::store::{InMemorySqlExecutionLogStore, InMemoryTransactionLogStore};

    #[test]
    fn test_persistence_listener_saves() {
        let store = Arc::new(InMemoryTransactionLogStore::new(&[100, 1000]));
        let listener = TransactionLogPersistenceListener::new(store.clone());
        listener.listen(&root_log(0, 50, TransactionStatus::Committed)).unwrap();
        assert_eq!(store.count(), 1);
        assert_eq!(listener.name(), "TransactionLogPersistenceListener");
    }

    #[test]
    fn test_sql_persistence_listener_saves() {
        let store = Arc::new(InMemorySqlExecutionLogStore::new());
        let listener = SqlExecutionLogPersistenceListener::new(store.clone());
        listener
            .listen(&SqlExecutionLog::new(at(0), at(5), "main", vec![]))
            .unwrap();
        assert_eq!(store.records().len(), 1);
    }

    #[test]
    fn test_dispatch_contains_errors_and_panics() {
        assert!(dispatch("ok", Some(1), || Ok(())));
        assert!(!dispatch("err", Some(1), || Err("boom".into())));
        assert!(!dispatch("panic", None, || panic!("listener exploded")));
    }
}
