//! End-to-end tracking through the in-memory board.

use tx_board::prelude::*;
use tx_board::{
    Direction, EventType, FilterNode, Operator, PageRequest, Sort, TransactionLog,
    TransactionLogListener,
};

fn run_transaction(ctx: &mut TrackingContext, method: &str, queries: &[&str], status: TransactionStatus) {
    ctx.begin_frame(method, PropagationBehavior::Required, IsolationLevel::ReadCommitted);
    ctx.acknowledge_start(None);
    ctx.connection_acquired();
    for q in queries {
        ctx.executed_query(*q);
    }
    match status {
        TransactionStatus::Committed => ctx.commit(),
        TransactionStatus::RolledBack => ctx.rollback(),
        TransactionStatus::Errored => {
            let error = std::io::Error::new(std::io::ErrorKind::Other, "constraint violation");
            ctx.error_occurred(&error);
        }
    }
    ctx.connection_released();
}

#[test]
fn test_nested_transactions_are_stored_as_one_tree() {
    let board = TxBoard::new(TxBoardConfig::default()).unwrap();
    let mut ctx = board.context();

    ctx.begin_frame("OrderService.place", PropagationBehavior::Required, IsolationLevel::Default);
    ctx.acknowledge_start(None);
    ctx.connection_acquired();
    ctx.executed_query("insert into orders (id, total) values (7, 19.99)");

    ctx.begin_frame("AuditService.record", PropagationBehavior::RequiresNew, IsolationLevel::Default);
    ctx.acknowledge_start(None);
    ctx.connection_acquired();
    ctx.executed_query("insert into audit (order_id) values (7)");
    ctx.commit();
    ctx.connection_released();

    ctx.begin_frame("StockService.reserve", PropagationBehavior::Nested, IsolationLevel::Default);
    ctx.acknowledge_start(None);
    ctx.executed_query("update stock set qty = qty - 1 where sku = 'A-1'");
    ctx.rollback();

    ctx.commit();
    assert!(!ctx.is_idle());
    ctx.connection_released();
    assert!(ctx.is_idle());

    let store = board.transaction_logs();
    assert_eq!(store.count(), 1);
    let records = store.records();
    let root = &records[0];

    let children: Vec<&str> = root.child().iter().map(|c| c.method()).collect();
    assert_eq!(children, vec!["AuditService.record", "StockService.reserve"]);
    assert_eq!(root.total_transaction_count(), 3);
    assert_eq!(root.total_query_count(), 3);
    assert_eq!(root.connection_acquisition_count(), 2);
    assert_eq!(root.child()[1].status(), TransactionStatus::RolledBack);
    assert_eq!(root.status(), TransactionStatus::Committed);

    let releases = root
        .events()
        .iter()
        .filter(|e| e.kind == EventType::ConnectionReleased)
        .count();
    assert_eq!(releases, 2);
    assert!(root.connection_occupied_time() >= 0);
}

#[test]
fn test_summary_and_queries_over_stored_logs() {
    let board = TxBoard::new(TxBoardConfig::default()).unwrap();
    let mut ctx = board.context();

    run_transaction(&mut ctx, "UserService.create", &["insert into users values (1)"], TransactionStatus::Committed);
    run_transaction(&mut ctx, "UserService.update", &["update users set a = 1"], TransactionStatus::Committed);
    run_transaction(&mut ctx, "UserService.delete", &[], TransactionStatus::RolledBack);
    run_transaction(&mut ctx, "PaymentService.charge", &["select 1", "select 2"], TransactionStatus::Errored);

    let store = board.transaction_logs();
    let summary = store.summary();
    assert_eq!(summary.total_transaction, 4);
    assert_eq!(summary.committed_count, 2);
    assert_eq!(summary.rolled_back_count, 1);
    assert_eq!(summary.errored_count, 1);
    assert_eq!(summary.connection_acquisition_count, 4);
    assert_eq!(store.count_by_status(TransactionStatus::Errored), 1);
    assert_eq!(store.metrics().success_rate, 50.0);

    let all = store.find_all(&PageRequest::new(0, 10).unwrap());
    assert_eq!(all.total_elements(), 4);

    let users = store.find_all(
        &PageRequest::new(0, 10)
            .unwrap()
            .with_filter(FilterNode::filter("method", "userservice.", Operator::StartsWith))
            .with_sort(Sort::by("method", Direction::Asc).unwrap()),
    );
    let methods: Vec<&str> = users.content().iter().map(|l| l.method()).collect();
    assert_eq!(methods, vec!["UserService.create", "UserService.delete", "UserService.update"]);

    let contradictory = FilterNode::and(vec![
        FilterNode::filter("status", "COMMITTED", Operator::Equals),
        FilterNode::filter("status", "ROLLED_BACK", Operator::Equals),
    ]);
    let none = store.find_all(&PageRequest::new(0, 10).unwrap().with_filter(contradictory));
    assert!(none.content().is_empty());
    assert_eq!(none.total_pages(), 1);

    let union = FilterNode::or(vec![
        FilterNode::filter("status", "ROLLED_BACK", Operator::Equals),
        FilterNode::filter("status", "ERRORED", Operator::Equals),
    ]);
    let failed = store.find_all(&PageRequest::new(0, 10).unwrap().with_filter(union));
    assert_eq!(failed.total_elements(), 2);

    let membership = store.find_all(
        &PageRequest::new(0, 10)
            .unwrap()
            .with_filter(FilterNode::filter("executedQueries", "select 2", Operator::Contains)),
    );
    assert_eq!(membership.content()[0].method(), "PaymentService.charge");

    let beyond = store.find_all(&PageRequest::new(5, 2).unwrap());
    assert!(beyond.content().is_empty());
    assert!(!beyond.has_next());
    assert_eq!(beyond.total_pages(), 2);
}

#[test]
fn test_extra_listener_runs_after_persistence() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Counter(Arc<AtomicUsize>);

    impl TransactionLogListener for Counter {
        fn listen(&self, _log: &TransactionLog) -> Result<(), tx_board::ListenerError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    let seen = Arc::new(AtomicUsize::new(0));
    let listener_seen = seen.clone();
    let board = TxBoard::with_builder(TxBoardConfig::development(), move |builder| {
        builder.with_listener(Counter(listener_seen))
    })
    .unwrap();

    let mut ctx = board.context();
    run_transaction(&mut ctx, "A.a", &["select 1"], TransactionStatus::Committed);
    run_transaction(&mut ctx, "B.b", &[], TransactionStatus::Committed);

    assert_eq!(seen.load(Ordering::SeqCst), 2);
    assert_eq!(board.transaction_logs().count(), 2);
}

#[test]
fn test_transaction_log_serializes_camel_case() {
    let board = TxBoard::new(TxBoardConfig::default()).unwrap();
    let mut ctx = board.tracker().context_named("integration");
    run_transaction(&mut ctx, "A.a", &["select 1"], TransactionStatus::Committed);

    let records = board.transaction_logs().records();
    let json = serde_json::to_value(&*records[0]).unwrap();
    assert_eq!(json["method"], "A.a");
    assert_eq!(json["status"], "COMMITTED");
    assert_eq!(json["isolation"], "READ_COMMITTED");
    assert_eq!(json["mostParent"], true);
    assert_eq!(json["totalQueryCount"], 1);
    assert_eq!(json["connectionSummary"]["acquisitionCount"], 1);
    assert_eq!(json["events"][0]["type"], "TRANSACTION_START");
    assert!(json.get("postTransactionQueries").is_none());

    let distribution = serde_json::to_value(board.transaction_logs().duration_distribution()).unwrap();
    assert_eq!(distribution[0]["range"]["minMillis"], 0);
    assert!(distribution[5]["range"]["maxMillis"].is_null());
}
