//! Basic example showing how to use tx-board.
//!
//! Run with: cargo run --example basic

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tx_board::prelude::*;
use tx_board::{method_name_from_definition, Direction, FilterNode, Operator, PageRequest, Sort};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing subscriber
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tx_board=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Development config: detailed logs, low thresholds
    let board = TxBoard::new(TxBoardConfig::development())?;
    let mut ctx = board.context();

    // A service call that loads users, then their posts one by one
    let method = method_name_from_definition(Some("com.example.UserService.loadUsers"));
    ctx.begin_frame(method, PropagationBehavior::Required, IsolationLevel::ReadCommitted);
    ctx.acknowledge_start(None);
    ctx.connection_acquired();
    ctx.executed_query("SELECT id, name FROM users WHERE active = true");
    for user_id in 1..=4 {
        ctx.executed_query(format!("SELECT id, title FROM posts WHERE user_id = {user_id}"));
    }

    // Nested transaction with its own connection
    ctx.begin_frame("AuditService.record", PropagationBehavior::RequiresNew, IsolationLevel::Default);
    ctx.acknowledge_start(None);
    ctx.connection_acquired();
    ctx.executed_query("INSERT INTO audit (action) VALUES ('load_users')");
    ctx.commit();
    ctx.connection_released();

    ctx.commit();
    ctx.connection_released();

    // A failing transaction
    ctx.begin_frame("OrderService.place", PropagationBehavior::Required, IsolationLevel::Default);
    ctx.acknowledge_start(None);
    ctx.connection_acquired();
    ctx.executed_query("INSERT INTO orders (id) VALUES (1)");
    ctx.rollback();
    ctx.connection_released();

    let store = board.transaction_logs();
    let summary = store.summary();
    tracing::info!(
        total = summary.total_transaction,
        committed = summary.committed_count,
        rolled_back = summary.rolled_back_count,
        avg_duration_ms = summary.average_duration,
        "Transaction summary"
    );

    for bucket in store.duration_distribution() {
        tracing::info!(range = %bucket.range, count = bucket.count, "Duration bucket");
    }

    let request = PageRequest::new(0, 10)?
        .with_filter(FilterNode::filter("nPlusOneDetected", true, Operator::Equals))
        .with_sort(Sort::by("duration", Direction::Desc)?);
    for log in store.find_all(&request).content() {
        tracing::info!(tx.id = log.tx_id(), method = log.method(), "N+1 suspect");
    }

    Ok(())
}
