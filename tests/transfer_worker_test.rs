//! Settlement tests against a real Postgres. Skipped when DATABASE_URL is
//! not set.

use bigdecimal::BigDecimal;
use ledger_core::cache::BalanceCache;
use ledger_core::db::queries;
use ledger_core::domain::{Transaction, TransactionStatus};
use ledger_core::queue::{TransferJob, TransferQueue};
use ledger_core::services::{JobOutcome, TransferWorker};
use sqlx::PgPool;
use sqlx::migrate::Migrator;
use std::path::Path;
use std::str::FromStr;
use uuid::Uuid;

async fn setup_pool() -> Option<PgPool> {
    let database_url = match std::env::var("DATABASE_URL") {
        Ok(v) => v,
        Err(_) => {
            println!("Skipping worker test: DATABASE_URL not set");
            return None;
        }
    };

    let pool = PgPool::connect(&database_url)
        .await
        .expect("Failed to connect to test DB");
    let migrator = Migrator::new(Path::join(
        Path::new(env!("CARGO_MANIFEST_DIR")),
        "migrations",
    ))
    .await
    .expect("Failed to load migrations");
    migrator
        .run(&pool)
        .await
        .expect("Failed to run migrations on test DB");

    Some(pool)
}

// The queue and cache handles connect lazily; `process` never touches them.
fn worker(pool: &PgPool) -> TransferWorker {
    let queue = TransferQueue::new("redis://127.0.0.1:6379").expect("queue handle");
    let cache = BalanceCache::new("redis://127.0.0.1:6379").expect("cache handle");
    TransferWorker::new(pool.clone(), queue, cache)
}

async fn create_account_with_status(pool: &PgPool, balance: &str, status: &str) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query("INSERT INTO accounts (id, balance, status) VALUES ($1, $2, $3)")
        .bind(id)
        .bind(BigDecimal::from_str(balance).unwrap())
        .bind(status)
        .execute(pool)
        .await
        .expect("Failed to insert account");
    id
}

async fn create_account(pool: &PgPool, balance: &str) -> Uuid {
    create_account_with_status(pool, balance, "ACTIVE").await
}

async fn balance_of(pool: &PgPool, id: Uuid) -> BigDecimal {
    let (balance,): (BigDecimal,) = sqlx::query_as("SELECT balance FROM accounts WHERE id = $1")
        .bind(id)
        .fetch_one(pool)
        .await
        .expect("Failed to fetch balance");
    balance
}

async fn status_of(pool: &PgPool, id: Uuid) -> TransactionStatus {
    queries::get_transaction(pool, id)
        .await
        .expect("Failed to fetch transaction")
        .expect("transaction missing")
        .status
}

async fn pending_transfer(pool: &PgPool, from: Uuid, to: Uuid, amount: &str) -> TransferJob {
    let tx = Transaction::pending_transfer(from, to, BigDecimal::from_str(amount).unwrap());
    queries::insert_transaction(pool, &tx)
        .await
        .expect("Failed to insert transaction");

    TransferJob {
        transaction_id: tx.id,
        from_account_id: from,
        to_account_id: to,
        amount: tx.amount.clone(),
    }
}

#[tokio::test]
async fn test_transfer_moves_both_balances_and_completes() {
    let Some(pool) = setup_pool().await else { return };

    let from = create_account(&pool, "100").await;
    let to = create_account(&pool, "0").await;
    let job = pending_transfer(&pool, from, to, "50").await;

    let outcome = worker(&pool).process(&job).await.expect("process");
    assert_eq!(outcome, JobOutcome::Completed);

    assert_eq!(balance_of(&pool, from).await, BigDecimal::from(50));
    assert_eq!(balance_of(&pool, to).await, BigDecimal::from(50));
    assert_eq!(
        status_of(&pool, job.transaction_id).await,
        TransactionStatus::Completed
    );
}

#[tokio::test]
async fn test_insufficient_funds_leaves_balances_untouched() {
    let Some(pool) = setup_pool().await else { return };

    let from = create_account(&pool, "40").await;
    let to = create_account(&pool, "10").await;
    let job = pending_transfer(&pool, from, to, "60").await;

    let outcome = worker(&pool).process(&job).await.expect("process");
    assert!(matches!(outcome, JobOutcome::Rejected(_)));

    assert_eq!(balance_of(&pool, from).await, BigDecimal::from(40));
    assert_eq!(balance_of(&pool, to).await, BigDecimal::from(10));
    assert_eq!(
        status_of(&pool, job.transaction_id).await,
        TransactionStatus::Failed
    );
}

#[tokio::test]
async fn test_missing_destination_unwinds_the_debit() {
    let Some(pool) = setup_pool().await else { return };

    let from = create_account(&pool, "100").await;
    let missing = Uuid::new_v4();
    let job = pending_transfer(&pool, from, missing, "30").await;

    let outcome = worker(&pool).process(&job).await.expect("process");
    assert!(matches!(outcome, JobOutcome::Rejected(_)));

    // The debit committed nothing even though it ran first.
    assert_eq!(balance_of(&pool, from).await, BigDecimal::from(100));
    assert_eq!(
        status_of(&pool, job.transaction_id).await,
        TransactionStatus::Failed
    );
}

#[tokio::test]
async fn test_frozen_destination_rejects_and_unwinds_the_debit() {
    let Some(pool) = setup_pool().await else { return };

    let from = create_account(&pool, "100").await;
    let frozen = create_account_with_status(&pool, "0", "FROZEN").await;
    let job = pending_transfer(&pool, from, frozen, "25").await;

    let outcome = worker(&pool).process(&job).await.expect("process");
    assert!(matches!(outcome, JobOutcome::Rejected(_)));

    assert_eq!(balance_of(&pool, from).await, BigDecimal::from(100));
    assert_eq!(balance_of(&pool, frozen).await, BigDecimal::from(0));
    assert_eq!(
        status_of(&pool, job.transaction_id).await,
        TransactionStatus::Failed
    );
}

#[tokio::test]
async fn test_redelivered_job_does_not_double_apply() {
    let Some(pool) = setup_pool().await else { return };

    let from = create_account(&pool, "100").await;
    let to = create_account(&pool, "0").await;
    let job = pending_transfer(&pool, from, to, "50").await;

    let w = worker(&pool);
    let first = w.process(&job).await.expect("first delivery");
    let second = w.process(&job).await.expect("second delivery");

    assert_eq!(first, JobOutcome::Completed);
    assert_eq!(second, JobOutcome::AlreadySettled);
    assert_eq!(balance_of(&pool, from).await, BigDecimal::from(50));
    assert_eq!(balance_of(&pool, to).await, BigDecimal::from(50));
}

#[tokio::test]
async fn test_concurrent_debits_settle_exactly_once() {
    let Some(pool) = setup_pool().await else { return };

    let from = create_account(&pool, "100").await;
    let to_a = create_account(&pool, "0").await;
    let to_b = create_account(&pool, "0").await;
    let job_a = pending_transfer(&pool, from, to_a, "60").await;
    let job_b = pending_transfer(&pool, from, to_b, "60").await;

    let worker_a = worker(&pool);
    let worker_b = worker(&pool);
    let (outcome_a, outcome_b) = tokio::join!(worker_a.process(&job_a), worker_b.process(&job_b));
    let outcomes = [outcome_a.expect("process a"), outcome_b.expect("process b")];

    let completed = outcomes
        .iter()
        .filter(|o| **o == JobOutcome::Completed)
        .count();
    let rejected = outcomes
        .iter()
        .filter(|o| matches!(**o, JobOutcome::Rejected(_)))
        .count();
    assert_eq!(completed, 1, "exactly one transfer must win the funds");
    assert_eq!(rejected, 1);

    assert_eq!(balance_of(&pool, from).await, BigDecimal::from(40));
}

#[tokio::test]
async fn test_opposite_direction_transfers_both_complete() {
    let Some(pool) = setup_pool().await else { return };

    let a = create_account(&pool, "100").await;
    let b = create_account(&pool, "100").await;
    let job_ab = pending_transfer(&pool, a, b, "30").await;
    let job_ba = pending_transfer(&pool, b, a, "20").await;

    // Account rows are locked in id order, so neither settlement can
    // deadlock against the other.
    let worker_a = worker(&pool);
    let worker_b = worker(&pool);
    let (outcome_ab, outcome_ba) =
        tokio::join!(worker_a.process(&job_ab), worker_b.process(&job_ba));

    assert_eq!(outcome_ab.expect("a to b"), JobOutcome::Completed);
    assert_eq!(outcome_ba.expect("b to a"), JobOutcome::Completed);
    assert_eq!(balance_of(&pool, a).await, BigDecimal::from(90));
    assert_eq!(balance_of(&pool, b).await, BigDecimal::from(110));
}

#[tokio::test]
async fn test_duplicate_dead_letter_keeps_one_dlq_row() {
    let Some(pool) = setup_pool().await else { return };

    let from = create_account(&pool, "10").await;
    let to = create_account(&pool, "0").await;
    let job = pending_transfer(&pool, from, to, "5").await;
    let payload = serde_json::to_value(&job).expect("encode job");

    queries::insert_dlq_entry(&pool, job.transaction_id, "storage down", 3, payload.clone())
        .await
        .expect("first dead-letter");
    // A redelivery that exhausts again must not add a second row.
    queries::insert_dlq_entry(&pool, job.transaction_id, "storage down", 4, payload)
        .await
        .expect("repeat dead-letter");

    let (count,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM transaction_dlq WHERE transaction_id = $1")
            .bind(job.transaction_id)
            .fetch_one(&pool)
            .await
            .expect("count dlq rows");
    assert_eq!(count, 1);
}
