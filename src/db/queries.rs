use bigdecimal::BigDecimal;
use sqlx::{PgPool, Postgres, Transaction as SqlxTransaction};
use thiserror::Error;
use uuid::Uuid;

use crate::db::models::{TransactionDlq, TransactionRow};
use crate::domain::{Transaction, TransactionStatus};

/// Outcome of a conditional balance mutation.
#[derive(Error, Debug)]
pub enum BalanceError {
    #[error("insufficient funds on account {0}")]
    InsufficientFunds(Uuid),

    #[error("account {0} not found")]
    NotFound(Uuid),

    #[error("account {0} is not active")]
    NotActive(Uuid),

    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

fn decode(err: String) -> sqlx::Error {
    sqlx::Error::Decode(err.into())
}

// --- Ledger queries ---

pub async fn insert_transaction(pool: &PgPool, tx: &Transaction) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO transactions (
            id, from_account_id, to_account_id, amount, "type", status, created_at, updated_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(tx.id)
    .bind(tx.kind.from_account_id())
    .bind(tx.kind.to_account_id())
    .bind(&tx.amount)
    .bind(tx.kind.type_tag())
    .bind(tx.status.as_str())
    .bind(tx.created_at)
    .bind(tx.updated_at)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn get_transaction(pool: &PgPool, id: Uuid) -> Result<Option<Transaction>, sqlx::Error> {
    let row = sqlx::query_as::<_, TransactionRow>(
        r#"SELECT id, from_account_id, to_account_id, amount, "type", status, created_at, updated_at
           FROM transactions WHERE id = $1"#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    row.map(|r| r.into_domain().map_err(decode)).transpose()
}

/// Locks the transaction row and returns it only while it is still PENDING.
/// This is the idempotency guard: a redelivered job for a settled transaction
/// sees `None` and must not touch any balance.
pub async fn lock_pending_transaction(
    executor: &mut SqlxTransaction<'_, Postgres>,
    id: Uuid,
) -> Result<Option<Transaction>, sqlx::Error> {
    let row = sqlx::query_as::<_, TransactionRow>(
        r#"
        SELECT id, from_account_id, to_account_id, amount, "type", status, created_at, updated_at
        FROM transactions
        WHERE id = $1 AND status = 'PENDING'
        FOR UPDATE
        "#,
    )
    .bind(id)
    .fetch_optional(&mut **executor)
    .await?;

    row.map(|r| r.into_domain().map_err(decode)).transpose()
}

/// Settles a PENDING transaction. Returns false when the row was already
/// terminal, so terminal states are never overwritten.
pub async fn settle_transaction(
    pool: &PgPool,
    id: Uuid,
    status: TransactionStatus,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE transactions SET status = $2, updated_at = NOW() WHERE id = $1 AND status = 'PENDING'",
    )
    .bind(id)
    .bind(status.as_str())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Same guarded status write, inside an open database transaction.
pub async fn settle_transaction_in_tx(
    executor: &mut SqlxTransaction<'_, Postgres>,
    id: Uuid,
    status: TransactionStatus,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE transactions SET status = $2, updated_at = NOW() WHERE id = $1 AND status = 'PENDING'",
    )
    .bind(id)
    .bind(status.as_str())
    .execute(&mut **executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

// --- Balance queries ---

/// Applies `delta` to an account balance as one conditional UPDATE. The row
/// lock taken by the UPDATE serializes concurrent mutations of the same
/// account; the `balance + delta >= 0` predicate is the authoritative funds
/// check. When no row matches, a follow-up SELECT inside the same database
/// transaction tells missing, frozen and underfunded accounts apart.
pub async fn apply_balance_delta(
    executor: &mut SqlxTransaction<'_, Postgres>,
    account_id: Uuid,
    delta: &BigDecimal,
) -> Result<BigDecimal, BalanceError> {
    let updated: Option<(BigDecimal,)> = sqlx::query_as(
        r#"
        UPDATE accounts
        SET balance = balance + $2, updated_at = NOW()
        WHERE id = $1 AND status = 'ACTIVE' AND balance + $2 >= 0
        RETURNING balance
        "#,
    )
    .bind(account_id)
    .bind(delta)
    .fetch_optional(&mut **executor)
    .await?;

    if let Some((balance,)) = updated {
        return Ok(balance);
    }

    let account: Option<(String,)> =
        sqlx::query_as("SELECT status FROM accounts WHERE id = $1 FOR UPDATE")
            .bind(account_id)
            .fetch_optional(&mut **executor)
            .await?;

    match account {
        None => Err(BalanceError::NotFound(account_id)),
        Some((status,)) if status != "ACTIVE" => Err(BalanceError::NotActive(account_id)),
        Some(_) => Err(BalanceError::InsufficientFunds(account_id)),
    }
}

// --- Dead-letter queries ---

/// Records an exhausted job. `transaction_id` is unique in the table, so a
/// redelivery that dead-letters the same transaction again is a no-op instead
/// of a duplicate row.
pub async fn insert_dlq_entry(
    pool: &PgPool,
    transaction_id: Uuid,
    error_reason: &str,
    retry_count: i32,
    payload: serde_json::Value,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO transaction_dlq (
            id, transaction_id, error_reason, retry_count, payload,
            original_created_at, moved_to_dlq_at
        )
        SELECT $1, $2, $3, $4, $5, t.created_at, NOW()
        FROM transactions t WHERE t.id = $2
        ON CONFLICT (transaction_id) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(transaction_id)
    .bind(error_reason)
    .bind(retry_count)
    .bind(payload)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn list_dlq(pool: &PgPool) -> Result<Vec<TransactionDlq>, sqlx::Error> {
    sqlx::query_as::<_, TransactionDlq>(
        "SELECT * FROM transaction_dlq ORDER BY moved_to_dlq_at DESC LIMIT 100",
    )
    .fetch_all(pool)
    .await
}

/// Removes a DLQ entry and hands it back, holding the row lock until commit.
pub async fn take_dlq_entry(
    executor: &mut SqlxTransaction<'_, Postgres>,
    id: Uuid,
) -> Result<Option<TransactionDlq>, sqlx::Error> {
    sqlx::query_as::<_, TransactionDlq>("DELETE FROM transaction_dlq WHERE id = $1 RETURNING *")
        .bind(id)
        .fetch_optional(&mut **executor)
        .await
}

/// Puts a dead-lettered transaction back in front of the worker.
pub async fn reset_transaction_to_pending(
    executor: &mut SqlxTransaction<'_, Postgres>,
    transaction_id: Uuid,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE transactions SET status = 'PENDING', updated_at = NOW() WHERE id = $1")
        .bind(transaction_id)
        .execute(&mut **executor)
        .await?;

    Ok(())
}
