//! Transfer worker: consumes transfer jobs and settles them.
//!
//! Settlement is one database transaction spanning the debit, the credit and
//! the ledger status write; either all three commit or none do. The PENDING
//! row lock taken first doubles as the idempotency guard, so a redelivered
//! job for an already-settled transaction is a no-op.

use sqlx::{PgPool, Postgres, Transaction as SqlxTransaction};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::cache::BalanceCache;
use crate::db::queries::{self, BalanceError};
use crate::domain::TransactionStatus;
use crate::queue::{DeliveredJob, MAX_DELIVERIES, TransferJob, TransferQueue};

const DEQUEUE_TIMEOUT_SECS: usize = 5;
const ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Result of running one job against the ledger.
#[derive(Debug, PartialEq, Eq)]
pub enum JobOutcome {
    /// Both balances moved and the transaction is COMPLETED.
    Completed,
    /// The transaction was no longer PENDING; nothing was touched.
    AlreadySettled,
    /// Terminal domain refusal (insufficient funds, missing or inactive
    /// account). Balances are untouched and the transaction is FAILED.
    Rejected(String),
}

#[derive(Clone)]
pub struct TransferWorker {
    db: PgPool,
    queue: TransferQueue,
    cache: BalanceCache,
}

impl TransferWorker {
    pub fn new(db: PgPool, queue: TransferQueue, cache: BalanceCache) -> Self {
        Self { db, queue, cache }
    }

    /// Consumer loop. Multiple worker processes may run this concurrently;
    /// correctness rests on the row locks inside `process`, not on there
    /// being a single consumer.
    pub async fn run(self) {
        info!("transfer worker started");

        loop {
            match self.queue.dequeue(DEQUEUE_TIMEOUT_SECS).await {
                Ok(Some(delivered)) => self.handle_delivery(delivered).await,
                Ok(None) => {}
                Err(e) => {
                    error!("worker dequeue error: {e}");
                    sleep(ERROR_BACKOFF).await;
                }
            }
        }
    }

    async fn handle_delivery(&self, delivered: DeliveredJob) {
        let transaction_id = delivered.job.transaction_id;

        match self.process(&delivered.job).await {
            Ok(JobOutcome::Completed) => {
                self.invalidate_accounts(&delivered.job).await;
                info!(%transaction_id, "transfer completed");
                self.ack(&delivered).await;
            }
            Ok(JobOutcome::AlreadySettled) => {
                info!(%transaction_id, "duplicate delivery ignored");
                self.ack(&delivered).await;
            }
            Ok(JobOutcome::Rejected(reason)) => {
                warn!(%transaction_id, %reason, "transfer rejected");
                self.ack(&delivered).await;
            }
            Err(e) => {
                error!(%transaction_id, attempt = delivered.attempts, "transfer settlement error: {e}");
                if delivered.attempts >= MAX_DELIVERIES {
                    self.dead_letter(&delivered, &e.to_string()).await;
                } else if let Err(qe) = self.queue.retry(&delivered).await {
                    error!(%transaction_id, "failed to requeue job: {qe}");
                }
                sleep(ERROR_BACKOFF).await;
            }
        }
    }

    /// Settles one transfer job. Storage errors bubble up for the retry
    /// path; everything else ends in a terminal [`JobOutcome`].
    pub async fn process(&self, job: &TransferJob) -> Result<JobOutcome, sqlx::Error> {
        let mut db_tx = self.db.begin().await?;

        // Idempotency guard: the lock also serializes two workers holding
        // the same transaction id.
        let pending = queries::lock_pending_transaction(&mut db_tx, job.transaction_id).await?;
        if pending.is_none() {
            // Dropping db_tx rolls the (empty) transaction back.
            return Ok(JobOutcome::AlreadySettled);
        }

        if let Err(e) = self.apply_deltas(&mut db_tx, job).await {
            return match e {
                BalanceError::Db(db_err) => Err(db_err),
                refusal => {
                    db_tx.rollback().await?;
                    self.mark_failed(job.transaction_id).await?;
                    Ok(JobOutcome::Rejected(refusal.to_string()))
                }
            };
        }

        queries::settle_transaction_in_tx(
            &mut db_tx,
            job.transaction_id,
            TransactionStatus::Completed,
        )
        .await?;
        db_tx.commit().await?;

        Ok(JobOutcome::Completed)
    }

    /// Debit and credit under the same database transaction, so a refusal on
    /// either side unwinds the other. Account rows are locked in id order;
    /// otherwise two opposite-direction transfers could deadlock.
    async fn apply_deltas(
        &self,
        db_tx: &mut SqlxTransaction<'_, Postgres>,
        job: &TransferJob,
    ) -> Result<(), BalanceError> {
        let debit = -job.amount.clone();
        let mut deltas = [
            (job.from_account_id, &debit),
            (job.to_account_id, &job.amount),
        ];
        deltas.sort_by_key(|(account_id, _)| *account_id);

        for (account_id, delta) in deltas {
            queries::apply_balance_delta(db_tx, account_id, delta).await?;
        }
        Ok(())
    }

    /// Unconditional terminal mark after a rolled-back settlement. Guarded
    /// on PENDING so it can never overwrite a COMPLETED row.
    async fn mark_failed(&self, transaction_id: Uuid) -> Result<(), sqlx::Error> {
        queries::settle_transaction(&self.db, transaction_id, TransactionStatus::Failed).await?;
        Ok(())
    }

    /// Cache invalidation after commit is best-effort; a missed delete only
    /// extends staleness until the account service's key TTL expires.
    async fn invalidate_accounts(&self, job: &TransferJob) {
        for account_id in [job.from_account_id, job.to_account_id] {
            if let Err(e) = self.cache.invalidate(account_id).await {
                warn!(%account_id, "cache invalidation failed: {e}");
            }
        }
    }

    async fn ack(&self, delivered: &DeliveredJob) {
        if let Err(e) = self.queue.ack(delivered).await {
            // The job stays on the working list; startup recovery will
            // re-deliver it and the idempotency guard absorbs the repeat.
            error!(transaction_id = %delivered.job.transaction_id, "failed to ack job: {e}");
        }
    }

    /// Retries are exhausted: record the job in the DLQ, mark the
    /// transaction FAILED and drop the delivery.
    async fn dead_letter(&self, delivered: &DeliveredJob, reason: &str) {
        let job = &delivered.job;
        let payload = serde_json::to_value(job).unwrap_or(serde_json::Value::Null);

        let moved = queries::insert_dlq_entry(
            &self.db,
            job.transaction_id,
            reason,
            delivered.attempts as i32,
            payload,
        )
        .await;

        match moved {
            Ok(()) => {
                if let Err(e) = self.mark_failed(job.transaction_id).await {
                    error!(transaction_id = %job.transaction_id, "failed to mark dead-lettered transfer FAILED: {e}");
                }
                warn!(transaction_id = %job.transaction_id, "job moved to DLQ after {} deliveries", delivered.attempts);
                self.ack(delivered).await;
            }
            Err(e) => {
                // Could not persist the DLQ entry; keep the job alive so it
                // is dead-lettered again once storage recovers.
                error!(transaction_id = %job.transaction_id, "failed to write DLQ entry: {e}");
                if let Err(qe) = self.queue.retry(delivered).await {
                    error!(transaction_id = %job.transaction_id, "failed to requeue job: {qe}");
                }
            }
        }
    }
}
