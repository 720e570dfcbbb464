//! Durable transfer job queue on Redis.
//!
//! Jobs are LPUSHed onto a pending list and moved to a working list with
//! BRPOPLPUSH on dequeue, so a worker crash leaves the payload recoverable
//! instead of lost. Delivery is therefore at-least-once; the worker's
//! idempotency guard makes redelivery safe. Attempts are counted per
//! transaction id and capped at [`MAX_DELIVERIES`], after which the job is
//! dead-lettered.

use bigdecimal::BigDecimal;
use redis::aio::MultiplexedConnection;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Named job kind, kept from the wire contract.
pub const JOB_KIND: &str = "process-transfer";

const PENDING_LIST: &str = "transfers:process-transfer";
const WORKING_LIST: &str = "transfers:process-transfer:working";
const ATTEMPTS_PREFIX: &str = "transfers:attempts:";

/// Attempt counters outlive any sane redelivery cycle but not a redeployed
/// system.
const ATTEMPTS_TTL_SECS: u64 = 86_400;

/// Bounded retry: a job is delivered at most this many times before it is
/// moved to the dead-letter table.
pub const MAX_DELIVERIES: i64 = 3;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("queue backend error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("job payload error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Wire payload of one transfer job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferJob {
    pub transaction_id: Uuid,
    pub from_account_id: Uuid,
    pub to_account_id: Uuid,
    pub amount: BigDecimal,
}

/// A dequeued job plus the bookkeeping needed to ack or retry it. `raw` is
/// the exact list element, required for LREM.
#[derive(Debug)]
pub struct DeliveredJob {
    pub job: TransferJob,
    raw: String,
    pub attempts: i64,
}

#[derive(Clone)]
pub struct TransferQueue {
    client: redis::Client,
}

impl TransferQueue {
    pub fn new(redis_url: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client })
    }

    async fn conn(&self) -> Result<MultiplexedConnection, QueueError> {
        Ok(self.client.get_multiplexed_tokio_connection().await?)
    }

    pub async fn enqueue(&self, job: &TransferJob) -> Result<(), QueueError> {
        let payload = serde_json::to_string(job)?;
        let mut conn = self.conn().await?;

        redis::cmd("LPUSH")
            .arg(PENDING_LIST)
            .arg(&payload)
            .query_async::<_, i64>(&mut conn)
            .await?;

        tracing::debug!(transaction_id = %job.transaction_id, kind = JOB_KIND, "job enqueued");
        Ok(())
    }

    /// Blocks up to `timeout_secs` for the next job. The payload is parked on
    /// the working list until `ack` or `retry` removes it.
    pub async fn dequeue(&self, timeout_secs: usize) -> Result<Option<DeliveredJob>, QueueError> {
        let mut conn = self.conn().await?;

        let raw: Option<String> = redis::cmd("BRPOPLPUSH")
            .arg(PENDING_LIST)
            .arg(WORKING_LIST)
            .arg(timeout_secs)
            .query_async(&mut conn)
            .await?;

        let Some(raw) = raw else {
            return Ok(None);
        };

        let job: TransferJob = serde_json::from_str(&raw)?;

        let attempts_key = format!("{ATTEMPTS_PREFIX}{}", job.transaction_id);
        let attempts: i64 = redis::cmd("INCR")
            .arg(&attempts_key)
            .query_async(&mut conn)
            .await?;
        redis::cmd("EXPIRE")
            .arg(&attempts_key)
            .arg(ATTEMPTS_TTL_SECS)
            .query_async::<_, i64>(&mut conn)
            .await?;

        Ok(Some(DeliveredJob { job, raw, attempts }))
    }

    /// Removes a settled job from the working list and clears its attempt
    /// counter. The job no longer exists anywhere after this.
    pub async fn ack(&self, delivered: &DeliveredJob) -> Result<(), QueueError> {
        let mut conn = self.conn().await?;

        redis::cmd("LREM")
            .arg(WORKING_LIST)
            .arg(1)
            .arg(&delivered.raw)
            .query_async::<_, i64>(&mut conn)
            .await?;
        redis::cmd("DEL")
            .arg(format!("{ATTEMPTS_PREFIX}{}", delivered.job.transaction_id))
            .query_async::<_, i64>(&mut conn)
            .await?;

        Ok(())
    }

    /// Puts a failed delivery back on the pending list for another attempt.
    /// The attempt counter is kept, so deliveries stay bounded. The push and
    /// the working-list removal run in one MULTI/EXEC so the payload is never
    /// on neither list; a duplicate delivery is absorbed by the worker's
    /// idempotency guard, a lost one would strand the transaction.
    pub async fn retry(&self, delivered: &DeliveredJob) -> Result<(), QueueError> {
        let mut conn = self.conn().await?;

        redis::pipe()
            .atomic()
            .cmd("LPUSH")
            .arg(PENDING_LIST)
            .arg(&delivered.raw)
            .ignore()
            .cmd("LREM")
            .arg(WORKING_LIST)
            .arg(1)
            .arg(&delivered.raw)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await?;

        Ok(())
    }

    /// Drains the working list back onto the pending list. Run at process
    /// start so jobs stranded by a crashed worker are re-delivered.
    pub async fn recover_working(&self) -> Result<u64, QueueError> {
        let mut conn = self.conn().await?;
        let mut recovered = 0u64;

        loop {
            let moved: Option<String> = redis::cmd("RPOPLPUSH")
                .arg(WORKING_LIST)
                .arg(PENDING_LIST)
                .query_async(&mut conn)
                .await?;

            if moved.is_none() {
                break;
            }
            recovered += 1;
        }

        Ok(recovered)
    }
}
