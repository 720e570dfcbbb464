//! Side cache invalidation for account balances.
//!
//! The account service populates `account:{id}` keys on reads. This service
//! never writes them; after mutating a balance it only deletes the key so the
//! next read re-populates from the store. Invalidation runs outside the
//! database transaction and is best-effort; staleness between commit and
//! invalidation is bounded by the key TTL the account service sets.

use redis::aio::MultiplexedConnection;
use uuid::Uuid;

const CACHE_PREFIX: &str = "account:";

#[derive(Clone)]
pub struct BalanceCache {
    client: redis::Client,
}

impl BalanceCache {
    pub fn new(redis_url: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client })
    }

    async fn conn(&self) -> Result<MultiplexedConnection, redis::RedisError> {
        self.client.get_multiplexed_tokio_connection().await
    }

    pub async fn invalidate(&self, account_id: Uuid) -> Result<(), redis::RedisError> {
        let mut conn = self.conn().await?;
        redis::cmd("DEL")
            .arg(format!("{CACHE_PREFIX}{account_id}"))
            .query_async::<_, i64>(&mut conn)
            .await?;
        Ok(())
    }
}
