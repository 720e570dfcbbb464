//! Cache invalidation against a real Redis. Skipped when REDIS_URL is not
//! set.

use ledger_core::cache::BalanceCache;
use uuid::Uuid;

#[tokio::test]
async fn test_invalidate_deletes_cached_balance() {
    let Some(redis_url) = std::env::var("REDIS_URL").ok() else {
        println!("Skipping cache test: REDIS_URL not set");
        return;
    };

    let client = redis::Client::open(redis_url.as_str()).expect("redis client");
    let mut conn = client
        .get_multiplexed_tokio_connection()
        .await
        .expect("redis connection");

    // Simulate the account service having cached a pre-mutation balance.
    let account_id = Uuid::new_v4();
    let key = format!("account:{account_id}");
    redis::cmd("SET")
        .arg(&key)
        .arg(r#"{"balance":"100"}"#)
        .query_async::<_, ()>(&mut conn)
        .await
        .expect("seed cache");

    let cache = BalanceCache::new(&redis_url).expect("cache handle");
    cache.invalidate(account_id).await.expect("invalidate");

    // The next read must miss and go back to the store.
    let cached: Option<String> = redis::cmd("GET")
        .arg(&key)
        .query_async(&mut conn)
        .await
        .expect("read cache");
    assert_eq!(cached, None);
}

#[tokio::test]
async fn test_invalidate_missing_key_is_a_no_op() {
    let Some(redis_url) = std::env::var("REDIS_URL").ok() else {
        println!("Skipping cache test: REDIS_URL not set");
        return;
    };

    let cache = BalanceCache::new(&redis_url).expect("cache handle");
    cache
        .invalidate(Uuid::new_v4())
        .await
        .expect("invalidating an uncached account must not fail");
}
