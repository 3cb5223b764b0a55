use redis::RedisResult;
use tracing::{debug, info};

#[derive(Clone)]
pub struct RedisClient {
    client: redis::Client,
}

impl RedisClient {
    pub async fn new(connection_string: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(connection_string)?;
        Ok(Self { client })
    }

    /// Fixed-window counter. Returns `true` while the caller is within `limit` for the window.
    pub async fn check_rate_limit(&self, key: &str, limit: i64, window_seconds: i64) -> RedisResult<bool> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let (count,): (i64,) = redis::pipe()
            .atomic()
            .incr(key, 1)
            .expire(key, window_seconds)
            .ignore()
            .query_async(&mut conn)
            .await?;

        Ok(count <= limit)
    }

    /// Takes `key` for `ttl_seconds` if nobody holds it. Workers on several instances use this so
    /// one of them runs each sweep tick.
    pub async fn try_acquire_lease(&self, key: &str, holder: &str, ttl_seconds: u64) -> RedisResult<bool> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        // SET NX: Only set if key does not exist
        let result: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(holder)
            .arg("NX")
            .arg("EX")
            .arg(ttl_seconds)
            .query_async(&mut conn)
            .await?;

        let acquired = result.is_some();
        if acquired {
            info!("Lease {} acquired by {}", key, holder);
        } else {
            debug!("Lease {} is held elsewhere", key);
        }
        Ok(acquired)
    }

    /// Drops the lease only if `holder` still owns it.
    pub async fn release_lease(&self, key: &str, holder: &str) -> RedisResult<bool> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let script = redis::Script::new(
            r#"
            if redis.call("GET", KEYS[1]) == ARGV[1] then
                return redis.call("DEL", KEYS[1])
            else
                return 0
            end
        "#,
        );

        let deleted: i64 = script.key(key).arg(holder).invoke_async(&mut conn).await?;
        Ok(deleted == 1)
    }
}
