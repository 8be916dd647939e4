use crate::utils::error::ApiError;
use async_trait::async_trait;
use deadpool_redis::{Config, Pool, Runtime};
use redis::AsyncCommands;
use tracing::warn;

/// Fixed-window counter, ported from
/// `original_source/server/app/core/rate_limit.py`.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    async fn check(&self, key: &str, limit: u32, window_seconds: u64) -> Result<(), ApiError>;
}

pub struct RedisRateLimiter {
    pool: Pool,
}

impl RedisRateLimiter {
    pub fn new(redis_url: &str) -> anyhow::Result<Self> {
        let cfg = Config::from_url(redis_url);
        let pool = cfg.create_pool(Some(Runtime::Tokio1))?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl RateLimiter for RedisRateLimiter {
    async fn check(&self, key: &str, limit: u32, window_seconds: u64) -> Result<(), ApiError> {
        let mut conn = self.pool.get().await.map_err(|e| {
            warn!(error = %e, "rate limiter backend unavailable");
            ApiError::UpstreamUnavailable(format!("rate limiter unavailable: {e}"))
        })?;

        let count: i64 = conn.incr(key, 1).await.map_err(|e| {
            warn!(error = %e, "rate limiter backend unavailable");
            ApiError::UpstreamUnavailable(format!("rate limiter unavailable: {e}"))
        })?;

        if count == 1 {
            let _: Result<(), _> = conn.expire(key, window_seconds as i64).await;
        }

        if count > limit as i64 {
            return Err(ApiError::RateLimited);
        }

        Ok(())
    }
}
