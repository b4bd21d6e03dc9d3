// Redis-backed leases for engines running as several instances.
// A lease is a `lease:<resource>` key holding a random owner token with a TTL.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, RedisResult};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{Lease, LeaseProvider};
use crate::error::{EngineError, Result};
use crate::utils::metrics;

const RELEASE_SCRIPT: &str = r#"
    if redis.call("GET", KEYS[1]) == ARGV[1] then
        return redis.call("DEL", KEYS[1])
    else
        return 0
    end
"#;

/// Lease configuration
#[derive(Debug, Clone)]
pub struct LeaseConfig {
    /// Key expiry; bounds how long a crashed holder blocks the resource
    pub ttl: Duration,
    /// Pause between acquisition attempts
    pub retry_delay: Duration,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(30),
            retry_delay: Duration::from_millis(25),
        }
    }
}

#[derive(Clone)]
pub struct RedisLeaseProvider {
    conn: ConnectionManager,
    config: LeaseConfig,
}

impl RedisLeaseProvider {
    pub async fn new(redis_url: &str, config: LeaseConfig) -> RedisResult<Self> {
        let client = Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        info!("🔒 Redis lease provider connected (ttl: {:?})", config.ttl);
        Ok(Self { conn, config })
    }

    pub async fn with_default_config(redis_url: &str) -> RedisResult<Self> {
        Self::new(redis_url, LeaseConfig::default()).await
    }

    fn lease_key(resource: &str) -> String {
        format!("lease:{}", resource)
    }

    async fn try_set(&self, key: &str, token: &str) -> RedisResult<bool> {
        let mut conn = self.conn.clone();
        let result: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(self.config.ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await?;
        Ok(result.is_some())
    }
}

async fn release(mut conn: ConnectionManager, key: String, token: String) {
    let result: RedisResult<i32> = redis::Script::new(RELEASE_SCRIPT)
        .key(&key)
        .arg(&token)
        .invoke_async(&mut conn)
        .await;

    match result {
        Ok(1) => debug!("Lease key released: {}", key),
        Ok(_) => warn!("Lease key {} expired or owned by another holder", key),
        Err(e) => warn!("Failed to release lease key {}: {}", key, e),
    }
}

#[async_trait]
impl LeaseProvider for RedisLeaseProvider {
    async fn acquire(&self, resource: &str, wait: Duration) -> Result<Lease> {
        let key = Self::lease_key(resource);
        let token = Uuid::new_v4().to_string();
        let started = Instant::now();
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            if self.try_set(&key, &token).await? {
                debug!("Lease acquired for {} after {} attempt(s)", resource, attempts);
                let conn = self.conn.clone();
                return Ok(Lease::new(resource, move || {
                    match tokio::runtime::Handle::try_current() {
                        Ok(handle) => {
                            handle.spawn(release(conn, key, token));
                        }
                        Err(_) => warn!("No runtime to release lease key {}; waiting for TTL", key),
                    }
                }));
            }

            let elapsed = started.elapsed();
            if elapsed >= wait {
                metrics::track_lease_contention(metrics::resource_kind(resource));
                warn!("Lease on {} still held after {} attempts", resource, attempts);
                return Err(EngineError::LockContention {
                    resource: resource.to_string(),
                    waited: wait,
                });
            }
            tokio::time::sleep(self.config.retry_delay.min(wait - elapsed)).await;
        }
    }
}
