//! Keyed counters with a fixed expiry window.
//!
//! Backs both the login throttle and the per-request rate limiter:
//! - Redis for shared state across instances
//! - In-memory for development and single-instance deployments

use crate::models::attempt::AttemptRecord;
use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum AttemptStoreError {
    #[error("attempt store unavailable: {0}")]
    Unavailable(String),
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

#[async_trait]
pub trait AttemptStore: Send + Sync {
    /// Live record for `key`; expired records read as `None`.
    async fn get(&self, key: &str) -> Result<Option<AttemptRecord>, AttemptStoreError>;

    /// Add one to `key` as a single atomic step. The window of `ttl` starts
    /// when the record is created and is not extended by later increments.
    async fn increment(&self, key: &str, ttl: Duration) -> Result<AttemptRecord, AttemptStoreError>;

    /// Add one to every key in `keys`, unless any of them already holds
    /// `limit` or more, in which case nothing is counted. The check and the
    /// increments happen as one atomic step.
    async fn increment_all_if_below(&self, keys: &[String], limit: u32, ttl: Duration) -> Result<Admission, AttemptStoreError>;

    async fn clear(&self, key: &str) -> Result<(), AttemptStoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    /// `retry_after` is the longest remaining window among the keys at the limit.
    Refused { retry_after: Duration },
}

fn record(key: &str, count: u32, remaining: Duration) -> AttemptRecord {
    let remaining = chrono::Duration::from_std(remaining).unwrap_or(chrono::Duration::zero());
    AttemptRecord {
        key: key.to_string(),
        count,
        expires_at: Utc::now() + remaining,
    }
}

#[derive(Debug, Clone, Copy)]
struct Counter {
    count: u32,
    expires_at: Instant,
}

#[derive(Debug, Default)]
pub struct MemoryAttemptStore {
    counters: Mutex<HashMap<String, Counter>>,
}

impl MemoryAttemptStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Periodically drops expired counters. Reads already ignore them, so this
    /// only bounds memory.
    pub fn spawn_cleanup_task(self: Arc<Self>, cleanup_interval: Duration) {
        let cleanup_interval = cleanup_interval.max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cleanup_interval);
            loop {
                ticker.tick().await;
                let purged = self.purge_expired().await;
                if purged > 0 {
                    debug!(purged, "purged expired attempt counters");
                }
            }
        });
    }

    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut counters = self.counters.lock().await;
        let before = counters.len();
        counters.retain(|_, counter| counter.expires_at > now);
        before - counters.len()
    }

    #[cfg(test)]
    pub(crate) async fn len(&self) -> usize {
        self.counters.lock().await.len()
    }
}

#[async_trait]
impl AttemptStore for MemoryAttemptStore {
    async fn get(&self, key: &str) -> Result<Option<AttemptRecord>, AttemptStoreError> {
        let now = Instant::now();
        let counters = self.counters.lock().await;
        Ok(counters
            .get(key)
            .filter(|counter| counter.expires_at > now)
            .map(|counter| record(key, counter.count, counter.expires_at - now)))
    }

    async fn increment(&self, key: &str, ttl: Duration) -> Result<AttemptRecord, AttemptStoreError> {
        let now = Instant::now();
        let mut counters = self.counters.lock().await;
        let counter = counters.entry(key.to_string()).or_insert(Counter { count: 0, expires_at: now + ttl });

        if counter.expires_at <= now {
            *counter = Counter { count: 0, expires_at: now + ttl };
        }
        counter.count = counter.count.saturating_add(1);

        Ok(record(key, counter.count, counter.expires_at - now))
    }

    async fn increment_all_if_below(&self, keys: &[String], limit: u32, ttl: Duration) -> Result<Admission, AttemptStoreError> {
        let now = Instant::now();
        let mut counters = self.counters.lock().await;

        let mut retry_after: Option<Duration> = None;
        for key in keys {
            let live = counters.get(key.as_str()).filter(|counter| counter.expires_at > now);
            let count = live.map_or(0, |counter| counter.count);
            if count >= limit {
                let remaining = live.map_or(ttl, |counter| counter.expires_at - now);
                retry_after = Some(retry_after.map_or(remaining, |current| current.max(remaining)));
            }
        }
        if let Some(retry_after) = retry_after {
            return Ok(Admission::Refused { retry_after });
        }

        for key in keys {
            let counter = counters.entry(key.clone()).or_insert(Counter { count: 0, expires_at: now + ttl });
            if counter.expires_at <= now {
                *counter = Counter { count: 0, expires_at: now + ttl };
            }
            counter.count = counter.count.saturating_add(1);
        }
        Ok(Admission::Admitted)
    }

    async fn clear(&self, key: &str) -> Result<(), AttemptStoreError> {
        self.counters.lock().await.remove(key);
        Ok(())
    }
}

// INCR and the first PEXPIRE run as one script so concurrent increments can't
// lose a count or leave a key without a TTL.
const INCREMENT_SCRIPT: &str = r"
local count = redis.call('INCR', KEYS[1])
if count == 1 or redis.call('PTTL', KEYS[1]) < 0 then
  redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return {count, redis.call('PTTL', KEYS[1])}
";

// Returns -1 when every key was counted, otherwise the longest remaining
// window in milliseconds among the keys already at the limit.
const INCREMENT_BELOW_SCRIPT: &str = r"
local limit = tonumber(ARGV[1])
local ttl = tonumber(ARGV[2])
local wait = -1
for _, key in ipairs(KEYS) do
  local count = tonumber(redis.call('GET', key) or '0')
  if count >= limit then
    local pttl = redis.call('PTTL', key)
    if pttl < 0 then pttl = ttl end
    if pttl > wait then wait = pttl end
  end
end
if wait >= 0 then
  return wait
end
for _, key in ipairs(KEYS) do
  local count = redis.call('INCR', key)
  if count == 1 or redis.call('PTTL', key) < 0 then
    redis.call('PEXPIRE', key, ttl)
  end
end
return -1
";

pub struct RedisAttemptStore {
    connection: ConnectionManager,
    increment: redis::Script,
    increment_below: redis::Script,
}

impl RedisAttemptStore {
    pub async fn connect(url: &str) -> Result<Self, AttemptStoreError> {
        let client = redis::Client::open(url).inspect_err(|e| warn!(error = %e, "invalid redis url for attempt store"))?;
        let connection = ConnectionManager::new(client).await?;

        let mut conn = connection.clone();
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        debug!("connected to redis for attempt counters");

        Ok(Self {
            connection,
            increment: redis::Script::new(INCREMENT_SCRIPT),
            increment_below: redis::Script::new(INCREMENT_BELOW_SCRIPT),
        })
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

fn remaining_from_pttl(pttl: i64) -> Option<Duration> {
    u64::try_from(pttl).ok().filter(|ms| *ms > 0).map(Duration::from_millis)
}

#[async_trait]
impl AttemptStore for RedisAttemptStore {
    async fn get(&self, key: &str) -> Result<Option<AttemptRecord>, AttemptStoreError> {
        let mut conn = self.connection.clone();
        let (count, pttl): (Option<u32>, i64) = redis::pipe().cmd("GET").arg(key).cmd("PTTL").arg(key).query_async(&mut conn).await?;

        Ok(match (count, remaining_from_pttl(pttl)) {
            (Some(count), Some(remaining)) => Some(record(key, count, remaining)),
            _ => None,
        })
    }

    async fn increment(&self, key: &str, ttl: Duration) -> Result<AttemptRecord, AttemptStoreError> {
        let mut conn = self.connection.clone();
        let (count, pttl): (u32, i64) = self.increment.key(key).arg(ttl_millis(ttl)).invoke_async(&mut conn).await?;

        Ok(record(key, count, remaining_from_pttl(pttl).unwrap_or(ttl)))
    }

    async fn increment_all_if_below(&self, keys: &[String], limit: u32, ttl: Duration) -> Result<Admission, AttemptStoreError> {
        let mut conn = self.connection.clone();
        let mut invocation = self.increment_below.prepare_invoke();
        for key in keys {
            invocation.key(key.as_str());
        }
        invocation.arg(limit).arg(ttl_millis(ttl));
        let wait_ms: i64 = invocation.invoke_async(&mut conn).await?;

        Ok(match u64::try_from(wait_ms) {
            Ok(ms) => Admission::Refused {
                retry_after: Duration::from_millis(ms),
            },
            Err(_) => Admission::Admitted,
        })
    }

    async fn clear(&self, key: &str) -> Result<(), AttemptStoreError> {
        let mut conn = self.connection.clone();
        redis::cmd("DEL").arg(key).query_async::<()>(&mut conn).await?;
        Ok(())
    }
}
