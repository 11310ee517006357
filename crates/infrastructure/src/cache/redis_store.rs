//! Redis cache store implementation

use super::CacheStats;
use async_trait::async_trait;
use confsync_core::config::CacheConfig;
use confsync_core::{CacheStore, ChangeSubscriber, ChannelMessage, MessageStream, SyncError, SyncResult};
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::FromRedisValue;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument};

/// Redis-backed cache medium: records, index sets and pub/sub channels.
pub struct RedisCacheStore {
    client: Arc<redis::Client>,
    /// Multiplexed connection, cheap to clone and reconnects on its own
    conn: ConnectionManager,
    stats: Arc<RwLock<CacheStats>>,
    /// Namespace for this deployment, applied to keys and channels
    key_prefix: String,
}

impl RedisCacheStore {
    pub async fn new(config: &CacheConfig) -> SyncResult<Self> {
        info!("Creating Redis cache store with URL: {}", config.redis_url);

        let client = redis::Client::open(config.redis_url.clone())
            .map_err(|e| SyncError::config_error(e.to_string()))?;

        let timeout = Duration::from_secs(config.connection_timeout_seconds);
        let mut conn = tokio::time::timeout(timeout, client.get_connection_manager())
            .await
            .map_err(|_| SyncError::Timeout(format!("connecting to {}", config.redis_url)))?
            .map_err(|e| SyncError::cache_read(e.to_string()))?;

        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| SyncError::cache_read(e.to_string()))?;

        info!("Redis cache store created successfully");

        Ok(Self {
            client: Arc::new(client),
            conn,
            stats: Arc::new(RwLock::new(CacheStats::default())),
            key_prefix: config.key_prefix.clone().unwrap_or_default(),
        })
    }

    pub async fn stats(&self) -> CacheStats {
        self.stats.read().await.clone()
    }

    /// Build full cache key with prefix
    fn build_key(&self, key: &str) -> String {
        with_prefix(&self.key_prefix, key)
    }

    async fn record(&self, update: impl FnOnce(&mut CacheStats)) {
        let mut stats = self.stats.write().await;
        update(&mut stats);
    }

    /// Runs one command or pipeline on a clone of the shared connection,
    /// counting and logging failures.
    async fn run<T: FromRedisValue>(
        &self,
        op: &str,
        target: &str,
        fut: impl std::future::Future<Output = redis::RedisResult<T>>,
        to_err: fn(String) -> SyncError,
    ) -> SyncResult<T> {
        match fut.await {
            Ok(value) => Ok(value),
            Err(e) => {
                error!("Cache {} failed for {}: {}", op, target, e);
                self.record(|s| s.errors += 1).await;
                Err(to_err(e.to_string()))
            }
        }
    }

    async fn scan_full_keys(&self, full_prefix: &str) -> SyncResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let mut keys: Vec<String> = Vec::new();
        let mut cursor: u64 = 0;

        loop {
            let (next_cursor, batch_keys): (u64, Vec<String>) = self
                .run(
                    "SCAN",
                    full_prefix,
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(format!("{}*", full_prefix))
                        .arg("COUNT")
                        .arg(1000)
                        .query_async(&mut conn),
                    SyncError::CacheRead,
                )
                .await?;

            keys.extend(batch_keys);
            if next_cursor == 0 {
                break;
            }
            cursor = next_cursor;
        }

        Ok(keys)
    }
}

fn with_prefix(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}:{}", prefix, key)
    }
}

fn without_prefix<'a>(prefix: &str, full_key: &'a str) -> &'a str {
    if prefix.is_empty() {
        return full_key;
    }
    full_key
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix(':'))
        .unwrap_or(full_key)
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    #[instrument(skip(self))]
    async fn get(&self, key: &str) -> SyncResult<Option<Vec<u8>>> {
        let full_key = self.build_key(key);
        let mut conn = self.conn.clone();

        let result: Option<Vec<u8>> = self
            .run(
                "GET",
                &full_key,
                redis::cmd("GET").arg(&full_key).query_async(&mut conn),
                SyncError::CacheRead,
            )
            .await?;

        match result {
            Some(value) => {
                debug!("Cache HIT: {}", full_key);
                self.record(|s| s.hits += 1).await;
                Ok(Some(value))
            }
            None => {
                debug!("Cache MISS: {}", full_key);
                self.record(|s| s.misses += 1).await;
                Ok(None)
            }
        }
    }

    #[instrument(skip(self, value))]
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> SyncResult<()> {
        let full_key = self.build_key(key);
        debug!("Cache SET: {} with TTL: {:?}", full_key, ttl);
        let mut conn = self.conn.clone();

        let _: () = self
            .run(
                "SET",
                &full_key,
                redis::cmd("SETEX")
                    .arg(&full_key)
                    .arg(ttl.as_secs().max(1))
                    .arg(value)
                    .query_async(&mut conn),
                SyncError::CacheWrite,
            )
            .await?;

        self.record(|s| s.sets += 1).await;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, key: &str) -> SyncResult<bool> {
        let full_key = self.build_key(key);
        let mut conn = self.conn.clone();

        let removed: i64 = self
            .run(
                "DELETE",
                &full_key,
                redis::cmd("DEL").arg(&full_key).query_async(&mut conn),
                SyncError::CacheWrite,
            )
            .await?;

        if removed > 0 {
            debug!("Cache DELETE success: {}", full_key);
            self.record(|s| s.deletes += 1).await;
        } else {
            debug!("Cache DELETE key not found: {}", full_key);
        }
        Ok(removed > 0)
    }

    #[instrument(skip(self))]
    async fn keys_with_prefix(&self, prefix: &str) -> SyncResult<Vec<String>> {
        let full_prefix = self.build_key(prefix);
        let keys = self.scan_full_keys(&full_prefix).await?;
        Ok(keys
            .iter()
            .map(|k| without_prefix(&self.key_prefix, k).to_string())
            .collect())
    }

    #[instrument(skip(self))]
    async fn delete_prefix(&self, prefix: &str) -> SyncResult<usize> {
        let full_prefix = self.build_key(prefix);
        let keys = self.scan_full_keys(&full_prefix).await?;

        if keys.is_empty() {
            debug!("No keys found with prefix: {}", full_prefix);
            return Ok(0);
        }

        let mut conn = self.conn.clone();
        let mut deleted_count = 0usize;
        for chunk in keys.chunks(100) {
            let removed: usize = self
                .run(
                    "DELETE_PREFIX",
                    &full_prefix,
                    redis::cmd("DEL").arg(chunk).query_async(&mut conn),
                    SyncError::CacheWrite,
                )
                .await?;
            deleted_count += removed;
        }

        debug!("Cache DELETE_PREFIX success: {} keys deleted", deleted_count);
        self.record(|s| s.deletes += deleted_count as u64).await;
        Ok(deleted_count)
    }

    #[instrument(skip(self))]
    async fn set_add(&self, key: &str, member: &str, ttl: Option<Duration>) -> SyncResult<()> {
        let full_key = self.build_key(key);
        let mut conn = self.conn.clone();

        let mut pipe = redis::pipe();
        pipe.atomic().cmd("SADD").arg(&full_key).arg(member).ignore();
        if let Some(ttl) = ttl {
            pipe.cmd("EXPIRE").arg(&full_key).arg(ttl.as_secs().max(1)).ignore();
        }

        let _: () = self
            .run("SADD", &full_key, pipe.query_async(&mut conn), SyncError::CacheWrite)
            .await?;
        self.record(|s| s.sets += 1).await;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn set_remove(&self, key: &str, member: &str) -> SyncResult<bool> {
        let full_key = self.build_key(key);
        let mut conn = self.conn.clone();

        let removed: i64 = self
            .run(
                "SREM",
                &full_key,
                redis::cmd("SREM").arg(&full_key).arg(member).query_async(&mut conn),
                SyncError::CacheWrite,
            )
            .await?;
        Ok(removed > 0)
    }

    #[instrument(skip(self))]
    async fn set_members(&self, key: &str) -> SyncResult<Vec<String>> {
        let full_key = self.build_key(key);
        let mut conn = self.conn.clone();

        let mut members: Vec<String> = self
            .run(
                "SMEMBERS",
                &full_key,
                redis::cmd("SMEMBERS").arg(&full_key).query_async(&mut conn),
                SyncError::CacheRead,
            )
            .await?;
        members.sort();
        Ok(members)
    }

    #[instrument(skip(self, members), fields(count = members.len()))]
    async fn set_replace(
        &self,
        key: &str,
        members: &[String],
        ttl: Option<Duration>,
    ) -> SyncResult<()> {
        let full_key = self.build_key(key);
        let mut conn = self.conn.clone();

        let mut pipe = redis::pipe();
        pipe.atomic().cmd("DEL").arg(&full_key).ignore();
        if !members.is_empty() {
            pipe.cmd("SADD").arg(&full_key).arg(members).ignore();
            if let Some(ttl) = ttl {
                pipe.cmd("EXPIRE").arg(&full_key).arg(ttl.as_secs().max(1)).ignore();
            }
        }

        let _: () = self
            .run("SET_REPLACE", &full_key, pipe.query_async(&mut conn), SyncError::CacheWrite)
            .await?;
        self.record(|s| s.sets += 1).await;
        Ok(())
    }

    #[instrument(skip(self, payload))]
    async fn publish(&self, channel: &str, payload: &[u8]) -> SyncResult<usize> {
        let full_channel = self.build_key(channel);
        let mut conn = self.conn.clone();

        let receivers: usize = self
            .run(
                "PUBLISH",
                &full_channel,
                redis::cmd("PUBLISH")
                    .arg(&full_channel)
                    .arg(payload)
                    .query_async(&mut conn),
                SyncError::Publish,
            )
            .await?;

        debug!("Published to {} ({} receivers)", full_channel, receivers);
        self.record(|s| s.publishes += 1).await;
        Ok(receivers)
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> SyncResult<bool> {
        let mut conn = self.conn.clone();
        let result: String = self
            .run(
                "PING",
                "health",
                redis::cmd("PING").query_async(&mut conn),
                SyncError::CacheRead,
            )
            .await?;
        Ok(result == "PONG")
    }
}

#[async_trait]
impl ChangeSubscriber for RedisCacheStore {
    /// Opens a dedicated pub/sub connection; the stream ends when it drops.
    async fn subscribe(&self, channels: &[String]) -> SyncResult<MessageStream> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| SyncError::cache_read(e.to_string()))?;

        let full_channels: Vec<String> = channels.iter().map(|c| self.build_key(c)).collect();
        pubsub
            .subscribe(&full_channels)
            .await
            .map_err(|e| SyncError::cache_read(e.to_string()))?;
        info!("Subscribed to {} channels", full_channels.len());

        let prefix = self.key_prefix.clone();
        let stream = pubsub.into_on_message().map(move |msg| ChannelMessage {
            channel: without_prefix(&prefix, msg.get_channel_name()).to_string(),
            payload: msg.get_payload_bytes().to_vec(),
        });

        Ok(stream.boxed())
    }
}
