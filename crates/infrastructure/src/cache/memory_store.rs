//! Process-local cache medium with the same contract as the Redis store.

use super::CacheStats;
use async_trait::async_trait;
use confsync_core::{CacheStore, ChangeSubscriber, ChannelMessage, MessageStream, SyncResult};
use futures::StreamExt;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone)]
enum Value {
    Bytes(Vec<u8>),
    Set(BTreeSet<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

struct Subscription {
    channels: Vec<String>,
    sender: mpsc::UnboundedSender<ChannelMessage>,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    subscriptions: Vec<Subscription>,
}

impl Inner {
    fn live(&mut self, key: &str) -> Option<&mut Entry> {
        let now = Instant::now();
        if self.entries.get(key).is_some_and(|e| !e.is_live(now)) {
            self.entries.remove(key);
        }
        self.entries.get_mut(key)
    }

    /// Drops every expired entry, touched or not.
    fn sweep_expired(&mut self, now: Instant) {
        let before = self.entries.len();
        self.entries.retain(|_, e| e.is_live(now));
        let expired = before - self.entries.len();
        if expired > 0 {
            debug!("Cache evicted {} expired entries", expired);
        }
    }
}

/// In-memory cache store. Expiry follows `tokio::time`, so tests can pause
/// and advance the clock.
#[derive(Clone, Default)]
pub struct InMemoryCacheStore {
    inner: Arc<RwLock<Inner>>,
    stats: Arc<RwLock<CacheStats>>,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn stats(&self) -> CacheStats {
        self.stats.read().await.clone()
    }

    /// Number of live keys, records and sets alike.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let inner = self.inner.read().await;
        inner.entries.values().filter(|e| e.is_live(now)).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Remaining time to live of `key`, if it exists and expires.
    pub async fn ttl(&self, key: &str) -> Option<Duration> {
        let mut inner = self.inner.write().await;
        let now = Instant::now();
        inner
            .live(key)
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(now))
    }

    /// Ends every open subscription stream, as a dropped connection would.
    pub async fn disconnect_subscribers(&self) {
        let mut inner = self.inner.write().await;
        inner.subscriptions.clear();
    }

    async fn record(&self, update: impl FnOnce(&mut CacheStats)) {
        let mut stats = self.stats.write().await;
        update(&mut stats);
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn get(&self, key: &str) -> SyncResult<Option<Vec<u8>>> {
        let value = {
            let mut inner = self.inner.write().await;
            match inner.live(key) {
                Some(Entry {
                    value: Value::Bytes(bytes),
                    ..
                }) => Some(bytes.clone()),
                _ => None,
            }
        };

        if value.is_some() {
            debug!("Cache HIT: {}", key);
            self.record(|s| s.hits += 1).await;
        } else {
            debug!("Cache MISS: {}", key);
            self.record(|s| s.misses += 1).await;
        }
        Ok(value)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> SyncResult<()> {
        {
            let now = Instant::now();
            let mut inner = self.inner.write().await;
            inner.sweep_expired(now);
            inner.entries.insert(
                key.to_string(),
                Entry {
                    value: Value::Bytes(value.to_vec()),
                    expires_at: Some(now + ttl),
                },
            );
        }
        self.record(|s| s.sets += 1).await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> SyncResult<bool> {
        let existed = {
            let mut inner = self.inner.write().await;
            let live = inner.live(key).is_some();
            inner.entries.remove(key);
            live
        };
        if existed {
            self.record(|s| s.deletes += 1).await;
        }
        Ok(existed)
    }

    async fn keys_with_prefix(&self, prefix: &str) -> SyncResult<Vec<String>> {
        let mut inner = self.inner.write().await;
        inner.sweep_expired(Instant::now());
        let mut keys: Vec<String> = inner
            .entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn delete_prefix(&self, prefix: &str) -> SyncResult<usize> {
        let now = Instant::now();
        let removed = {
            let mut inner = self.inner.write().await;
            let before = inner.entries.len();
            let mut live_removed = 0usize;
            inner.entries.retain(|k, e| {
                if k.starts_with(prefix) {
                    if e.is_live(now) {
                        live_removed += 1;
                    }
                    false
                } else {
                    true
                }
            });
            debug!(
                "Cache DELETE_PREFIX {}: {} of {} entries removed",
                prefix,
                live_removed,
                before
            );
            live_removed
        };
        self.record(|s| s.deletes += removed as u64).await;
        Ok(removed)
    }

    async fn set_add(&self, key: &str, member: &str, ttl: Option<Duration>) -> SyncResult<()> {
        let mut inner = self.inner.write().await;
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        match inner.live(key) {
            Some(entry) => {
                if let Value::Set(members) = &mut entry.value {
                    members.insert(member.to_string());
                } else {
                    // Redis would answer WRONGTYPE; replacing keeps the index usable
                    entry.value = Value::Set(BTreeSet::from([member.to_string()]));
                }
                if expires_at.is_some() {
                    entry.expires_at = expires_at;
                }
            }
            None => {
                inner.entries.insert(
                    key.to_string(),
                    Entry {
                        value: Value::Set(BTreeSet::from([member.to_string()])),
                        expires_at,
                    },
                );
            }
        }
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> SyncResult<bool> {
        let mut inner = self.inner.write().await;
        let (removed, now_empty) = match inner.live(key) {
            Some(Entry {
                value: Value::Set(members),
                ..
            }) => (members.remove(member), members.is_empty()),
            _ => (false, false),
        };
        // an empty set does not exist
        if now_empty {
            inner.entries.remove(key);
        }
        Ok(removed)
    }

    async fn set_members(&self, key: &str) -> SyncResult<Vec<String>> {
        let mut inner = self.inner.write().await;
        Ok(match inner.live(key) {
            Some(Entry {
                value: Value::Set(members),
                ..
            }) => members.iter().cloned().collect(),
            _ => Vec::new(),
        })
    }

    async fn set_replace(
        &self,
        key: &str,
        members: &[String],
        ttl: Option<Duration>,
    ) -> SyncResult<()> {
        let mut inner = self.inner.write().await;
        if members.is_empty() {
            inner.entries.remove(key);
        } else {
            inner.entries.insert(
                key.to_string(),
                Entry {
                    value: Value::Set(members.iter().cloned().collect()),
                    expires_at: ttl.map(|ttl| Instant::now() + ttl),
                },
            );
        }
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: &[u8]) -> SyncResult<usize> {
        let receivers = {
            let mut inner = self.inner.write().await;
            inner.subscriptions.retain(|s| !s.sender.is_closed());
            let mut receivers = 0usize;
            for sub in inner.subscriptions.iter().filter(|s| s.channels.iter().any(|c| c == channel)) {
                let message = ChannelMessage {
                    channel: channel.to_string(),
                    payload: payload.to_vec(),
                };
                if sub.sender.send(message).is_ok() {
                    receivers += 1;
                }
            }
            receivers
        };
        debug!("Published to {} ({} receivers)", channel, receivers);
        self.record(|s| s.publishes += 1).await;
        Ok(receivers)
    }

    async fn health_check(&self) -> SyncResult<bool> {
        Ok(true)
    }
}

#[async_trait]
impl ChangeSubscriber for InMemoryCacheStore {
    async fn subscribe(&self, channels: &[String]) -> SyncResult<MessageStream> {
        let (sender, receiver) = mpsc::unbounded_channel();
        {
            let mut inner = self.inner.write().await;
            inner.subscriptions.push(Subscription {
                channels: channels.to_vec(),
                sender,
            });
        }

        let stream = futures::stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|message| (message, receiver))
        });
        Ok(stream.boxed())
    }
}
