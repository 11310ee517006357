use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::errors::SyncResult;

/// Key-value plus pub/sub medium shared by all tenants.
///
/// Keys are the logical keys produced by [`crate::keys`]; an adapter may
/// namespace them further but must hand the logical form back from
/// [`CacheStore::keys_with_prefix`].
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> SyncResult<Option<Vec<u8>>>;

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> SyncResult<()>;

    /// Returns whether the key existed.
    async fn delete(&self, key: &str) -> SyncResult<bool>;

    async fn keys_with_prefix(&self, prefix: &str) -> SyncResult<Vec<String>>;

    /// Removes every key under `prefix` and returns how many were removed.
    async fn delete_prefix(&self, prefix: &str) -> SyncResult<usize>;

    /// Adds `member` to the set at `key`, refreshing the set's expiry when
    /// a ttl is given.
    async fn set_add(&self, key: &str, member: &str, ttl: Option<Duration>) -> SyncResult<()>;

    async fn set_remove(&self, key: &str, member: &str) -> SyncResult<bool>;

    async fn set_members(&self, key: &str) -> SyncResult<Vec<String>>;

    /// Replaces the whole set. An empty `members` leaves no key behind.
    async fn set_replace(&self, key: &str, members: &[String], ttl: Option<Duration>)
        -> SyncResult<()>;

    /// Returns the number of subscribers that received the message.
    async fn publish(&self, channel: &str, payload: &[u8]) -> SyncResult<usize>;

    async fn health_check(&self) -> SyncResult<bool>;
}

/// Typed helpers over [`CacheStore`]; records are stored as JSON.
#[async_trait]
pub trait CacheStoreExt: Send + Sync {
    async fn get_json<T>(&self, key: &str) -> SyncResult<Option<T>>
    where
        T: DeserializeOwned + Send + Sync;
}

#[async_trait]
impl<S: CacheStore + ?Sized> CacheStoreExt for S {
    async fn get_json<T>(&self, key: &str) -> SyncResult<Option<T>>
    where
        T: DeserializeOwned + Send + Sync,
    {
        match self.get(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}

/// A message received on a subscribed channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMessage {
    pub channel: String,
    pub payload: Vec<u8>,
}

pub type MessageStream = BoxStream<'static, ChannelMessage>;

/// Push side of the cache medium, used by consumers only.
#[async_trait]
pub trait ChangeSubscriber: Send + Sync {
    /// The stream ends when the underlying connection is lost.
    async fn subscribe(&self, channels: &[String]) -> SyncResult<MessageStream>;
}
