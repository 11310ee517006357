pub mod cache;
pub mod repository;

pub use cache::{CacheStore, CacheStoreExt, ChangeSubscriber, ChannelMessage, MessageStream};
pub use repository::ConfigRepository;
