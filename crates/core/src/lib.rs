//! Shared vocabulary of the configuration cache-synchronization layer:
//! resource models, the key scheme, change events, errors, configuration
//! and the seams to the authoritative store and the cache medium.

pub mod config;
pub mod errors;
pub mod events;
pub mod keys;
pub mod models;
pub mod traits;

pub use config::AppConfig;
pub use errors::{SyncError, SyncResult};
pub use events::{ChangeEvent, ChangeEventType};
pub use models::{
    Committed, EmailTriggerConfig, FilterScript, Monitor, Network, ResourceId, ResourceKind,
    Tenant, TenantId, TenantScope, TenantStatus, Trigger, TriggerType, WebhookTriggerConfig,
};
pub use traits::{
    CacheStore, CacheStoreExt, ChangeSubscriber, ChannelMessage, ConfigRepository, MessageStream,
};
