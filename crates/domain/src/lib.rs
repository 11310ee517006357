//! # Confsync Domain
//!
//! The synchronization layer between the authoritative configuration store
//! and the shared cache medium. Everything here is written against the seams
//! in `confsync-core`; no concrete cache or database is named.
//!
//! - [`denormalizer`] / [`record_builder`]: authoritative rows to cache records
//! - [`synchronizer`]: post-commit write-through with per-resource ordering
//! - [`publisher`]: change-event fan-out
//! - [`rebuilder`]: full and per-tenant rebuild from the authoritative store
//! - [`service`]: the write path request handlers call
//! - [`consumer`]: push and poll strategies for downstream readers

pub mod consumer;
pub mod denormalizer;
pub mod publisher;
pub mod rebuilder;
pub mod record_builder;
pub mod records;
pub mod service;
pub mod synchronizer;

mod timeouts;

pub use consumer::{
    subscription_channels, ChangeHandler, ConfigMirror, ConfigReader, PollingRefresher,
    PushSubscriber, ScopeSnapshot,
};
pub use denormalizer::Denormalizer;
pub use publisher::{EventPublisher, PublishReport};
pub use rebuilder::{CacheRebuilder, RebuildReport};
pub use record_builder::{BuiltRecord, RecordBuilder};
pub use records::CacheRecord;
pub use service::{ConfigWriteService, WriteReceipt};
pub use synchronizer::{SyncOutcome, SyncState, Synchronizer};
