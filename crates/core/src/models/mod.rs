mod committed;
mod filter_script;
mod monitor;
mod network;
mod resource;
mod tenant;
mod trigger;

pub use committed::Committed;
pub use filter_script::FilterScript;
pub use monitor::Monitor;
pub use network::Network;
pub use resource::{ResourceId, ResourceKind};
pub use tenant::{Tenant, TenantId, TenantScope, TenantStatus};
pub use trigger::{EmailTriggerConfig, Trigger, TriggerType, WebhookTriggerConfig};
