//! Test data builders for creating test entities
//!
//! Every builder starts from a valid, active entity so a test only states
//! the fields it cares about.

use chrono::{DateTime, TimeZone, Utc};
use confsync_core::{
    EmailTriggerConfig, FilterScript, Monitor, Network, Tenant, TenantId, TenantStatus, Trigger,
    TriggerType, WebhookTriggerConfig,
};
use serde_json::json;
use uuid::Uuid;

/// Fixed instant used for fixture timestamps so records compare equal
/// across builds.
pub fn fixture_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or_default()
}

pub fn tenant_id(raw: &str) -> TenantId {
    TenantId::parse(raw).expect("fixture tenant id must be valid")
}

pub struct TenantBuilder {
    tenant: Tenant,
}

impl TenantBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            tenant: Tenant {
                id: tenant_id(id),
                name: format!("Tenant {id}"),
                slug: id.to_string(),
                plan: "pro".to_string(),
                status: TenantStatus::Active,
                settings: json!({}),
                created_at: fixture_time(),
                updated_at: fixture_time(),
            },
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.tenant.name = name.to_string();
        self
    }

    pub fn with_status(mut self, status: TenantStatus) -> Self {
        self.tenant.status = status;
        self
    }

    pub fn build(self) -> Tenant {
        self.tenant
    }
}

pub struct NetworkBuilder {
    network: Network,
}

impl NetworkBuilder {
    pub fn new(slug: &str) -> Self {
        Self {
            network: Network {
                id: Uuid::new_v4(),
                name: slug.to_string(),
                slug: slug.to_string(),
                network_type: "EVM".to_string(),
                chain_id: Some(1),
                network_passphrase: None,
                rpc_urls: json!([{"type_": "rpc", "url": {"type": "plain", "value": "https://rpc.example.com"}, "weight": 100}]),
                block_time_ms: 12_000,
                confirmation_blocks: 12,
                cron_schedule: "0 */1 * * * *".to_string(),
                max_past_blocks: Some(18),
                store_blocks: false,
                description: None,
                active: true,
                validated: true,
                validation_errors: None,
                created_at: fixture_time(),
                updated_at: fixture_time(),
                last_validated_at: None,
            },
        }
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.network.id = id;
        self
    }

    pub fn with_slug(mut self, slug: &str) -> Self {
        self.network.slug = slug.to_string();
        self
    }

    pub fn active(mut self, active: bool) -> Self {
        self.network.active = active;
        self
    }

    pub fn build(self) -> Network {
        self.network
    }
}

pub struct FilterScriptBuilder {
    script: FilterScript,
}

impl FilterScriptBuilder {
    pub fn new(slug: &str) -> Self {
        Self {
            script: FilterScript {
                id: Uuid::new_v4(),
                name: slug.to_string(),
                slug: slug.to_string(),
                language: "python".to_string(),
                script_path: format!("filters/{slug}.py"),
                description: None,
                arguments: json!(["--verbose"]),
                timeout_ms: 1000,
                file_size_bytes: Some(512),
                file_hash: Some("9f86d081884c7d65".to_string()),
                active: true,
                validated: true,
                validation_errors: None,
                created_at: fixture_time(),
                updated_at: fixture_time(),
                last_validated_at: None,
            },
        }
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.script.id = id;
        self
    }

    pub fn build(self) -> FilterScript {
        self.script
    }
}

pub struct MonitorBuilder {
    monitor: Monitor,
}

impl MonitorBuilder {
    pub fn new(tenant: TenantId) -> Self {
        Self {
            monitor: Monitor {
                id: Uuid::new_v4(),
                tenant_id: tenant,
                name: "Large USDC transfers".to_string(),
                slug: "large-usdc-transfers".to_string(),
                description: None,
                active: true,
                paused: false,
                validated: true,
                validation_errors: None,
                networks: vec!["ethereum-mainnet".to_string()],
                addresses: json!([{"address": "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48"}]),
                match_functions: json!([]),
                match_events: json!([{"signature": "Transfer(address,address,uint256)", "expression": "value > 1000000"}]),
                match_transactions: json!([]),
                trigger_conditions: json!([]),
                trigger_slugs: Vec::new(),
                created_at: fixture_time(),
                updated_at: fixture_time(),
                last_validated_at: None,
            },
        }
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.monitor.id = id;
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.monitor.name = name.to_string();
        self
    }

    pub fn with_trigger_slugs(mut self, slugs: &[&str]) -> Self {
        self.monitor.trigger_slugs = slugs.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn paused(mut self, paused: bool) -> Self {
        self.monitor.paused = paused;
        self
    }

    pub fn active(mut self, active: bool) -> Self {
        self.monitor.active = active;
        self
    }

    pub fn build(self) -> Monitor {
        self.monitor
    }
}

pub struct TriggerBuilder {
    trigger: Trigger,
}

impl TriggerBuilder {
    fn base(tenant: TenantId, slug: &str, trigger_type: TriggerType) -> Trigger {
        Trigger {
            id: Uuid::new_v4(),
            tenant_id: tenant,
            name: slug.to_string(),
            slug: slug.to_string(),
            description: None,
            trigger_type,
            active: true,
            validated: true,
            validation_errors: None,
            email_config: None,
            webhook_config: None,
            created_at: fixture_time(),
            updated_at: fixture_time(),
            last_validated_at: None,
        }
    }

    pub fn email(tenant: TenantId, slug: &str) -> Self {
        let mut trigger = Self::base(tenant, slug, TriggerType::Email);
        trigger.email_config = Some(EmailTriggerConfig {
            host: "smtp.example.com".to_string(),
            port: 587,
            username_type: "plain".to_string(),
            username_value: "alerts".to_string(),
            password_type: "environment".to_string(),
            password_value: "SMTP_PASSWORD".to_string(),
            sender: "alerts@example.com".to_string(),
            recipients: vec!["ops@example.com".to_string()],
            message_title: "Monitor alert".to_string(),
            message_body: "${monitor.name} matched ${transaction.hash}".to_string(),
        });
        Self { trigger }
    }

    pub fn webhook(tenant: TenantId, slug: &str) -> Self {
        let mut trigger = Self::base(tenant, slug, TriggerType::Webhook);
        trigger.webhook_config = Some(WebhookTriggerConfig {
            url_type: "plain".to_string(),
            url_value: "https://hooks.example.com/alerts".to_string(),
            method: "POST".to_string(),
            headers: json!({"Content-Type": "application/json"}),
            secret_type: None,
            secret_value: None,
            message_title: "Monitor alert".to_string(),
            message_body: "${monitor.name} matched".to_string(),
        });
        Self { trigger }
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.trigger.id = id;
        self
    }

    pub fn with_slug(mut self, slug: &str) -> Self {
        self.trigger.slug = slug.to_string();
        self
    }

    pub fn active(mut self, active: bool) -> Self {
        self.trigger.active = active;
        self
    }

    pub fn build(self) -> Trigger {
        self.trigger
    }
}
