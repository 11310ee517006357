//! Pure conversion of authoritative rows into cache records.
//!
//! Nothing here performs I/O: every related entity a record embeds is passed
//! in by the caller, so the same inputs always give the same record.

use confsync_core::{
    keys, FilterScript, Monitor, Network, ResourceKind, SyncError, SyncResult, Tenant,
    TenantScope, TenantStatus, Trigger, TriggerType,
};
use std::collections::HashSet;

use crate::records::{
    FilterScriptRecord, MatchConditions, MonitorRecord, NetworkRecord, TenantRecord,
    TriggerConfigRecord, TriggerRecord,
};

/// Slugs in first-seen order without duplicates.
pub(crate) fn unique_slugs(slugs: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    slugs
        .iter()
        .filter(|slug| seen.insert(slug.as_str()))
        .cloned()
        .collect()
}

pub struct Denormalizer;

impl Denormalizer {
    pub fn tenant(tenant: &Tenant) -> TenantRecord {
        TenantRecord {
            id: tenant.id.clone(),
            name: tenant.name.clone(),
            slug: tenant.slug.clone(),
            plan: tenant.plan.clone(),
            status: tenant.status,
            enabled: tenant.status == TenantStatus::Active,
            settings: tenant.settings.clone(),
            created_at: tenant.created_at,
            updated_at: tenant.updated_at,
        }
    }

    pub fn network(network: &Network) -> NetworkRecord {
        NetworkRecord {
            id: network.id,
            name: network.name.clone(),
            slug: network.slug.clone(),
            network_type: network.network_type.clone(),
            chain_id: network.chain_id,
            network_passphrase: network.network_passphrase.clone(),
            rpc_urls: network.rpc_urls.clone(),
            block_time_ms: network.block_time_ms,
            confirmation_blocks: network.confirmation_blocks,
            cron_schedule: network.cron_schedule.clone(),
            max_past_blocks: network.max_past_blocks,
            store_blocks: network.store_blocks,
            description: network.description.clone(),
            active: network.active,
            validated: network.validated,
            validation_errors: network.validation_errors.clone(),
            created_at: network.created_at,
            updated_at: network.updated_at,
            last_validated_at: network.last_validated_at,
        }
    }

    pub fn filter_script(script: &FilterScript) -> FilterScriptRecord {
        FilterScriptRecord {
            id: script.id,
            name: script.name.clone(),
            slug: script.slug.clone(),
            language: script.language.clone(),
            script_path: script.script_path.clone(),
            arguments: script.arguments.clone(),
            timeout_ms: script.timeout_ms,
            file_size_bytes: script.file_size_bytes,
            file_hash: script.file_hash.clone(),
            description: script.description.clone(),
            active: script.active,
            validated: script.validated,
            validation_errors: script.validation_errors.clone(),
            created_at: script.created_at,
            updated_at: script.updated_at,
            last_validated_at: script.last_validated_at,
        }
    }

    /// Fails when the declared trigger type has no matching configuration.
    pub fn trigger(trigger: &Trigger) -> SyncResult<TriggerRecord> {
        let config = match (trigger.trigger_type, &trigger.email_config, &trigger.webhook_config) {
            (TriggerType::Email, Some(email), _) => TriggerConfigRecord::Email {
                host: email.host.clone(),
                port: email.port,
                username_type: email.username_type.clone(),
                username_value: email.username_value.clone(),
                password_type: email.password_type.clone(),
                password_value: email.password_value.clone(),
                sender: email.sender.clone(),
                recipients: email.recipients.clone(),
                message_title: email.message_title.clone(),
                message_body: email.message_body.clone(),
            },
            (TriggerType::Webhook, _, Some(webhook)) => TriggerConfigRecord::Webhook {
                url_type: webhook.url_type.clone(),
                url_value: webhook.url_value.clone(),
                method: webhook.method.clone(),
                headers: webhook.headers.clone(),
                secret_type: webhook.secret_type.clone(),
                secret_value: webhook.secret_value.clone(),
                message_title: webhook.message_title.clone(),
                message_body: webhook.message_body.clone(),
            },
            (trigger_type, _, _) => {
                return Err(SyncError::denormalization(
                    ResourceKind::Trigger,
                    trigger.id,
                    format!("{0} trigger has no {0} configuration", trigger_type.as_str()),
                ))
            }
        };

        Ok(TriggerRecord {
            id: trigger.id,
            tenant_id: trigger.tenant_id.clone(),
            name: trigger.name.clone(),
            slug: trigger.slug.clone(),
            description: trigger.description.clone(),
            trigger_type: trigger.trigger_type,
            active: trigger.active,
            validated: trigger.validated,
            validation_errors: trigger.validation_errors.clone(),
            config,
            created_at: trigger.created_at,
            updated_at: trigger.updated_at,
            last_validated_at: trigger.last_validated_at,
        })
    }

    /// Inlines `triggers` in the monitor's `trigger_slugs` order.
    ///
    /// `triggers` may arrive in any order and may contain triggers the
    /// monitor does not reference; those are ignored. A referenced slug with
    /// no trigger is listed in `missing_triggers`.
    pub fn monitor(monitor: &Monitor, triggers: &[Trigger]) -> SyncResult<MonitorRecord> {
        let trigger_slugs = unique_slugs(&monitor.trigger_slugs);

        let mut embedded = Vec::with_capacity(trigger_slugs.len());
        let mut missing_triggers = Vec::new();

        for slug in &trigger_slugs {
            let Some(trigger) = triggers.iter().find(|t| &t.slug == slug) else {
                missing_triggers.push(slug.clone());
                continue;
            };

            if trigger.tenant_id != monitor.tenant_id {
                return Err(SyncError::CrossTenantKeyViolation {
                    tenant: monitor.tenant_id.to_string(),
                    key: keys::record_key(
                        &TenantScope::Tenant(trigger.tenant_id.clone()),
                        ResourceKind::Trigger,
                        &trigger.resource_id(),
                    ),
                });
            }

            let record = Self::trigger(trigger).map_err(|e| {
                SyncError::denormalization(
                    ResourceKind::Monitor,
                    monitor.id,
                    format!("trigger '{}': {}", slug, e),
                )
            })?;
            embedded.push(record);
        }

        Ok(MonitorRecord {
            id: monitor.id,
            tenant_id: monitor.tenant_id.clone(),
            name: monitor.name.clone(),
            slug: monitor.slug.clone(),
            description: monitor.description.clone(),
            active: monitor.active,
            paused: monitor.paused,
            validated: monitor.validated,
            enabled: monitor.active && !monitor.paused,
            validation_errors: monitor.validation_errors.clone(),
            networks: monitor.networks.clone(),
            addresses: monitor.addresses.clone(),
            match_conditions: MatchConditions {
                functions: monitor.match_functions.clone(),
                events: monitor.match_events.clone(),
                transactions: monitor.match_transactions.clone(),
            },
            trigger_conditions: monitor.trigger_conditions.clone(),
            trigger_count: embedded.len(),
            trigger_slugs,
            triggers: embedded,
            missing_triggers,
            created_at: monitor.created_at,
            updated_at: monitor.updated_at,
            last_validated_at: monitor.last_validated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use confsync_core::TenantId;
    use confsync_testing_utils::{MonitorBuilder, TriggerBuilder};

    fn t1() -> TenantId {
        TenantId::parse("t1").unwrap()
    }

    #[test]
    fn test_monitor_embeds_triggers_in_reference_order() {
        let email = TriggerBuilder::email(t1(), "email-ops").build();
        let webhook = TriggerBuilder::webhook(t1(), "slack-hook").build();
        let monitor = MonitorBuilder::new(t1())
            .with_trigger_slugs(&["slack-hook", "email-ops"])
            .build();

        // repository order is irrelevant
        let record = Denormalizer::monitor(&monitor, &[email, webhook]).unwrap();

        let slugs: Vec<_> = record.triggers.iter().map(|t| t.slug.as_str()).collect();
        assert_eq!(slugs, vec!["slack-hook", "email-ops"]);
        assert_eq!(record.trigger_count, 2);
        assert!(record.missing_triggers.is_empty());
        assert!(record.enabled);
    }

    #[test]
    fn test_missing_and_duplicate_references() {
        let email = TriggerBuilder::email(t1(), "email-ops").build();
        let monitor = MonitorBuilder::new(t1())
            .with_trigger_slugs(&["email-ops", "gone", "email-ops"])
            .paused(true)
            .build();

        let record = Denormalizer::monitor(&monitor, &[email]).unwrap();
        assert_eq!(record.trigger_slugs, vec!["email-ops", "gone"]);
        assert_eq!(record.trigger_count, 1);
        assert_eq!(record.missing_triggers, vec!["gone"]);
        assert!(!record.enabled);
    }

    #[test]
    fn test_no_triggers_serializes_empty_lists() {
        let monitor = MonitorBuilder::new(t1()).build();
        let record = Denormalizer::monitor(&monitor, &[]).unwrap();
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["triggers"], serde_json::json!([]));
        assert_eq!(value["missing_triggers"], serde_json::json!([]));
        assert_eq!(value["trigger_count"], 0);
    }

    #[test]
    fn test_cross_tenant_trigger_is_rejected() {
        let foreign = TriggerBuilder::email(TenantId::parse("t2").unwrap(), "email-ops").build();
        let monitor = MonitorBuilder::new(t1())
            .with_trigger_slugs(&["email-ops"])
            .build();

        let err = Denormalizer::monitor(&monitor, &[foreign]).unwrap_err();
        assert!(matches!(err, SyncError::CrossTenantKeyViolation { ref tenant, ref key }
            if tenant == "t1" && key.starts_with("tenant:t2:trigger:")));
    }

    #[test]
    fn test_trigger_without_matching_config_fails() {
        let mut broken = TriggerBuilder::email(t1(), "email-ops").build();
        broken.email_config = None;
        assert!(matches!(
            Denormalizer::trigger(&broken),
            Err(SyncError::Denormalization { kind: ResourceKind::Trigger, .. })
        ));

        let monitor = MonitorBuilder::new(t1())
            .with_trigger_slugs(&["email-ops"])
            .build();
        assert!(matches!(
            Denormalizer::monitor(&monitor, &[broken]),
            Err(SyncError::Denormalization { kind: ResourceKind::Monitor, .. })
        ));
    }

    #[test]
    fn test_output_is_deterministic() {
        let triggers = vec![
            TriggerBuilder::email(t1(), "email-ops").build(),
            TriggerBuilder::webhook(t1(), "slack-hook").build(),
        ];
        let monitor = MonitorBuilder::new(t1())
            .with_trigger_slugs(&["email-ops", "slack-hook"])
            .build();

        let first = serde_json::to_vec(&Denormalizer::monitor(&monitor, &triggers).unwrap()).unwrap();
        let second = serde_json::to_vec(&Denormalizer::monitor(&monitor, &triggers).unwrap()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_tenant_enabled_follows_status() {
        let mut tenant = confsync_testing_utils::TenantBuilder::new("t1").build();
        assert!(Denormalizer::tenant(&tenant).enabled);
        tenant.status = TenantStatus::Suspended;
        assert!(!Denormalizer::tenant(&tenant).enabled);
    }
}
