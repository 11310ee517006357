//! Cache key and channel naming.
//!
//! Every accessor of the shared cache medium goes through these functions.
//! They only accept validated [`TenantId`] / [`ResourceId`] values, so none
//! of them can fail and no segment can contain the `:` separator.

use crate::errors::{SyncError, SyncResult};
use crate::models::{ResourceId, ResourceKind, TenantId, TenantScope};

pub const PLATFORM_PREFIX: &str = "platform:";
pub const TENANT_PREFIX: &str = "tenant:";
pub const ACTIVE_SUFFIX: &str = "active";

/// Cross-kind channel for every platform-scoped change.
pub const PLATFORM_CHANNEL: &str = "config:platform:update";

/// `platform:{kind}:{slug_or_id}`
pub fn platform_key(kind: ResourceKind, id: &ResourceId) -> String {
    format!("{PLATFORM_PREFIX}{kind}:{id}")
}

/// `tenant:{tenant_id}:{kind}:{id}`
pub fn tenant_key(tenant: &TenantId, kind: ResourceKind, id: &ResourceId) -> String {
    format!("{TENANT_PREFIX}{tenant}:{kind}:{id}")
}

pub fn record_key(scope: &TenantScope, kind: ResourceKind, id: &ResourceId) -> String {
    match scope {
        TenantScope::Platform => platform_key(kind, id),
        TenantScope::Tenant(tenant) => tenant_key(tenant, kind, id),
    }
}

/// `tenant:{tenant_id}:{kind}:active`, or `platform:{kind}:active` for the
/// shared scope.
pub fn active_set_key(scope: &TenantScope, kind: ResourceKind) -> String {
    match scope {
        TenantScope::Platform => format!("{PLATFORM_PREFIX}{kind}:{ACTIVE_SUFFIX}"),
        TenantScope::Tenant(tenant) => format!("{TENANT_PREFIX}{tenant}:{kind}:{ACTIVE_SUFFIX}"),
    }
}

/// Prefix shared by every key owned by `tenant`, trailing separator included.
pub fn tenant_prefix(tenant: &TenantId) -> String {
    format!("{TENANT_PREFIX}{tenant}:")
}

pub fn scope_prefix(scope: &TenantScope) -> String {
    match scope {
        TenantScope::Platform => PLATFORM_PREFIX.to_string(),
        TenantScope::Tenant(tenant) => tenant_prefix(tenant),
    }
}

/// `config:{kind}:update`
pub fn kind_channel(kind: ResourceKind) -> String {
    format!("config:{kind}:update")
}

/// `config:tenant:{tenant_id}:update`
pub fn tenant_channel(tenant: &TenantId) -> String {
    format!("config:tenant:{tenant}:update")
}

/// Channels an event about `(kind, scope)` is published on, without
/// duplicates: the kind channel, then the platform or tenant channel.
pub fn channels_for(kind: ResourceKind, scope: &TenantScope) -> Vec<String> {
    let mut channels = vec![kind_channel(kind)];
    let scoped = match scope {
        TenantScope::Platform => PLATFORM_CHANNEL.to_string(),
        TenantScope::Tenant(tenant) => tenant_channel(tenant),
    };
    if !channels.contains(&scoped) {
        channels.push(scoped);
    }
    channels
}

/// Guard run before a key is written on behalf of `scope`.
pub fn ensure_scope_key(scope: &TenantScope, key: &str) -> SyncResult<()> {
    let prefix = scope_prefix(scope);
    if key.starts_with(&prefix) {
        Ok(())
    } else {
        Err(SyncError::CrossTenantKeyViolation {
            tenant: scope.to_string(),
            key: key.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn tid(s: &str) -> TenantId {
        TenantId::parse(s).unwrap()
    }

    fn rid(s: &str) -> ResourceId {
        ResourceId::parse(s).unwrap()
    }

    #[test]
    fn test_key_formats() {
        assert_eq!(
            platform_key(ResourceKind::Network, &rid("ethereum-mainnet")),
            "platform:network:ethereum-mainnet"
        );
        assert_eq!(
            tenant_key(&tid("t1"), ResourceKind::Monitor, &rid("m1")),
            "tenant:t1:monitor:m1"
        );
        assert_eq!(
            active_set_key(&TenantScope::Tenant(tid("t1")), ResourceKind::Monitor),
            "tenant:t1:monitor:active"
        );
        assert_eq!(
            active_set_key(&TenantScope::Platform, ResourceKind::Tenant),
            "platform:tenant:active"
        );
        assert_eq!(
            record_key(&TenantScope::Platform, ResourceKind::FilterScript, &rid("s1")),
            "platform:filter_script:s1"
        );
    }

    #[test]
    fn test_channel_formats() {
        assert_eq!(kind_channel(ResourceKind::Monitor), "config:monitor:update");
        assert_eq!(tenant_channel(&tid("t1")), "config:tenant:t1:update");
        assert_eq!(
            channels_for(ResourceKind::Monitor, &TenantScope::Tenant(tid("t1"))),
            vec!["config:monitor:update", "config:tenant:t1:update"]
        );
        assert_eq!(
            channels_for(ResourceKind::Network, &TenantScope::Platform),
            vec!["config:network:update", "config:platform:update"]
        );
        assert_eq!(
            channels_for(ResourceKind::Platform, &TenantScope::Platform),
            vec!["config:platform:update"]
        );
    }

    #[test]
    fn test_keys_are_deterministic() {
        let id = ResourceId::from(Uuid::new_v4());
        assert_eq!(
            tenant_key(&tid("t1"), ResourceKind::Trigger, &id),
            tenant_key(&tid("t1"), ResourceKind::Trigger, &id)
        );
    }

    #[test]
    fn test_tenant_isolation_across_kinds_and_ids() {
        let tenants = [tid("t1"), tid("t10"), tid("t1.a"), tid("a-t1")];
        let ids = [rid("m1"), rid("1"), rid("t1"), ResourceId::from(Uuid::nil())];

        for a in &tenants {
            for b in tenants.iter().filter(|b| *b != a) {
                assert_ne!(tenant_channel(a), tenant_channel(b));
                assert!(!tenant_prefix(b).starts_with(&tenant_prefix(a)));
                for kind in ResourceKind::ALL {
                    let scope_a = TenantScope::Tenant(a.clone());
                    let scope_b = TenantScope::Tenant(b.clone());
                    assert_ne!(active_set_key(&scope_a, kind), active_set_key(&scope_b, kind));
                    for id in &ids {
                        let key_a = tenant_key(a, kind, id);
                        assert_ne!(key_a, tenant_key(b, kind, id));
                        assert!(ensure_scope_key(&scope_b, &key_a).is_err());
                    }
                }
            }
        }
    }

    #[test]
    fn test_ensure_scope_key() {
        let t1 = TenantScope::Tenant(tid("t1"));
        assert!(ensure_scope_key(&t1, "tenant:t1:monitor:m1").is_ok());
        assert!(matches!(
            ensure_scope_key(&t1, "tenant:t2:monitor:m1"),
            Err(SyncError::CrossTenantKeyViolation { .. })
        ));
        assert!(ensure_scope_key(&t1, "platform:network:eth").is_err());
        assert!(ensure_scope_key(&TenantScope::Platform, "platform:network:eth").is_ok());
    }
}
