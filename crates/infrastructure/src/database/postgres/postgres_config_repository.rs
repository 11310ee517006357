use async_trait::async_trait;
use confsync_core::{
    Committed, ConfigRepository, FilterScript, Monitor, Network, SyncError, SyncResult, Tenant,
    TenantId, TenantStatus, Trigger, TriggerType,
};
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::database::mapping::MappingHelpers;

const SELECT_TENANT: &str = r#"
    SELECT id, name, slug, plan, status, settings, created_at, updated_at
    FROM tenants WHERE id = $1
"#;

const SELECT_NETWORK_BY_ID: &str = r#"
    SELECT id, name, slug, network_type, chain_id, network_passphrase, rpc_urls, block_time_ms,
           confirmation_blocks, cron_schedule, max_past_blocks, store_blocks, description, active,
           validated, validation_errors, created_at, updated_at, last_validated_at
    FROM networks WHERE id = $1
    FOR UPDATE
"#;

const SELECT_FILTER_SCRIPT_BY_ID: &str = r#"
    SELECT id, name, slug, language, script_path, description, arguments, timeout_ms,
           file_size_bytes, file_hash, active, validated, validation_errors, created_at,
           updated_at, last_validated_at
    FROM filter_scripts WHERE id = $1
    FOR UPDATE
"#;

const SELECT_MONITOR: &str = r#"
    SELECT id, tenant_id, name, slug, description, active, paused, validated, validation_errors,
           networks, addresses, match_functions, match_events, match_transactions,
           trigger_conditions, trigger_slugs, created_at, updated_at, last_validated_at
    FROM monitors WHERE tenant_id = $1 AND id = $2
"#;

const SELECT_TRIGGER: &str = r#"
    SELECT id, tenant_id, name, slug, description, trigger_type, active, validated,
           validation_errors, email_config, webhook_config, created_at, updated_at,
           last_validated_at
    FROM triggers WHERE tenant_id = $1 AND id = $2
"#;

pub struct PostgresConfigRepository {
    pool: PgPool,
}

impl PostgresConfigRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Creates the tables when they do not exist yet.
    pub async fn run_migrations(pool: &PgPool) -> SyncResult<()> {
        debug!("Running PostgreSQL database migrations");

        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS tenants (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                slug TEXT NOT NULL UNIQUE,
                plan TEXT NOT NULL DEFAULT 'free',
                status TEXT NOT NULL DEFAULT 'active',
                settings JSONB NOT NULL DEFAULT '{}',
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS networks (
                id UUID PRIMARY KEY,
                name TEXT NOT NULL,
                slug TEXT NOT NULL UNIQUE,
                network_type TEXT NOT NULL,
                chain_id BIGINT,
                network_passphrase TEXT,
                rpc_urls JSONB NOT NULL DEFAULT '[]',
                block_time_ms BIGINT NOT NULL,
                confirmation_blocks BIGINT NOT NULL DEFAULT 1,
                cron_schedule TEXT NOT NULL,
                max_past_blocks BIGINT,
                store_blocks BOOLEAN NOT NULL DEFAULT FALSE,
                description TEXT,
                active BOOLEAN NOT NULL DEFAULT TRUE,
                validated BOOLEAN NOT NULL DEFAULT FALSE,
                validation_errors JSONB,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL,
                last_validated_at TIMESTAMPTZ
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS filter_scripts (
                id UUID PRIMARY KEY,
                name TEXT NOT NULL,
                slug TEXT NOT NULL UNIQUE,
                language TEXT NOT NULL,
                script_path TEXT NOT NULL,
                description TEXT,
                arguments JSONB NOT NULL DEFAULT '[]',
                timeout_ms BIGINT NOT NULL DEFAULT 1000,
                file_size_bytes BIGINT,
                file_hash TEXT,
                active BOOLEAN NOT NULL DEFAULT TRUE,
                validated BOOLEAN NOT NULL DEFAULT FALSE,
                validation_errors JSONB,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL,
                last_validated_at TIMESTAMPTZ
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS monitors (
                id UUID PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                name TEXT NOT NULL,
                slug TEXT NOT NULL,
                description TEXT,
                active BOOLEAN NOT NULL DEFAULT TRUE,
                paused BOOLEAN NOT NULL DEFAULT FALSE,
                validated BOOLEAN NOT NULL DEFAULT FALSE,
                validation_errors JSONB,
                networks TEXT[] NOT NULL DEFAULT '{}',
                addresses JSONB NOT NULL DEFAULT '[]',
                match_functions JSONB NOT NULL DEFAULT '[]',
                match_events JSONB NOT NULL DEFAULT '[]',
                match_transactions JSONB NOT NULL DEFAULT '[]',
                trigger_conditions JSONB NOT NULL DEFAULT '[]',
                trigger_slugs TEXT[] NOT NULL DEFAULT '{}',
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL,
                last_validated_at TIMESTAMPTZ,
                UNIQUE (tenant_id, slug)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS triggers (
                id UUID PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                name TEXT NOT NULL,
                slug TEXT NOT NULL,
                description TEXT,
                trigger_type TEXT NOT NULL,
                active BOOLEAN NOT NULL DEFAULT TRUE,
                validated BOOLEAN NOT NULL DEFAULT FALSE,
                validation_errors JSONB,
                email_config JSONB,
                webhook_config JSONB,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL,
                last_validated_at TIMESTAMPTZ,
                UNIQUE (tenant_id, slug)
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_monitors_tenant ON monitors(tenant_id)",
            "CREATE INDEX IF NOT EXISTS idx_monitors_trigger_slugs ON monitors USING GIN (trigger_slugs)",
            "CREATE INDEX IF NOT EXISTS idx_triggers_tenant ON triggers(tenant_id)",
        ];

        for statement in statements {
            sqlx::query(statement).execute(pool).await?;
        }
        Ok(())
    }

    fn row_to_tenant(row: &PgRow) -> SyncResult<Tenant> {
        let status: String = row.try_get("status")?;
        Ok(Tenant {
            id: MappingHelpers::parse_tenant_id(row.try_get("id")?)?,
            name: row.try_get("name")?,
            slug: row.try_get("slug")?,
            plan: row.try_get("plan")?,
            status: TenantStatus::parse(&status)?,
            settings: row.try_get("settings")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_network(row: &PgRow) -> SyncResult<Network> {
        Ok(Network {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            slug: row.try_get("slug")?,
            network_type: row.try_get("network_type")?,
            chain_id: row.try_get("chain_id")?,
            network_passphrase: row.try_get("network_passphrase")?,
            rpc_urls: row.try_get("rpc_urls")?,
            block_time_ms: row.try_get("block_time_ms")?,
            confirmation_blocks: row.try_get("confirmation_blocks")?,
            cron_schedule: row.try_get("cron_schedule")?,
            max_past_blocks: row.try_get("max_past_blocks")?,
            store_blocks: row.try_get("store_blocks")?,
            description: row.try_get("description")?,
            active: row.try_get("active")?,
            validated: row.try_get("validated")?,
            validation_errors: row.try_get("validation_errors")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            last_validated_at: row.try_get("last_validated_at")?,
        })
    }

    fn row_to_filter_script(row: &PgRow) -> SyncResult<FilterScript> {
        Ok(FilterScript {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            slug: row.try_get("slug")?,
            language: row.try_get("language")?,
            script_path: row.try_get("script_path")?,
            description: row.try_get("description")?,
            arguments: row.try_get("arguments")?,
            timeout_ms: row.try_get("timeout_ms")?,
            file_size_bytes: row.try_get("file_size_bytes")?,
            file_hash: row.try_get("file_hash")?,
            active: row.try_get("active")?,
            validated: row.try_get("validated")?,
            validation_errors: row.try_get("validation_errors")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            last_validated_at: row.try_get("last_validated_at")?,
        })
    }

    fn row_to_monitor(row: &PgRow) -> SyncResult<Monitor> {
        Ok(Monitor {
            id: row.try_get("id")?,
            tenant_id: MappingHelpers::parse_tenant_id(row.try_get("tenant_id")?)?,
            name: row.try_get("name")?,
            slug: row.try_get("slug")?,
            description: row.try_get("description")?,
            active: row.try_get("active")?,
            paused: row.try_get("paused")?,
            validated: row.try_get("validated")?,
            validation_errors: row.try_get("validation_errors")?,
            networks: row.try_get("networks")?,
            addresses: row.try_get("addresses")?,
            match_functions: row.try_get("match_functions")?,
            match_events: row.try_get("match_events")?,
            match_transactions: row.try_get("match_transactions")?,
            trigger_conditions: row.try_get("trigger_conditions")?,
            trigger_slugs: row.try_get("trigger_slugs")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            last_validated_at: row.try_get("last_validated_at")?,
        })
    }

    fn row_to_trigger(row: &PgRow) -> SyncResult<Trigger> {
        let trigger_type: String = row.try_get("trigger_type")?;
        Ok(Trigger {
            id: row.try_get("id")?,
            tenant_id: MappingHelpers::parse_tenant_id(row.try_get("tenant_id")?)?,
            name: row.try_get("name")?,
            slug: row.try_get("slug")?,
            description: row.try_get("description")?,
            trigger_type: TriggerType::parse(&trigger_type)?,
            active: row.try_get("active")?,
            validated: row.try_get("validated")?,
            validation_errors: row.try_get("validation_errors")?,
            email_config: MappingHelpers::parse_optional_json_postgres(row, "email_config")?,
            webhook_config: MappingHelpers::parse_optional_json_postgres(row, "webhook_config")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            last_validated_at: row.try_get("last_validated_at")?,
        })
    }

    async fn fetch_tenant(conn: &mut PgConnection, id: &TenantId) -> SyncResult<Option<Tenant>> {
        let row = sqlx::query(SELECT_TENANT)
            .bind(id.as_str())
            .fetch_optional(conn)
            .await?;
        row.as_ref().map(Self::row_to_tenant).transpose()
    }

    async fn fetch_network(conn: &mut PgConnection, id: Uuid) -> SyncResult<Option<Network>> {
        let row = sqlx::query(SELECT_NETWORK_BY_ID)
            .bind(id)
            .fetch_optional(conn)
            .await?;
        row.as_ref().map(Self::row_to_network).transpose()
    }

    async fn fetch_filter_script(conn: &mut PgConnection, id: Uuid) -> SyncResult<Option<FilterScript>> {
        let row = sqlx::query(SELECT_FILTER_SCRIPT_BY_ID)
            .bind(id)
            .fetch_optional(conn)
            .await?;
        row.as_ref().map(Self::row_to_filter_script).transpose()
    }

    async fn fetch_monitor(
        conn: &mut PgConnection,
        tenant: &TenantId,
        id: Uuid,
    ) -> SyncResult<Option<Monitor>> {
        let row = sqlx::query(SELECT_MONITOR)
            .bind(tenant.as_str())
            .bind(id)
            .fetch_optional(conn)
            .await?;
        row.as_ref().map(Self::row_to_monitor).transpose()
    }

    async fn fetch_trigger(
        conn: &mut PgConnection,
        tenant: &TenantId,
        id: Uuid,
    ) -> SyncResult<Option<Trigger>> {
        let row = sqlx::query(SELECT_TRIGGER)
            .bind(tenant.as_str())
            .bind(id)
            .fetch_optional(conn)
            .await?;
        row.as_ref().map(Self::row_to_trigger).transpose()
    }
}

#[async_trait]
impl ConfigRepository for PostgresConfigRepository {
    #[instrument(skip(self), fields(tenant_id = %id))]
    async fn get_tenant(&self, id: &TenantId) -> SyncResult<Option<Tenant>> {
        let mut conn = self.pool.acquire().await?;
        Self::fetch_tenant(&mut conn, id).await
    }

    async fn list_tenants(&self) -> SyncResult<Vec<Tenant>> {
        let rows = sqlx::query(
            "SELECT id, name, slug, plan, status, settings, created_at, updated_at FROM tenants ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_tenant).collect()
    }

    #[instrument(skip(self, tenant), fields(tenant_id = %tenant.id))]
    async fn save_tenant(&self, tenant: &Tenant) -> SyncResult<Committed<Tenant>> {
        let mut tx = self.pool.begin().await?;
        let previous = Self::fetch_tenant(&mut tx, &tenant.id).await?;
        let committed_at = MappingHelpers::commit_timestamp();

        let mut value = tenant.clone();
        value.created_at = previous.as_ref().map_or(committed_at, |p| p.created_at);
        value.updated_at = committed_at;

        sqlx::query(
            r#"
            INSERT INTO tenants (id, name, slug, plan, status, settings, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name, slug = EXCLUDED.slug, plan = EXCLUDED.plan,
                status = EXCLUDED.status, settings = EXCLUDED.settings,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(value.id.as_str())
        .bind(&value.name)
        .bind(&value.slug)
        .bind(&value.plan)
        .bind(value.status.as_str())
        .bind(&value.settings)
        .bind(value.created_at)
        .bind(value.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Committed::new(value, previous, committed_at))
    }

    #[instrument(skip(self), fields(tenant_id = %id))]
    async fn delete_tenant(&self, id: &TenantId) -> SyncResult<Option<Committed<Tenant>>> {
        let mut tx = self.pool.begin().await?;
        let Some(existing) = Self::fetch_tenant(&mut tx, id).await? else {
            return Ok(None);
        };

        for statement in [
            "DELETE FROM monitors WHERE tenant_id = $1",
            "DELETE FROM triggers WHERE tenant_id = $1",
            "DELETE FROM tenants WHERE id = $1",
        ] {
            sqlx::query(statement)
                .bind(id.as_str())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(Some(Committed::new(
            existing,
            None,
            MappingHelpers::commit_timestamp(),
        )))
    }

    async fn get_network(&self, slug: &str) -> SyncResult<Option<Network>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, slug, network_type, chain_id, network_passphrase, rpc_urls, block_time_ms,
                   confirmation_blocks, cron_schedule, max_past_blocks, store_blocks, description, active,
                   validated, validation_errors, created_at, updated_at, last_validated_at
            FROM networks WHERE slug = $1
            "#,
        )
        .bind(slug)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_network).transpose()
    }

    async fn list_networks(&self) -> SyncResult<Vec<Network>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, slug, network_type, chain_id, network_passphrase, rpc_urls, block_time_ms,
                   confirmation_blocks, cron_schedule, max_past_blocks, store_blocks, description, active,
                   validated, validation_errors, created_at, updated_at, last_validated_at
            FROM networks ORDER BY slug
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_network).collect()
    }

    #[instrument(skip(self, network), fields(network_slug = %network.slug))]
    async fn save_network(&self, network: &Network) -> SyncResult<Committed<Network>> {
        let mut tx = self.pool.begin().await?;
        let previous = Self::fetch_network(&mut tx, network.id).await?;
        let committed_at = MappingHelpers::commit_timestamp();

        let mut value = network.clone();
        value.created_at = previous.as_ref().map_or(committed_at, |p| p.created_at);
        value.updated_at = committed_at;

        sqlx::query(
            r#"
            INSERT INTO networks (id, name, slug, network_type, chain_id, network_passphrase, rpc_urls,
                block_time_ms, confirmation_blocks, cron_schedule, max_past_blocks, store_blocks,
                description, active, validated, validation_errors, created_at, updated_at,
                last_validated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name, slug = EXCLUDED.slug, network_type = EXCLUDED.network_type,
                chain_id = EXCLUDED.chain_id, network_passphrase = EXCLUDED.network_passphrase,
                rpc_urls = EXCLUDED.rpc_urls, block_time_ms = EXCLUDED.block_time_ms,
                confirmation_blocks = EXCLUDED.confirmation_blocks,
                cron_schedule = EXCLUDED.cron_schedule, max_past_blocks = EXCLUDED.max_past_blocks,
                store_blocks = EXCLUDED.store_blocks, description = EXCLUDED.description,
                active = EXCLUDED.active, validated = EXCLUDED.validated,
                validation_errors = EXCLUDED.validation_errors, updated_at = EXCLUDED.updated_at,
                last_validated_at = EXCLUDED.last_validated_at
            "#,
        )
        .bind(value.id)
        .bind(&value.name)
        .bind(&value.slug)
        .bind(&value.network_type)
        .bind(value.chain_id)
        .bind(&value.network_passphrase)
        .bind(&value.rpc_urls)
        .bind(value.block_time_ms)
        .bind(value.confirmation_blocks)
        .bind(&value.cron_schedule)
        .bind(value.max_past_blocks)
        .bind(value.store_blocks)
        .bind(&value.description)
        .bind(value.active)
        .bind(value.validated)
        .bind(&value.validation_errors)
        .bind(value.created_at)
        .bind(value.updated_at)
        .bind(value.last_validated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Committed::new(value, previous, committed_at))
    }

    async fn delete_network(&self, id: Uuid) -> SyncResult<Option<Committed<Network>>> {
        let mut tx = self.pool.begin().await?;
        let Some(existing) = Self::fetch_network(&mut tx, id).await? else {
            return Ok(None);
        };
        sqlx::query("DELETE FROM networks WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(Some(Committed::new(
            existing,
            None,
            MappingHelpers::commit_timestamp(),
        )))
    }

    async fn get_filter_script(&self, slug: &str) -> SyncResult<Option<FilterScript>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, slug, language, script_path, description, arguments, timeout_ms,
                   file_size_bytes, file_hash, active, validated, validation_errors, created_at,
                   updated_at, last_validated_at
            FROM filter_scripts WHERE slug = $1
            "#,
        )
        .bind(slug)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_filter_script).transpose()
    }

    async fn list_filter_scripts(&self) -> SyncResult<Vec<FilterScript>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, slug, language, script_path, description, arguments, timeout_ms,
                   file_size_bytes, file_hash, active, validated, validation_errors, created_at,
                   updated_at, last_validated_at
            FROM filter_scripts ORDER BY slug
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_filter_script).collect()
    }

    #[instrument(skip(self, script), fields(script_slug = %script.slug))]
    async fn save_filter_script(&self, script: &FilterScript) -> SyncResult<Committed<FilterScript>> {
        let mut tx = self.pool.begin().await?;
        let previous = Self::fetch_filter_script(&mut tx, script.id).await?;
        let committed_at = MappingHelpers::commit_timestamp();

        let mut value = script.clone();
        value.created_at = previous.as_ref().map_or(committed_at, |p| p.created_at);
        value.updated_at = committed_at;

        sqlx::query(
            r#"
            INSERT INTO filter_scripts (id, name, slug, language, script_path, description, arguments,
                timeout_ms, file_size_bytes, file_hash, active, validated, validation_errors,
                created_at, updated_at, last_validated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name, slug = EXCLUDED.slug, language = EXCLUDED.language,
                script_path = EXCLUDED.script_path, description = EXCLUDED.description,
                arguments = EXCLUDED.arguments, timeout_ms = EXCLUDED.timeout_ms,
                file_size_bytes = EXCLUDED.file_size_bytes, file_hash = EXCLUDED.file_hash,
                active = EXCLUDED.active, validated = EXCLUDED.validated,
                validation_errors = EXCLUDED.validation_errors, updated_at = EXCLUDED.updated_at,
                last_validated_at = EXCLUDED.last_validated_at
            "#,
        )
        .bind(value.id)
        .bind(&value.name)
        .bind(&value.slug)
        .bind(&value.language)
        .bind(&value.script_path)
        .bind(&value.description)
        .bind(&value.arguments)
        .bind(value.timeout_ms)
        .bind(value.file_size_bytes)
        .bind(&value.file_hash)
        .bind(value.active)
        .bind(value.validated)
        .bind(&value.validation_errors)
        .bind(value.created_at)
        .bind(value.updated_at)
        .bind(value.last_validated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Committed::new(value, previous, committed_at))
    }

    async fn delete_filter_script(&self, id: Uuid) -> SyncResult<Option<Committed<FilterScript>>> {
        let mut tx = self.pool.begin().await?;
        let Some(existing) = Self::fetch_filter_script(&mut tx, id).await? else {
            return Ok(None);
        };
        sqlx::query("DELETE FROM filter_scripts WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(Some(Committed::new(
            existing,
            None,
            MappingHelpers::commit_timestamp(),
        )))
    }

    async fn get_monitor(&self, tenant: &TenantId, id: Uuid) -> SyncResult<Option<Monitor>> {
        let mut conn = self.pool.acquire().await?;
        Self::fetch_monitor(&mut conn, tenant, id).await
    }

    async fn list_monitors(&self, tenant: &TenantId) -> SyncResult<Vec<Monitor>> {
        let rows = sqlx::query(
            r#"
            SELECT id, tenant_id, name, slug, description, active, paused, validated, validation_errors,
                   networks, addresses, match_functions, match_events, match_transactions,
                   trigger_conditions, trigger_slugs, created_at, updated_at, last_validated_at
            FROM monitors WHERE tenant_id = $1 ORDER BY id
            "#,
        )
        .bind(tenant.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_monitor).collect()
    }

    async fn monitors_referencing_trigger(
        &self,
        tenant: &TenantId,
        trigger_slug: &str,
    ) -> SyncResult<Vec<Monitor>> {
        let rows = sqlx::query(
            r#"
            SELECT id, tenant_id, name, slug, description, active, paused, validated, validation_errors,
                   networks, addresses, match_functions, match_events, match_transactions,
                   trigger_conditions, trigger_slugs, created_at, updated_at, last_validated_at
            FROM monitors WHERE tenant_id = $1 AND $2 = ANY(trigger_slugs) ORDER BY id
            "#,
        )
        .bind(tenant.as_str())
        .bind(trigger_slug)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_monitor).collect()
    }

    #[instrument(skip(self, monitor), fields(tenant_id = %monitor.tenant_id, monitor_id = %monitor.id))]
    async fn save_monitor(&self, monitor: &Monitor) -> SyncResult<Committed<Monitor>> {
        let mut tx = self.pool.begin().await?;
        let previous = Self::fetch_monitor(&mut tx, &monitor.tenant_id, monitor.id).await?;
        let committed_at = MappingHelpers::commit_timestamp();

        let mut value = monitor.clone();
        value.created_at = previous.as_ref().map_or(committed_at, |p| p.created_at);
        value.updated_at = committed_at;

        let written = sqlx::query(
            r#"
            INSERT INTO monitors (id, tenant_id, name, slug, description, active, paused, validated,
                validation_errors, networks, addresses, match_functions, match_events,
                match_transactions, trigger_conditions, trigger_slugs, created_at, updated_at,
                last_validated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name, slug = EXCLUDED.slug, description = EXCLUDED.description,
                active = EXCLUDED.active, paused = EXCLUDED.paused, validated = EXCLUDED.validated,
                validation_errors = EXCLUDED.validation_errors, networks = EXCLUDED.networks,
                addresses = EXCLUDED.addresses, match_functions = EXCLUDED.match_functions,
                match_events = EXCLUDED.match_events,
                match_transactions = EXCLUDED.match_transactions,
                trigger_conditions = EXCLUDED.trigger_conditions,
                trigger_slugs = EXCLUDED.trigger_slugs, updated_at = EXCLUDED.updated_at,
                last_validated_at = EXCLUDED.last_validated_at
            WHERE monitors.tenant_id = EXCLUDED.tenant_id
            "#,
        )
        .bind(value.id)
        .bind(value.tenant_id.as_str())
        .bind(&value.name)
        .bind(&value.slug)
        .bind(&value.description)
        .bind(value.active)
        .bind(value.paused)
        .bind(value.validated)
        .bind(&value.validation_errors)
        .bind(&value.networks)
        .bind(&value.addresses)
        .bind(&value.match_functions)
        .bind(&value.match_events)
        .bind(&value.match_transactions)
        .bind(&value.trigger_conditions)
        .bind(&value.trigger_slugs)
        .bind(value.created_at)
        .bind(value.updated_at)
        .bind(value.last_validated_at)
        .execute(&mut *tx)
        .await?;
        if written.rows_affected() == 0 {
            return Err(SyncError::authoritative(format!(
                "monitor {} belongs to another tenant",
                value.id
            )));
        }

        tx.commit().await?;
        Ok(Committed::new(value, previous, committed_at))
    }

    async fn delete_monitor(
        &self,
        tenant: &TenantId,
        id: Uuid,
    ) -> SyncResult<Option<Committed<Monitor>>> {
        let mut tx = self.pool.begin().await?;
        let Some(existing) = Self::fetch_monitor(&mut tx, tenant, id).await? else {
            return Ok(None);
        };
        sqlx::query("DELETE FROM monitors WHERE tenant_id = $1 AND id = $2")
            .bind(tenant.as_str())
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(Some(Committed::new(
            existing,
            None,
            MappingHelpers::commit_timestamp(),
        )))
    }

    async fn get_trigger(&self, tenant: &TenantId, id: Uuid) -> SyncResult<Option<Trigger>> {
        let mut conn = self.pool.acquire().await?;
        Self::fetch_trigger(&mut conn, tenant, id).await
    }

    async fn list_triggers(&self, tenant: &TenantId) -> SyncResult<Vec<Trigger>> {
        let rows = sqlx::query(
            r#"
            SELECT id, tenant_id, name, slug, description, trigger_type, active, validated,
                   validation_errors, email_config, webhook_config, created_at, updated_at,
                   last_validated_at
            FROM triggers WHERE tenant_id = $1 ORDER BY id
            "#,
        )
        .bind(tenant.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_trigger).collect()
    }

    async fn triggers_by_slugs(
        &self,
        tenant: &TenantId,
        slugs: &[String],
    ) -> SyncResult<Vec<Trigger>> {
        if slugs.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            r#"
            SELECT id, tenant_id, name, slug, description, trigger_type, active, validated,
                   validation_errors, email_config, webhook_config, created_at, updated_at,
                   last_validated_at
            FROM triggers WHERE tenant_id = $1 AND slug = ANY($2)
            "#,
        )
        .bind(tenant.as_str())
        .bind(slugs)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_trigger).collect()
    }

    #[instrument(skip(self, trigger), fields(tenant_id = %trigger.tenant_id, trigger_id = %trigger.id))]
    async fn save_trigger(&self, trigger: &Trigger) -> SyncResult<Committed<Trigger>> {
        let mut tx = self.pool.begin().await?;
        let previous = Self::fetch_trigger(&mut tx, &trigger.tenant_id, trigger.id).await?;
        let committed_at = MappingHelpers::commit_timestamp();

        let mut value = trigger.clone();
        value.created_at = previous.as_ref().map_or(committed_at, |p| p.created_at);
        value.updated_at = committed_at;

        let written = sqlx::query(
            r#"
            INSERT INTO triggers (id, tenant_id, name, slug, description, trigger_type, active,
                validated, validation_errors, email_config, webhook_config, created_at, updated_at,
                last_validated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name, slug = EXCLUDED.slug, description = EXCLUDED.description,
                trigger_type = EXCLUDED.trigger_type, active = EXCLUDED.active,
                validated = EXCLUDED.validated, validation_errors = EXCLUDED.validation_errors,
                email_config = EXCLUDED.email_config, webhook_config = EXCLUDED.webhook_config,
                updated_at = EXCLUDED.updated_at, last_validated_at = EXCLUDED.last_validated_at
            WHERE triggers.tenant_id = EXCLUDED.tenant_id
            "#,
        )
        .bind(value.id)
        .bind(value.tenant_id.as_str())
        .bind(&value.name)
        .bind(&value.slug)
        .bind(&value.description)
        .bind(value.trigger_type.as_str())
        .bind(value.active)
        .bind(value.validated)
        .bind(&value.validation_errors)
        .bind(MappingHelpers::to_optional_json_value(value.email_config.as_ref())?)
        .bind(MappingHelpers::to_optional_json_value(value.webhook_config.as_ref())?)
        .bind(value.created_at)
        .bind(value.updated_at)
        .bind(value.last_validated_at)
        .execute(&mut *tx)
        .await?;
        if written.rows_affected() == 0 {
            return Err(SyncError::authoritative(format!(
                "trigger {} belongs to another tenant",
                value.id
            )));
        }

        tx.commit().await?;
        Ok(Committed::new(value, previous, committed_at))
    }

    async fn delete_trigger(
        &self,
        tenant: &TenantId,
        id: Uuid,
    ) -> SyncResult<Option<Committed<Trigger>>> {
        let mut tx = self.pool.begin().await?;
        let Some(existing) = Self::fetch_trigger(&mut tx, tenant, id).await? else {
            return Ok(None);
        };
        sqlx::query("DELETE FROM triggers WHERE tenant_id = $1 AND id = $2")
            .bind(tenant.as_str())
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(Some(Committed::new(
            existing,
            None,
            MappingHelpers::commit_timestamp(),
        )))
    }

    async fn health_check(&self) -> SyncResult<bool> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(true)
    }
}
