use async_trait::async_trait;
use confsync_core::{
    Committed, ConfigRepository, FilterScript, Monitor, Network, SyncError, SyncResult, Tenant,
    TenantId, TenantStatus, Trigger, TriggerType,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::str::FromStr;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::database::mapping::MappingHelpers;

const SELECT_TENANT: &str = r#"
    SELECT id, name, slug, plan, status, settings, created_at, updated_at
    FROM tenants WHERE id = ?
"#;

const SELECT_NETWORK_BY_ID: &str = r#"
    SELECT id, name, slug, network_type, chain_id, network_passphrase, rpc_urls, block_time_ms,
           confirmation_blocks, cron_schedule, max_past_blocks, store_blocks, description, active,
           validated, validation_errors, created_at, updated_at, last_validated_at
    FROM networks WHERE id = ?
"#;

const SELECT_FILTER_SCRIPT_BY_ID: &str = r#"
    SELECT id, name, slug, language, script_path, description, arguments, timeout_ms,
           file_size_bytes, file_hash, active, validated, validation_errors, created_at,
           updated_at, last_validated_at
    FROM filter_scripts WHERE id = ?
"#;

const SELECT_MONITOR: &str = r#"
    SELECT id, tenant_id, name, slug, description, active, paused, validated, validation_errors,
           networks, addresses, match_functions, match_events, match_transactions,
           trigger_conditions, trigger_slugs, created_at, updated_at, last_validated_at
    FROM monitors WHERE tenant_id = ? AND id = ?
"#;

const SELECT_TRIGGER: &str = r#"
    SELECT id, tenant_id, name, slug, description, trigger_type, active, validated,
           validation_errors, email_config, webhook_config, created_at, updated_at,
           last_validated_at
    FROM triggers WHERE tenant_id = ? AND id = ?
"#;

/// Authoritative store backed by SQLite, used for embedded deployments and
/// tests (`sqlite::memory:`).
pub struct SqliteConfigRepository {
    pool: SqlitePool,
}

impl SqliteConfigRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Opens an embedded SQLite repository and creates its schema.
    pub async fn new_embedded(database_url: &str) -> SyncResult<Self> {
        debug!("Creating embedded SQLite config repository at: {}", database_url);

        let in_memory = database_url.contains(":memory:");
        let mut connect_options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        if !in_memory {
            connect_options = connect_options.journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);
        }

        // every connection to sqlite::memory: is a separate database
        let max_connections = if in_memory { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .min_connections(1)
            .connect_with(connect_options)
            .await?;

        Self::run_migrations(&pool).await?;

        debug!("Successfully created embedded SQLite config repository");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Runs the embedded migrations.
    pub async fn run_migrations(pool: &SqlitePool) -> SyncResult<()> {
        debug!("Running SQLite database migrations");

        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS tenants (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                slug TEXT NOT NULL UNIQUE,
                plan TEXT NOT NULL DEFAULT 'free',
                status TEXT NOT NULL DEFAULT 'active',
                settings TEXT NOT NULL DEFAULT '{}',
                created_at DATETIME NOT NULL,
                updated_at DATETIME NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS networks (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                slug TEXT NOT NULL UNIQUE,
                network_type TEXT NOT NULL,
                chain_id INTEGER,
                network_passphrase TEXT,
                rpc_urls TEXT NOT NULL DEFAULT '[]',
                block_time_ms INTEGER NOT NULL,
                confirmation_blocks INTEGER NOT NULL DEFAULT 1,
                cron_schedule TEXT NOT NULL,
                max_past_blocks INTEGER,
                store_blocks INTEGER NOT NULL DEFAULT 0,
                description TEXT,
                active INTEGER NOT NULL DEFAULT 1,
                validated INTEGER NOT NULL DEFAULT 0,
                validation_errors TEXT,
                created_at DATETIME NOT NULL,
                updated_at DATETIME NOT NULL,
                last_validated_at DATETIME
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS filter_scripts (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                slug TEXT NOT NULL UNIQUE,
                language TEXT NOT NULL,
                script_path TEXT NOT NULL,
                description TEXT,
                arguments TEXT NOT NULL DEFAULT '[]',
                timeout_ms INTEGER NOT NULL DEFAULT 1000,
                file_size_bytes INTEGER,
                file_hash TEXT,
                active INTEGER NOT NULL DEFAULT 1,
                validated INTEGER NOT NULL DEFAULT 0,
                validation_errors TEXT,
                created_at DATETIME NOT NULL,
                updated_at DATETIME NOT NULL,
                last_validated_at DATETIME
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS monitors (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                name TEXT NOT NULL,
                slug TEXT NOT NULL,
                description TEXT,
                active INTEGER NOT NULL DEFAULT 1,
                paused INTEGER NOT NULL DEFAULT 0,
                validated INTEGER NOT NULL DEFAULT 0,
                validation_errors TEXT,
                networks TEXT NOT NULL DEFAULT '[]',
                addresses TEXT NOT NULL DEFAULT '[]',
                match_functions TEXT NOT NULL DEFAULT '[]',
                match_events TEXT NOT NULL DEFAULT '[]',
                match_transactions TEXT NOT NULL DEFAULT '[]',
                trigger_conditions TEXT NOT NULL DEFAULT '[]',
                trigger_slugs TEXT NOT NULL DEFAULT '[]',
                created_at DATETIME NOT NULL,
                updated_at DATETIME NOT NULL,
                last_validated_at DATETIME,
                UNIQUE (tenant_id, slug)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS triggers (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                name TEXT NOT NULL,
                slug TEXT NOT NULL,
                description TEXT,
                trigger_type TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                validated INTEGER NOT NULL DEFAULT 0,
                validation_errors TEXT,
                email_config TEXT,
                webhook_config TEXT,
                created_at DATETIME NOT NULL,
                updated_at DATETIME NOT NULL,
                last_validated_at DATETIME,
                UNIQUE (tenant_id, slug)
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_monitors_tenant ON monitors(tenant_id)",
            "CREATE INDEX IF NOT EXISTS idx_triggers_tenant ON triggers(tenant_id)",
        ];

        for statement in statements {
            sqlx::query(statement).execute(pool).await?;
        }

        debug!("SQLite database migrations completed");
        Ok(())
    }

    fn row_to_tenant(row: &SqliteRow) -> SyncResult<Tenant> {
        let status: String = row.try_get("status")?;
        Ok(Tenant {
            id: MappingHelpers::parse_tenant_id(row.try_get("id")?)?,
            name: row.try_get("name")?,
            slug: row.try_get("slug")?,
            plan: row.try_get("plan")?,
            status: TenantStatus::parse(&status)?,
            settings: MappingHelpers::parse_json_sqlite(row, "settings")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_network(row: &SqliteRow) -> SyncResult<Network> {
        Ok(Network {
            id: MappingHelpers::parse_uuid_sqlite(row, "id")?,
            name: row.try_get("name")?,
            slug: row.try_get("slug")?,
            network_type: row.try_get("network_type")?,
            chain_id: row.try_get("chain_id")?,
            network_passphrase: row.try_get("network_passphrase")?,
            rpc_urls: MappingHelpers::parse_json_sqlite(row, "rpc_urls")?,
            block_time_ms: row.try_get("block_time_ms")?,
            confirmation_blocks: row.try_get("confirmation_blocks")?,
            cron_schedule: row.try_get("cron_schedule")?,
            max_past_blocks: row.try_get("max_past_blocks")?,
            store_blocks: row.try_get("store_blocks")?,
            description: row.try_get("description")?,
            active: row.try_get("active")?,
            validated: row.try_get("validated")?,
            validation_errors: MappingHelpers::parse_optional_json_sqlite(row, "validation_errors")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            last_validated_at: row.try_get("last_validated_at")?,
        })
    }

    fn row_to_filter_script(row: &SqliteRow) -> SyncResult<FilterScript> {
        Ok(FilterScript {
            id: MappingHelpers::parse_uuid_sqlite(row, "id")?,
            name: row.try_get("name")?,
            slug: row.try_get("slug")?,
            language: row.try_get("language")?,
            script_path: row.try_get("script_path")?,
            description: row.try_get("description")?,
            arguments: MappingHelpers::parse_json_sqlite(row, "arguments")?,
            timeout_ms: row.try_get("timeout_ms")?,
            file_size_bytes: row.try_get("file_size_bytes")?,
            file_hash: row.try_get("file_hash")?,
            active: row.try_get("active")?,
            validated: row.try_get("validated")?,
            validation_errors: MappingHelpers::parse_optional_json_sqlite(row, "validation_errors")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            last_validated_at: row.try_get("last_validated_at")?,
        })
    }

    fn row_to_monitor(row: &SqliteRow) -> SyncResult<Monitor> {
        Ok(Monitor {
            id: MappingHelpers::parse_uuid_sqlite(row, "id")?,
            tenant_id: MappingHelpers::parse_tenant_id(row.try_get("tenant_id")?)?,
            name: row.try_get("name")?,
            slug: row.try_get("slug")?,
            description: row.try_get("description")?,
            active: row.try_get("active")?,
            paused: row.try_get("paused")?,
            validated: row.try_get("validated")?,
            validation_errors: MappingHelpers::parse_optional_json_sqlite(row, "validation_errors")?,
            networks: MappingHelpers::parse_json_sqlite(row, "networks")?,
            addresses: MappingHelpers::parse_json_sqlite(row, "addresses")?,
            match_functions: MappingHelpers::parse_json_sqlite(row, "match_functions")?,
            match_events: MappingHelpers::parse_json_sqlite(row, "match_events")?,
            match_transactions: MappingHelpers::parse_json_sqlite(row, "match_transactions")?,
            trigger_conditions: MappingHelpers::parse_json_sqlite(row, "trigger_conditions")?,
            trigger_slugs: MappingHelpers::parse_json_sqlite(row, "trigger_slugs")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            last_validated_at: row.try_get("last_validated_at")?,
        })
    }

    fn row_to_trigger(row: &SqliteRow) -> SyncResult<Trigger> {
        let trigger_type: String = row.try_get("trigger_type")?;
        Ok(Trigger {
            id: MappingHelpers::parse_uuid_sqlite(row, "id")?,
            tenant_id: MappingHelpers::parse_tenant_id(row.try_get("tenant_id")?)?,
            name: row.try_get("name")?,
            slug: row.try_get("slug")?,
            description: row.try_get("description")?,
            trigger_type: TriggerType::parse(&trigger_type)?,
            active: row.try_get("active")?,
            validated: row.try_get("validated")?,
            validation_errors: MappingHelpers::parse_optional_json_sqlite(row, "validation_errors")?,
            email_config: MappingHelpers::parse_optional_json_sqlite(row, "email_config")?,
            webhook_config: MappingHelpers::parse_optional_json_sqlite(row, "webhook_config")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            last_validated_at: row.try_get("last_validated_at")?,
        })
    }

    async fn fetch_tenant(conn: &mut SqliteConnection, id: &TenantId) -> SyncResult<Option<Tenant>> {
        let row = sqlx::query(SELECT_TENANT)
            .bind(id.as_str())
            .fetch_optional(conn)
            .await?;
        row.as_ref().map(Self::row_to_tenant).transpose()
    }

    async fn fetch_network(conn: &mut SqliteConnection, id: Uuid) -> SyncResult<Option<Network>> {
        let row = sqlx::query(SELECT_NETWORK_BY_ID)
            .bind(id.to_string())
            .fetch_optional(conn)
            .await?;
        row.as_ref().map(Self::row_to_network).transpose()
    }

    async fn fetch_filter_script(
        conn: &mut SqliteConnection,
        id: Uuid,
    ) -> SyncResult<Option<FilterScript>> {
        let row = sqlx::query(SELECT_FILTER_SCRIPT_BY_ID)
            .bind(id.to_string())
            .fetch_optional(conn)
            .await?;
        row.as_ref().map(Self::row_to_filter_script).transpose()
    }

    async fn fetch_monitor(
        conn: &mut SqliteConnection,
        tenant: &TenantId,
        id: Uuid,
    ) -> SyncResult<Option<Monitor>> {
        let row = sqlx::query(SELECT_MONITOR)
            .bind(tenant.as_str())
            .bind(id.to_string())
            .fetch_optional(conn)
            .await?;
        row.as_ref().map(Self::row_to_monitor).transpose()
    }

    async fn fetch_trigger(
        conn: &mut SqliteConnection,
        tenant: &TenantId,
        id: Uuid,
    ) -> SyncResult<Option<Trigger>> {
        let row = sqlx::query(SELECT_TRIGGER)
            .bind(tenant.as_str())
            .bind(id.to_string())
            .fetch_optional(conn)
            .await?;
        row.as_ref().map(Self::row_to_trigger).transpose()
    }
}

#[async_trait]
impl ConfigRepository for SqliteConfigRepository {
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
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name, slug = excluded.slug, plan = excluded.plan,
                status = excluded.status, settings = excluded.settings,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(value.id.as_str())
        .bind(&value.name)
        .bind(&value.slug)
        .bind(&value.plan)
        .bind(value.status.as_str())
        .bind(MappingHelpers::to_json_text(&value.settings)?)
        .bind(value.created_at)
        .bind(value.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!("Tenant {} committed", value.id);
        Ok(Committed::new(value, previous, committed_at))
    }

    #[instrument(skip(self), fields(tenant_id = %id))]
    async fn delete_tenant(&self, id: &TenantId) -> SyncResult<Option<Committed<Tenant>>> {
        let mut tx = self.pool.begin().await?;
        let Some(existing) = Self::fetch_tenant(&mut tx, id).await? else {
            return Ok(None);
        };

        for statement in [
            "DELETE FROM monitors WHERE tenant_id = ?",
            "DELETE FROM triggers WHERE tenant_id = ?",
            "DELETE FROM tenants WHERE id = ?",
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
            FROM networks WHERE slug = ?
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
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name, slug = excluded.slug, network_type = excluded.network_type,
                chain_id = excluded.chain_id, network_passphrase = excluded.network_passphrase,
                rpc_urls = excluded.rpc_urls, block_time_ms = excluded.block_time_ms,
                confirmation_blocks = excluded.confirmation_blocks,
                cron_schedule = excluded.cron_schedule, max_past_blocks = excluded.max_past_blocks,
                store_blocks = excluded.store_blocks, description = excluded.description,
                active = excluded.active, validated = excluded.validated,
                validation_errors = excluded.validation_errors, updated_at = excluded.updated_at,
                last_validated_at = excluded.last_validated_at
            "#,
        )
        .bind(value.id.to_string())
        .bind(&value.name)
        .bind(&value.slug)
        .bind(&value.network_type)
        .bind(value.chain_id)
        .bind(&value.network_passphrase)
        .bind(MappingHelpers::to_json_text(&value.rpc_urls)?)
        .bind(value.block_time_ms)
        .bind(value.confirmation_blocks)
        .bind(&value.cron_schedule)
        .bind(value.max_past_blocks)
        .bind(value.store_blocks)
        .bind(&value.description)
        .bind(value.active)
        .bind(value.validated)
        .bind(MappingHelpers::to_optional_json_text(value.validation_errors.as_ref())?)
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
        sqlx::query("DELETE FROM networks WHERE id = ?")
            .bind(id.to_string())
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
            FROM filter_scripts WHERE slug = ?
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
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name, slug = excluded.slug, language = excluded.language,
                script_path = excluded.script_path, description = excluded.description,
                arguments = excluded.arguments, timeout_ms = excluded.timeout_ms,
                file_size_bytes = excluded.file_size_bytes, file_hash = excluded.file_hash,
                active = excluded.active, validated = excluded.validated,
                validation_errors = excluded.validation_errors, updated_at = excluded.updated_at,
                last_validated_at = excluded.last_validated_at
            "#,
        )
        .bind(value.id.to_string())
        .bind(&value.name)
        .bind(&value.slug)
        .bind(&value.language)
        .bind(&value.script_path)
        .bind(&value.description)
        .bind(MappingHelpers::to_json_text(&value.arguments)?)
        .bind(value.timeout_ms)
        .bind(value.file_size_bytes)
        .bind(&value.file_hash)
        .bind(value.active)
        .bind(value.validated)
        .bind(MappingHelpers::to_optional_json_text(value.validation_errors.as_ref())?)
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
        sqlx::query("DELETE FROM filter_scripts WHERE id = ?")
            .bind(id.to_string())
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
            FROM monitors WHERE tenant_id = ? ORDER BY id
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
        let monitors = self.list_monitors(tenant).await?;
        Ok(monitors
            .into_iter()
            .filter(|m| m.references_trigger(trigger_slug))
            .collect())
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
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name, slug = excluded.slug, description = excluded.description,
                active = excluded.active, paused = excluded.paused, validated = excluded.validated,
                validation_errors = excluded.validation_errors, networks = excluded.networks,
                addresses = excluded.addresses, match_functions = excluded.match_functions,
                match_events = excluded.match_events,
                match_transactions = excluded.match_transactions,
                trigger_conditions = excluded.trigger_conditions,
                trigger_slugs = excluded.trigger_slugs, updated_at = excluded.updated_at,
                last_validated_at = excluded.last_validated_at
            WHERE monitors.tenant_id = excluded.tenant_id
            "#,
        )
        .bind(value.id.to_string())
        .bind(value.tenant_id.as_str())
        .bind(&value.name)
        .bind(&value.slug)
        .bind(&value.description)
        .bind(value.active)
        .bind(value.paused)
        .bind(value.validated)
        .bind(MappingHelpers::to_optional_json_text(value.validation_errors.as_ref())?)
        .bind(MappingHelpers::to_json_text(&value.networks)?)
        .bind(MappingHelpers::to_json_text(&value.addresses)?)
        .bind(MappingHelpers::to_json_text(&value.match_functions)?)
        .bind(MappingHelpers::to_json_text(&value.match_events)?)
        .bind(MappingHelpers::to_json_text(&value.match_transactions)?)
        .bind(MappingHelpers::to_json_text(&value.trigger_conditions)?)
        .bind(MappingHelpers::to_json_text(&value.trigger_slugs)?)
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
        sqlx::query("DELETE FROM monitors WHERE tenant_id = ? AND id = ?")
            .bind(tenant.as_str())
            .bind(id.to_string())
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
            FROM triggers WHERE tenant_id = ? ORDER BY id
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
        let triggers = self.list_triggers(tenant).await?;
        Ok(triggers
            .into_iter()
            .filter(|t| slugs.contains(&t.slug))
            .collect())
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
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name, slug = excluded.slug, description = excluded.description,
                trigger_type = excluded.trigger_type, active = excluded.active,
                validated = excluded.validated, validation_errors = excluded.validation_errors,
                email_config = excluded.email_config, webhook_config = excluded.webhook_config,
                updated_at = excluded.updated_at, last_validated_at = excluded.last_validated_at
            WHERE triggers.tenant_id = excluded.tenant_id
            "#,
        )
        .bind(value.id.to_string())
        .bind(value.tenant_id.as_str())
        .bind(&value.name)
        .bind(&value.slug)
        .bind(&value.description)
        .bind(value.trigger_type.as_str())
        .bind(value.active)
        .bind(value.validated)
        .bind(MappingHelpers::to_optional_json_text(value.validation_errors.as_ref())?)
        .bind(MappingHelpers::to_optional_json_text(value.email_config.as_ref())?)
        .bind(MappingHelpers::to_optional_json_text(value.webhook_config.as_ref())?)
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
        sqlx::query("DELETE FROM triggers WHERE tenant_id = ? AND id = ?")
            .bind(tenant.as_str())
            .bind(id.to_string())
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

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use confsync_core::EmailTriggerConfig;
    use serde_json::json;

    async fn repo() -> SqliteConfigRepository {
        SqliteConfigRepository::new_embedded("sqlite::memory:")
            .await
            .unwrap()
    }

    fn tenant_id() -> TenantId {
        TenantId::parse("t1").unwrap()
    }

    fn monitor(trigger_slugs: &[&str]) -> Monitor {
        Monitor {
            id: Uuid::new_v4(),
            tenant_id: tenant_id(),
            name: "Large transfers".into(),
            slug: "large-transfers".into(),
            description: None,
            active: true,
            paused: false,
            validated: true,
            validation_errors: None,
            networks: vec!["ethereum-mainnet".into()],
            addresses: json!([{"address": "0xabc"}]),
            match_functions: json!([]),
            match_events: json!([{"signature": "Transfer(address,address,uint256)"}]),
            match_transactions: json!([]),
            trigger_conditions: json!([]),
            trigger_slugs: trigger_slugs.iter().map(|s| s.to_string()).collect(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            last_validated_at: None,
        }
    }

    fn email_trigger(slug: &str) -> Trigger {
        Trigger {
            id: Uuid::new_v4(),
            tenant_id: tenant_id(),
            name: slug.to_uppercase(),
            slug: slug.into(),
            description: None,
            trigger_type: TriggerType::Email,
            active: true,
            validated: true,
            validation_errors: None,
            email_config: Some(EmailTriggerConfig {
                host: "smtp.example.com".into(),
                port: 587,
                username_type: "plain".into(),
                username_value: "alerts".into(),
                password_type: "environment".into(),
                password_value: "SMTP_PASSWORD".into(),
                sender: "alerts@example.com".into(),
                recipients: vec!["ops@example.com".into()],
                message_title: "Alert".into(),
                message_body: "${monitor.name} matched".into(),
            }),
            webhook_config: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            last_validated_at: None,
        }
    }

    #[tokio::test]
    async fn test_save_monitor_reports_previous_version() {
        let repo = repo().await;
        let mut m = monitor(&["email-ops"]);

        let first = repo.save_monitor(&m).await.unwrap();
        assert!(first.is_create());

        m.paused = true;
        let second = repo.save_monitor(&m).await.unwrap();
        assert_eq!(second.previous.as_ref().map(|p| p.paused), Some(false));
        assert_eq!(second.value.created_at, first.value.created_at);

        let stored = repo.get_monitor(&tenant_id(), m.id).await.unwrap().unwrap();
        assert!(stored.paused);
        assert_eq!(stored.updated_at, second.committed_at);
        assert_eq!(stored.trigger_slugs, vec!["email-ops"]);
    }

    #[tokio::test]
    async fn test_trigger_lookup_by_slug_and_reference() {
        let repo = repo().await;
        let a = email_trigger("email-ops");
        let b = email_trigger("email-dev");
        repo.save_trigger(&a).await.unwrap();
        repo.save_trigger(&b).await.unwrap();
        repo.save_monitor(&monitor(&["email-ops"])).await.unwrap();

        let found = repo
            .triggers_by_slugs(&tenant_id(), &["email-ops".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].email_config, a.email_config);

        let referencing = repo
            .monitors_referencing_trigger(&tenant_id(), "email-ops")
            .await
            .unwrap();
        assert_eq!(referencing.len(), 1);
        assert!(repo
            .monitors_referencing_trigger(&tenant_id(), "email-dev")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_delete_tenant_removes_owned_rows() {
        let repo = repo().await;
        let tenant = Tenant {
            id: tenant_id(),
            name: "Tenant One".into(),
            slug: "tenant-one".into(),
            plan: "pro".into(),
            status: TenantStatus::Active,
            settings: json!({}),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        repo.save_tenant(&tenant).await.unwrap();
        repo.save_monitor(&monitor(&[])).await.unwrap();
        repo.save_trigger(&email_trigger("email-ops")).await.unwrap();

        let deleted = repo.delete_tenant(&tenant_id()).await.unwrap();
        assert_eq!(deleted.map(|c| c.value.slug), Some("tenant-one".to_string()));
        assert!(repo.list_monitors(&tenant_id()).await.unwrap().is_empty());
        assert!(repo.list_triggers(&tenant_id()).await.unwrap().is_empty());
        assert!(repo.delete_tenant(&tenant_id()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_monitor_cannot_move_between_tenants() {
        let repo = repo().await;
        let m = monitor(&[]);
        repo.save_monitor(&m).await.unwrap();

        let mut moved = m.clone();
        moved.tenant_id = TenantId::parse("t2").unwrap();
        let err = repo.save_monitor(&moved).await.unwrap_err();
        assert!(err.is_fatal());
        assert!(repo.get_monitor(&tenant_id(), m.id).await.unwrap().is_some());
    }
}
