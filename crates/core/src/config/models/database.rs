use serde::{Deserialize, Serialize};

/// Authoritative store connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout_seconds: u64,
    pub idle_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost/confsync".to_string(),
            max_connections: 10,
            min_connections: 1,
            connection_timeout_seconds: 30,
            idle_timeout_seconds: 600,
        }
    }
}

impl DatabaseConfig {
    /// Validate database configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.url.is_empty() {
            return Err(anyhow::anyhow!("Database URL must not be empty"));
        }

        if !self.url.starts_with("postgresql://")
            && !self.url.starts_with("postgres://")
            && !self.url.starts_with("sqlite:")
        {
            return Err(anyhow::anyhow!("Database URL must be a PostgreSQL or SQLite URL"));
        }

        if self.max_connections == 0 {
            return Err(anyhow::anyhow!("Maximum connections must be greater than 0"));
        }

        if self.min_connections > self.max_connections {
            return Err(anyhow::anyhow!("Minimum connections must not exceed maximum connections"));
        }

        if self.connection_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("Connection timeout must be greater than 0"));
        }

        Ok(())
    }

    pub fn is_sqlite(&self) -> bool {
        self.url.starts_with("sqlite:")
    }
}
