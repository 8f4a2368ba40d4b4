use std::env;
use std::time::Duration;

use crate::error::SourceError;

/// Identity and credential parameters, consumed once at construction
#[derive(Debug, Clone)]
pub struct CredentialSettings {
    pub instance_name: String,
    pub principal: String,
    pub database_name: String,
    pub ttl: Duration,
    pub issue_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub min_connections: u32,
    pub max_connections: u32,
    pub checkout_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            min_connections: 1,
            max_connections: 5,
            checkout_timeout: Duration::from_secs(10),
        }
    }
}

/// Connection details for the identity service that issues credentials
#[derive(Clone)]
pub struct SourceSettings {
    pub base_url: String,
    pub api_token: String,
}

impl std::fmt::Debug for SourceSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceSettings")
            .field("base_url", &self.base_url)
            .field("api_token", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub credential: CredentialSettings,
    pub pool: PoolSettings,
    pub source: SourceSettings,
}

impl DbConfig {
    /// Load configuration from the environment. A `.env` file is honored
    /// so local runs pick up the identity-service settings.
    pub fn from_env() -> Result<Self, SourceError> {
        let _ = dotenvy::dotenv();

        let credential = CredentialSettings {
            instance_name: require_env("DB_INSTANCE_NAME")?,
            principal: require_env("DB_PRINCIPAL")?,
            database_name: env::var("DB_DATABASE_NAME").unwrap_or_else(|_| "postgres".to_string()),
            ttl: Duration::from_secs(env_u64("DB_CREDENTIAL_TTL_MINUTES", 30) * 60),
            issue_timeout: Duration::from_secs(env_u64("DB_CREDENTIAL_ISSUE_TIMEOUT_SECS", 30)),
        };

        let pool = PoolSettings {
            min_connections: env_u32("DB_POOL_MIN_CONNECTIONS", 1),
            max_connections: env_u32("DB_POOL_MAX_CONNECTIONS", 5),
            checkout_timeout: Duration::from_secs(env_u64("DB_POOL_CHECKOUT_TIMEOUT_SECS", 10)),
        };

        let source = SourceSettings {
            base_url: require_env("IDENTITY_BASE_URL")?,
            api_token: require_env("IDENTITY_API_TOKEN")?,
        };

        let config = Self { credential, pool, source };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SourceError> {
        if self.pool.min_connections < 1 {
            return Err(SourceError::InvalidConfiguration(
                "pool min_connections must be at least 1".to_string(),
            ));
        }
        if self.pool.min_connections > self.pool.max_connections {
            return Err(SourceError::InvalidConfiguration(format!(
                "pool min_connections ({}) exceeds max_connections ({})",
                self.pool.min_connections, self.pool.max_connections
            )));
        }
        if self.credential.ttl.is_zero() {
            return Err(SourceError::InvalidConfiguration(
                "credential TTL must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn require_env(name: &'static str) -> Result<String, SourceError> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(SourceError::NotConfigured(name)),
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u32(name: &str, default: u32) -> u32 {
    env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
