use std::sync::Arc;

use serde::Serialize;
use sqlx::{Connection, PgConnection};
use tracing::info;

use crate::config::DbConfig;
use crate::credentials::cache::{CredentialCache, CredentialStats};
use crate::credentials::source::HttpCredentialSource;
use crate::error::{ErrorClass, PoolError, SourceError};
use crate::pool::factory::PgFactory;
use crate::pool::inner::PooledConnection;
use crate::pool::manager::{PoolManager, PoolStats};

/// Combined snapshot of the credential cache and the pool
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStats {
    pub credentials: CredentialStats,
    pub pool: PoolStats,
}

/// Construct-once service owning the credential cache and the managed
/// pool. Built at process start and handed to request handlers by `Arc`;
/// these methods are the only operations the HTTP layer calls.
pub struct ManagedDatabase {
    credentials: Arc<CredentialCache>,
    pool: PoolManager<PgFactory>,
}

impl ManagedDatabase {
    /// Build from environment configuration (`.env` honored)
    pub fn from_env() -> Result<Self, SourceError> {
        Self::new(DbConfig::from_env()?)
    }

    pub fn new(config: DbConfig) -> Result<Self, SourceError> {
        config.validate()?;
        let source = HttpCredentialSource::new(&config.source);
        let credentials = Arc::new(CredentialCache::new(Arc::new(source), config.credential));
        let pool = PoolManager::new(PgFactory, Arc::clone(&credentials), config.pool);
        Ok(Self { credentials, pool })
    }

    /// Scoped acquisition: the connection returns to the pool when the
    /// handle drops, on success and error paths alike
    pub async fn acquire(&self) -> Result<PooledConnection<PgConnection>, PoolError> {
        self.pool.acquire().await
    }

    /// Classify an error raised while a connection was in use; see
    /// [`PoolManager::report_failure`]
    pub async fn report_failure(&self, err: &(dyn std::error::Error + 'static)) -> ErrorClass {
        self.pool.report_failure(err).await
    }

    pub async fn invalidate_credentials(&self) -> bool {
        self.credentials.invalidate().await
    }

    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
        info!("Managed database shut down");
    }

    pub async fn stats(&self) -> ServiceStats {
        ServiceStats {
            credentials: self.credentials.stats().await,
            pool: self.pool.stats().await,
        }
    }

    /// Acquire a connection and ping it. Failures run through the
    /// classification step, so an authentication failure during a health
    /// probe also resets credential and pool state.
    pub async fn health_check(&self) -> Result<(), PoolError> {
        let mut conn = self.pool.acquire().await?;
        match conn.ping().await {
            Ok(()) => Ok(()),
            Err(e) => {
                let class = self.pool.report_failure(&e).await;
                Err(match class {
                    ErrorClass::Authentication => PoolError::Authentication(e.to_string()),
                    _ => PoolError::Unavailable(format!("health ping failed: {}", e)),
                })
            }
        }
    }
}
