use async_trait::async_trait;
use sqlx::{Connection, PgConnection};
use tracing::warn;

use crate::credentials::credential::Credential;
use crate::error::PoolError;

/// Opens and closes physical database connections on behalf of the pool.
/// The seam that lets tests and alternative drivers stand in for Postgres.
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    type Conn: Send + 'static;

    async fn connect(&self, credential: &Credential) -> Result<Self::Conn, PoolError>;

    /// Best-effort close; implementations log failures, never surface them
    async fn disconnect(&self, conn: Self::Conn);
}

/// Production factory backed by individual sqlx Postgres connections
pub struct PgFactory;

#[async_trait]
impl ConnectionFactory for PgFactory {
    type Conn = PgConnection;

    async fn connect(&self, credential: &Credential) -> Result<PgConnection, PoolError> {
        let url = credential
            .connection_url()
            .map_err(|e| PoolError::Construction(format!("invalid connection URL: {}", e)))?;
        PgConnection::connect(&url).await.map_err(|e| {
            PoolError::Construction(format!(
                "connect to {} failed: {}",
                credential.descriptor().host,
                e
            ))
        })
    }

    async fn disconnect(&self, conn: PgConnection) {
        if let Err(e) = conn.close().await {
            warn!("Error closing database connection: {}", e);
        }
    }
}
