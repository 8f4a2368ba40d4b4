use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::PoolSettings;
use crate::credentials::cache::CredentialCache;
use crate::error::{classify, ErrorClass, PoolError};
use crate::pool::factory::ConnectionFactory;
use crate::pool::inner::{PoolInner, PooledConnection};

/// Pool age, as a fraction of the credential TTL, at which the pool is
/// rebuilt ahead of actual credential expiry
const REBUILD_AFTER_TTL_FRACTION: f64 = 0.9;

#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub pool_exists: bool,
    pub pool_created_at: Option<DateTime<Utc>>,
    pub min_connections: u32,
    pub max_connections: u32,
    pub borrowed: u32,
    pub generation: u64,
}

struct PoolSlot<C> {
    current: Option<Arc<PoolInner<C>>>,
    generation: u64,
    shut_down: bool,
}

/// Owns the shared pool and rebuilds it lazily when its credential nears
/// expiry. Pool-metadata decisions happen under one lock; connection
/// checkout happens outside it so waiting on a free connection does not
/// block other callers' rebuild decisions. There is no background timer:
/// an idle period simply defers rebuild cost to the next request.
pub struct PoolManager<F: ConnectionFactory> {
    factory: F,
    credentials: Arc<CredentialCache>,
    settings: PoolSettings,
    slot: Mutex<PoolSlot<F::Conn>>,
}

impl<F: ConnectionFactory> PoolManager<F> {
    pub fn new(factory: F, credentials: Arc<CredentialCache>, settings: PoolSettings) -> Self {
        info!(
            "Initialized connection pool manager (min={}, max={})",
            settings.min_connections, settings.max_connections
        );
        Self {
            factory,
            credentials,
            settings,
            slot: Mutex::new(PoolSlot {
                current: None,
                generation: 0,
                shut_down: false,
            }),
        }
    }

    fn rebuild_due(&self, slot: &PoolSlot<F::Conn>) -> bool {
        match slot.current.as_ref() {
            None => true,
            Some(pool) => {
                pool.age() >= self.credentials.ttl().mul_f64(REBUILD_AFTER_TTL_FRACTION)
            }
        }
    }

    /// Check out one connection, rebuilding the pool first when it is
    /// absent or has outlived the safety margin of its credential's TTL.
    /// Rebuild is at-most-one-concurrent: contending callers wait on the
    /// slot lock and find the fresh pool already in place.
    pub async fn acquire(&self) -> Result<PooledConnection<F::Conn>, PoolError> {
        let pool = {
            let mut slot = self.slot.lock().await;
            if slot.shut_down {
                return Err(PoolError::Shutdown);
            }

            if self.rebuild_due(&slot) {
                if let Some(old) = slot.current.take() {
                    info!(
                        "Retiring pool generation {} after {:?}",
                        old.generation(),
                        old.age()
                    );
                    old.retire(&self.factory).await;
                }

                let credential = self.credentials.get().await?;
                let generation = slot.generation + 1;
                let pool = PoolInner::build(
                    &self.factory,
                    credential,
                    self.settings.min_connections,
                    self.settings.max_connections,
                    generation,
                )
                .await?;
                slot.generation = generation;
                slot.current = Some(Arc::new(pool));
                info!("Created shared connection pool generation {}", generation);
            }

            match slot.current.as_ref() {
                Some(pool) => Arc::clone(pool),
                None => {
                    return Err(PoolError::Unavailable(
                        "pool missing after rebuild".to_string(),
                    ))
                }
            }
        };

        pool.checkout(&self.factory, self.settings.checkout_timeout)
            .await
    }

    /// Classify a failure observed while a connection was in use. An
    /// authentication-class failure clears both the credential cache and
    /// the current pool so the next acquisition starts from a clean slate;
    /// the error itself still propagates to the current caller.
    pub async fn report_failure(&self, err: &(dyn std::error::Error + 'static)) -> ErrorClass {
        let class = classify(err);
        if class == ErrorClass::Authentication {
            warn!(
                "Invalidating shared credential after authentication failure: {}",
                err
            );
            self.credentials.invalidate().await;
            self.discard_pool().await;
        }
        class
    }

    async fn discard_pool(&self) {
        let mut slot = self.slot.lock().await;
        if let Some(old) = slot.current.take() {
            old.retire(&self.factory).await;
        }
    }

    /// Close every connection and refuse further acquisitions. Idempotent.
    pub async fn shutdown(&self) {
        let mut slot = self.slot.lock().await;
        if let Some(old) = slot.current.take() {
            old.retire(&self.factory).await;
        }
        if !slot.shut_down {
            slot.shut_down = true;
            info!("Shut down shared connection pool");
        }
    }

    /// Snapshot under the slot lock; never triggers a rebuild
    pub async fn stats(&self) -> PoolStats {
        let slot = self.slot.lock().await;
        PoolStats {
            pool_exists: slot.current.is_some(),
            pool_created_at: slot.current.as_ref().map(|p| p.created_wall()),
            min_connections: self.settings.min_connections,
            max_connections: self.settings.max_connections,
            borrowed: slot.current.as_ref().map(|p| p.borrowed()).unwrap_or(0),
            generation: slot.generation,
        }
    }
}
