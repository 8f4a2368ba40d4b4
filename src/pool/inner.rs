use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::credentials::credential::Credential;
use crate::error::PoolError;
use crate::pool::factory::ConnectionFactory;

/// One generation of physical connections, all opened with the credential
/// that was current at pool-creation time. Replaced wholesale when stale;
/// never patched in place.
pub(crate) struct PoolInner<C> {
    credential: Credential,
    idle: Mutex<Vec<C>>,
    permits: Arc<Semaphore>,
    borrowed: AtomicU32,
    retired: AtomicBool,
    created_at: Instant,
    created_wall: DateTime<Utc>,
    generation: u64,
}

impl<C: Send + 'static> PoolInner<C> {
    /// Open `min` connections eagerly. On any failure close what was
    /// already opened and report construction failure; the pool stays absent.
    pub(crate) async fn build<F>(
        factory: &F,
        credential: Credential,
        min: u32,
        max: u32,
        generation: u64,
    ) -> Result<Self, PoolError>
    where
        F: ConnectionFactory<Conn = C>,
    {
        let mut idle = Vec::with_capacity(min as usize);
        for _ in 0..min {
            match factory.connect(&credential).await {
                Ok(conn) => idle.push(conn),
                Err(e) => {
                    for conn in idle.drain(..) {
                        factory.disconnect(conn).await;
                    }
                    return Err(e);
                }
            }
        }

        debug!(
            "Created pool generation {} with {} connections",
            generation, min
        );

        Ok(Self {
            credential,
            idle: Mutex::new(idle),
            permits: Arc::new(Semaphore::new(max as usize)),
            borrowed: AtomicU32::new(0),
            retired: AtomicBool::new(false),
            created_at: Instant::now(),
            created_wall: Utc::now(),
            generation,
        })
    }

    pub(crate) fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub(crate) fn created_wall(&self) -> DateTime<Utc> {
        self.created_wall
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn borrowed(&self) -> u32 {
        self.borrowed.load(Ordering::SeqCst)
    }

    fn lock_idle(&self) -> MutexGuard<'_, Vec<C>> {
        match self.idle.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Check out one connection, waiting on the max-size bound. Opens a
    /// new connection when the idle set is empty and the bound allows it.
    pub(crate) async fn checkout<F>(
        self: &Arc<Self>,
        factory: &F,
        timeout: Duration,
    ) -> Result<PooledConnection<C>, PoolError>
    where
        F: ConnectionFactory<Conn = C>,
    {
        let permit = tokio::time::timeout(timeout, self.permits.clone().acquire_owned())
            .await
            .map_err(|_| {
                PoolError::Unavailable(format!("no connection available within {:?}", timeout))
            })?
            .map_err(|_| PoolError::Unavailable("pool semaphore closed".to_string()))?;

        let existing = self.lock_idle().pop();
        let conn = match existing {
            Some(conn) => conn,
            // Permit drops on error, releasing the slot
            None => factory.connect(&self.credential).await?,
        };

        self.borrowed.fetch_add(1, Ordering::SeqCst);
        debug!(
            "Checked out connection from pool generation {}",
            self.generation
        );

        Ok(PooledConnection {
            conn: Some(conn),
            pool: Arc::clone(self),
            _permit: permit,
        })
    }

    /// Take back a connection previously checked out from this pool. A
    /// connection returned after the pool was retired is dropped, never
    /// adopted by a newer pool.
    fn restore(&self, conn: C) {
        self.borrowed.fetch_sub(1, Ordering::SeqCst);
        let mut idle = self.lock_idle();
        if self.retired.load(Ordering::SeqCst) {
            drop(idle);
            drop(conn);
            debug!(
                "Dropped connection returned to retired pool generation {}",
                self.generation
            );
        } else {
            idle.push(conn);
            debug!(
                "Returned connection to pool generation {}",
                self.generation
            );
        }
    }

    /// Close every idle connection and mark the pool retired. Connections
    /// still out with callers are closed as their handles drop.
    pub(crate) async fn retire<F>(&self, factory: &F)
    where
        F: ConnectionFactory<Conn = C>,
    {
        let drained: Vec<C> = {
            let mut idle = self.lock_idle();
            // Flag flips under the idle lock so late returns observe it
            self.retired.store(true, Ordering::SeqCst);
            idle.drain(..).collect()
        };

        for conn in drained {
            factory.disconnect(conn).await;
        }

        debug!("Closed pool generation {}", self.generation);
    }
}

/// Scoped handle to one physical connection. The connection goes back to
/// its originating pool when the handle drops, on every exit path.
pub struct PooledConnection<C: Send + 'static> {
    conn: Option<C>,
    pool: Arc<PoolInner<C>>,
    _permit: OwnedSemaphorePermit,
}

impl<C: Send + 'static> PooledConnection<C> {
    /// Generation of the pool this connection was checked out from
    pub fn pool_generation(&self) -> u64 {
        self.pool.generation()
    }
}

impl<C: Send + 'static> Deref for PooledConnection<C> {
    type Target = C;

    fn deref(&self) -> &C {
        self.conn.as_ref().expect("connection present until drop")
    }
}

impl<C: Send + 'static> DerefMut for PooledConnection<C> {
    fn deref_mut(&mut self) -> &mut C {
        self.conn.as_mut().expect("connection present until drop")
    }
}

impl<C: Send + 'static> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.restore(conn);
        }
    }
}
