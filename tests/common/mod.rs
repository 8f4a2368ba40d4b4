// Shared test doubles for the credential cache and pool manager suites.
// Each integration test binary compiles its own copy, so not every item
// is used by every suite.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;

use credpool::config::{CredentialSettings, PoolSettings};
use credpool::credentials::cache::CredentialCache;
use credpool::credentials::credential::Credential;
use credpool::credentials::source::{CredentialSource, IssuedCredential};
use credpool::error::{PoolError, SourceError};
use credpool::pool::factory::ConnectionFactory;
use credpool::pool::manager::PoolManager;

static TRACING: Lazy<()> = Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("credpool=debug")
        .with_test_writer()
        .try_init();
});

pub fn init_tracing() {
    Lazy::force(&TRACING);
}

/// Scripted credential source: counts issuances, can fail or stall on demand
pub struct ScriptedSource {
    issued: AtomicU32,
    fail_next: AtomicBool,
    delay: Option<Duration>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self {
            issued: AtomicU32::new(0),
            fail_next: AtomicBool::new(false),
            delay: None,
        }
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::new()
        }
    }

    pub fn issued(&self) -> u32 {
        self.issued.load(Ordering::SeqCst)
    }

    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl CredentialSource for ScriptedSource {
    async fn issue(
        &self,
        _instance_name: &str,
        _principal: &str,
    ) -> Result<IssuedCredential, SourceError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(SourceError::IssuanceFailed("upstream unavailable".to_string()));
        }
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(IssuedCredential {
            host: "db.internal.test".to_string(),
            port: 5432,
            secret_token: format!("token-{}", n),
            expires_hint: None,
        })
    }
}

/// In-memory physical connection; counts its own destruction
pub struct MemoryConn {
    pub id: u32,
    pub secret: String,
    destroyed: Arc<AtomicU32>,
}

impl Drop for MemoryConn {
    fn drop(&mut self) {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
    }
}

/// In-memory connection factory: counts connects and closes, can refuse
/// connections on demand. Clones share counters.
#[derive(Clone)]
pub struct MemoryFactory {
    connects: Arc<AtomicU32>,
    disconnects: Arc<AtomicU32>,
    destroyed: Arc<AtomicU32>,
    refuse: Arc<AtomicBool>,
    next_id: Arc<AtomicU32>,
}

impl MemoryFactory {
    pub fn new() -> Self {
        Self {
            connects: Arc::new(AtomicU32::new(0)),
            disconnects: Arc::new(AtomicU32::new(0)),
            destroyed: Arc::new(AtomicU32::new(0)),
            refuse: Arc::new(AtomicBool::new(false)),
            next_id: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn connects(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> u32 {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn destroyed(&self) -> u32 {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }
}

#[async_trait]
impl ConnectionFactory for MemoryFactory {
    type Conn = MemoryConn;

    async fn connect(&self, credential: &Credential) -> Result<MemoryConn, PoolError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(PoolError::Construction("connection refused".to_string()));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(MemoryConn {
            id,
            secret: credential.descriptor().secret.clone(),
            destroyed: Arc::clone(&self.destroyed),
        })
    }

    async fn disconnect(&self, conn: MemoryConn) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        drop(conn);
    }
}

pub fn credential_settings(ttl: Duration) -> CredentialSettings {
    CredentialSettings {
        instance_name: "tours-primary".to_string(),
        principal: "app-backend".to_string(),
        database_name: "tours".to_string(),
        ttl,
        issue_timeout: Duration::from_secs(5),
    }
}

pub fn pool_settings(min: u32, max: u32) -> PoolSettings {
    PoolSettings {
        min_connections: min,
        max_connections: max,
        checkout_timeout: Duration::from_millis(250),
    }
}

/// Wired-together cache + manager over the in-memory doubles
pub struct Rig {
    pub source: Arc<ScriptedSource>,
    pub factory: MemoryFactory,
    pub cache: Arc<CredentialCache>,
    pub manager: Arc<PoolManager<MemoryFactory>>,
}

pub fn rig(ttl: Duration, min: u32, max: u32) -> Rig {
    init_tracing();
    let source = Arc::new(ScriptedSource::new());
    let factory = MemoryFactory::new();
    let cache = Arc::new(CredentialCache::new(
        source.clone(),
        credential_settings(ttl),
    ));
    let manager = Arc::new(PoolManager::new(
        factory.clone(),
        Arc::clone(&cache),
        pool_settings(min, max),
    ));
    Rig {
        source,
        factory,
        cache,
        manager,
    }
}
