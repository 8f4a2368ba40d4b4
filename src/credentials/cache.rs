use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::CredentialSettings;
use crate::credentials::credential::{ConnectionDescriptor, Credential};
use crate::credentials::source::CredentialSource;
use crate::error::SourceError;

/// Read-only snapshot of the cache state
#[derive(Debug, Clone, Serialize)]
pub struct CredentialStats {
    pub credential_cached: bool,
    pub credential_active: bool,
    pub ttl_minutes: f64,
    pub expires_at: Option<DateTime<Utc>>,
    pub issued_at: Option<DateTime<Utc>>,
}

/// Caches at most one shared credential and regenerates it at most once
/// at a time. Staleness is checked on every access under the slot lock;
/// there is no background refresh timer.
pub struct CredentialCache {
    source: Arc<dyn CredentialSource>,
    settings: CredentialSettings,
    slot: Mutex<Option<Credential>>,
}

impl CredentialCache {
    pub fn new(source: Arc<dyn CredentialSource>, settings: CredentialSettings) -> Self {
        info!(
            "Initialized credential cache with {}min TTL",
            settings.ttl.as_secs() / 60
        );
        Self {
            source,
            settings,
            slot: Mutex::new(None),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.settings.ttl
    }

    /// Return the cached credential, regenerating it first if missing or
    /// expired. Contending callers block on the slot lock until the single
    /// in-flight regeneration completes, so the source is invoked at most
    /// once per TTL window.
    pub async fn get(&self) -> Result<Credential, SourceError> {
        let mut slot = self.slot.lock().await;
        let now = Utc::now();

        if let Some(credential) = slot.as_ref() {
            if !credential.is_expired_at(now) {
                debug!("Using cached shared credential");
                return Ok(credential.clone());
            }
        }

        info!("Generating fresh shared credential");
        match self.regenerate(now).await {
            Ok(credential) => {
                *slot = Some(credential.clone());
                info!(
                    "Cached new shared credential (expires in {:.1} minutes)",
                    self.settings.ttl.as_secs_f64() / 60.0
                );
                Ok(credential)
            }
            Err(e) => {
                // An expired leftover must not linger after a failed refresh;
                // the caller retries against an empty slot
                *slot = None;
                Err(e)
            }
        }
    }

    async fn regenerate(&self, now: DateTime<Utc>) -> Result<Credential, SourceError> {
        let issued = tokio::time::timeout(
            self.settings.issue_timeout,
            self.source
                .issue(&self.settings.instance_name, &self.settings.principal),
        )
        .await
        .map_err(|_| SourceError::Timeout(self.settings.issue_timeout))??;

        if issued.host.is_empty() || issued.secret_token.is_empty() {
            return Err(SourceError::Incomplete);
        }

        let expires_at = now + chrono::Duration::seconds(self.settings.ttl.as_secs() as i64);
        if let Some(hint) = issued.expires_hint {
            if hint < expires_at {
                warn!(
                    "Identity service reports expiry {} ahead of the configured TTL window ending {}",
                    hint, expires_at
                );
            }
        }

        Ok(Credential::new(
            ConnectionDescriptor {
                host: issued.host,
                port: issued.port,
                principal: self.settings.principal.clone(),
                secret: issued.secret_token,
                database: self.settings.database_name.clone(),
                require_tls: true,
            },
            now,
            expires_at,
            Uuid::new_v4(),
        ))
    }

    /// Drop the cached credential unconditionally; the next `get`
    /// regenerates regardless of remaining TTL. Reports whether a
    /// credential had been present.
    pub async fn invalidate(&self) -> bool {
        let mut slot = self.slot.lock().await;
        if slot.take().is_some() {
            info!("Invalidated shared credential");
            true
        } else {
            false
        }
    }

    /// Snapshot under the same lock as `get`; never triggers regeneration
    pub async fn stats(&self) -> CredentialStats {
        let slot = self.slot.lock().await;
        let now = Utc::now();
        CredentialStats {
            credential_cached: slot.is_some(),
            credential_active: slot.as_ref().is_some_and(|c| !c.is_expired_at(now)),
            ttl_minutes: self.settings.ttl.as_secs_f64() / 60.0,
            expires_at: slot.as_ref().map(|c| c.expires_at()),
            issued_at: slot.as_ref().map(|c| c.issued_at()),
        }
    }
}
