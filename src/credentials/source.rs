use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::config::SourceSettings;
use crate::error::SourceError;

/// Raw credential material returned by the identity service
#[derive(Debug, Clone)]
pub struct IssuedCredential {
    pub host: String,
    pub port: u16,
    pub secret_token: String,
    pub expires_hint: Option<DateTime<Utc>>,
}

/// Issues a time-limited database credential for a named instance.
/// The dominant failure mode of the whole subsystem lives behind this trait.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn issue(
        &self,
        instance_name: &str,
        principal: &str,
    ) -> Result<IssuedCredential, SourceError>;
}

/// REST client for the identity service fronting managed database instances.
/// Issuance is two calls: look up the instance to learn its read-write
/// hostname, then mint a short-lived token for it.
pub struct HttpCredentialSource {
    client: reqwest::Client,
    base_url: String,
    api_token: String,
}

#[derive(Debug, Deserialize)]
struct InstanceResponse {
    read_write_dns: String,
    #[serde(default)]
    port: Option<u16>,
}

#[derive(Debug, Deserialize)]
struct CredentialResponse {
    token: String,
    #[serde(default)]
    expiration_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
struct CredentialRequest<'a> {
    request_id: String,
    instance_names: [&'a str; 1],
    principal: &'a str,
}

impl HttpCredentialSource {
    pub fn new(settings: &SourceSettings) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_token: settings.api_token.clone(),
        }
    }

    async fn check_status(
        response: reqwest::Response,
        action: &str,
    ) -> Result<reqwest::Response, SourceError> {
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        // Error bodies are JSON with a message field; fall back to raw text
        let detail = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(String::from))
            .unwrap_or(body);
        Err(SourceError::IssuanceFailed(format!(
            "{} returned {}: {}",
            action, status, detail
        )))
    }
}

#[async_trait]
impl CredentialSource for HttpCredentialSource {
    async fn issue(
        &self,
        instance_name: &str,
        principal: &str,
    ) -> Result<IssuedCredential, SourceError> {
        let instance_url = format!(
            "{}/api/2.0/database/instances/{}",
            self.base_url, instance_name
        );
        let response = self
            .client
            .get(&instance_url)
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(|e| SourceError::IssuanceFailed(format!("instance lookup failed: {}", e)))?;
        let response = Self::check_status(response, "instance lookup").await?;
        let instance: InstanceResponse = response
            .json()
            .await
            .map_err(|e| SourceError::IssuanceFailed(format!("invalid instance response: {}", e)))?;

        let request_id = Uuid::new_v4();
        let request = CredentialRequest {
            request_id: request_id.to_string(),
            instance_names: [instance_name],
            principal,
        };
        let response = self
            .client
            .post(format!("{}/api/2.0/database/credentials", self.base_url))
            .bearer_auth(&self.api_token)
            .json(&request)
            .send()
            .await
            .map_err(|e| SourceError::IssuanceFailed(format!("credential mint failed: {}", e)))?;
        let response = Self::check_status(response, "credential mint").await?;
        let credential: CredentialResponse = response
            .json()
            .await
            .map_err(|e| SourceError::IssuanceFailed(format!("invalid credential response: {}", e)))?;

        debug!(
            "Issued database credential for instance {} (request {})",
            instance_name, request_id
        );

        Ok(IssuedCredential {
            host: instance.read_write_dns,
            port: instance.port.unwrap_or(5432),
            secret_token: credential.token,
            expires_hint: credential.expiration_time,
        })
    }
}
