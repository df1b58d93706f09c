use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use transit_core::BackendError;
use transit_shared::pii::Masked;

/// Supplies the bearer token attached to backend calls
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn current(&self) -> Option<String>;

    /// Obtain a fresh access token. Any failure means the session is over.
    async fn renew(&self) -> Result<(), BackendError>;
}

/// A fixed token that cannot be renewed
pub struct StaticCredentials {
    token: Option<Masked<String>>,
}

impl StaticCredentials {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Some(Masked(token.into())),
        }
    }

    pub fn anonymous() -> Self {
        Self { token: None }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn current(&self) -> Option<String> {
        self.token.as_ref().map(|t| t.expose().clone())
    }

    async fn renew(&self) -> Result<(), BackendError> {
        tracing::warn!("Static credentials cannot be renewed");
        Err(BackendError::SessionExpired)
    }
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Deserialize)]
struct RefreshResponse {
    access_token: String,
}

/// Access token plus a refresh token exchanged at `refresh_url` when the
/// backend answers 401
pub struct RefreshingCredentials {
    http: Client,
    refresh_url: String,
    refresh_token: Masked<String>,
    access_token: RwLock<Masked<String>>,
}

impl RefreshingCredentials {
    pub fn new(
        http: Client,
        refresh_url: impl Into<String>,
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
    ) -> Self {
        Self {
            http,
            refresh_url: refresh_url.into(),
            refresh_token: Masked(refresh_token.into()),
            access_token: RwLock::new(Masked(access_token.into())),
        }
    }
}

#[async_trait]
impl CredentialProvider for RefreshingCredentials {
    async fn current(&self) -> Option<String> {
        Some(self.access_token.read().await.expose().clone())
    }

    async fn renew(&self) -> Result<(), BackendError> {
        let response = self
            .http
            .post(&self.refresh_url)
            .json(&RefreshRequest {
                refresh_token: self.refresh_token.expose(),
            })
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Credential renewal failed: {}", e);
                BackendError::SessionExpired
            })?;

        if !response.status().is_success() {
            tracing::warn!("Credential renewal refused with {}", response.status());
            return Err(BackendError::SessionExpired);
        }

        let renewed: RefreshResponse = response.json().await.map_err(|e| {
            tracing::error!("Unreadable renewal response: {}", e);
            BackendError::SessionExpired
        })?;

        *self.access_token.write().await = Masked(renewed.access_token);
        tracing::info!("Access token renewed");
        Ok(())
    }
}
