use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use transit_core::{
    BackendError, BackendResult, BookingBackend, CardChargeRequest, CardChargeResponse, Passenger, PassengerDraft,
    ReferenceKind, ReferenceOption, ReservationRequest, TripOccurrence,
};
use uuid::Uuid;

use crate::app_config::Config;
use crate::credentials::{CredentialProvider, RefreshingCredentials, StaticCredentials};

/// Sends JSON requests with a bearer token. A 401 triggers one credential
/// renewal and one retry; a failed renewal or a second 401 surfaces as
/// `SessionExpired`.
#[derive(Clone)]
pub struct AuthenticatedClient {
    http: Client,
    base_url: String,
    credentials: Arc<dyn CredentialProvider>,
}

impl AuthenticatedClient {
    pub fn new(http: Client, base_url: impl Into<String>, credentials: Arc<dyn CredentialProvider>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn send_json<T, F>(&self, build: F) -> BackendResult<T>
    where
        T: DeserializeOwned,
        F: Fn(&Client) -> RequestBuilder,
    {
        let response = self.attempt(&build).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return decode(response).await;
        }

        tracing::warn!("Backend answered 401, renewing credentials");
        self.credentials.renew().await.map_err(|_| BackendError::SessionExpired)?;

        let retried = self.attempt(&build).await?;
        if retried.status() == StatusCode::UNAUTHORIZED {
            tracing::warn!("Backend still answers 401 after renewal");
            return Err(BackendError::SessionExpired);
        }
        decode(retried).await
    }

    async fn attempt<F>(&self, build: &F) -> BackendResult<Response>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let mut request = build(&self.http);
        if let Some(token) = self.credentials.current().await {
            request = request.bearer_auth(token);
        }
        request.send().await.map_err(|e| BackendError::Transport(e.to_string()))
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(alias = "error")]
    message: String,
}

async fn decode<T: DeserializeOwned>(response: Response) -> BackendResult<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .map(|b| b.message)
            .unwrap_or(body);
        tracing::error!("Backend rejected request: {} {}", status.as_u16(), message);
        return Err(BackendError::Rejected {
            status: status.as_u16(),
            message,
        });
    }

    response.json::<T>().await.map_err(|e| BackendError::Decode(e.to_string()))
}

/// Lets the backend recognise a retried write and answer with the first result
const IDEMPOTENCY_KEY: &str = "Idempotency-Key";

#[derive(Deserialize)]
struct Created {
    id: Uuid,
}

/// `BookingBackend` over the reservation service's HTTP API
#[derive(Clone)]
pub struct HttpBookingBackend {
    client: AuthenticatedClient,
}

impl HttpBookingBackend {
    pub fn new(client: AuthenticatedClient) -> Self {
        Self { client }
    }

    pub fn from_config(config: &Config) -> BackendResult<Self> {
        let http = Client::builder()
            .timeout(config.backend.timeout())
            .build()
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        let credentials: Arc<dyn CredentialProvider> = match &config.auth.refresh_token {
            Some(refresh_token) => Arc::new(RefreshingCredentials::new(
                http.clone(),
                format!(
                    "{}{}",
                    config.backend.base_url.trim_end_matches('/'),
                    config.auth.refresh_path
                ),
                config.auth.access_token.clone(),
                refresh_token.clone(),
            )),
            None => Arc::new(StaticCredentials::new(config.auth.access_token.clone())),
        };

        tracing::info!("Reservation backend at {}", config.backend.base_url);
        Ok(Self::new(AuthenticatedClient::new(
            http,
            config.backend.base_url.clone(),
            credentials,
        )))
    }
}

#[async_trait]
impl BookingBackend for HttpBookingBackend {
    async fn search_passengers(&self, query: &str) -> BackendResult<Vec<Passenger>> {
        let url = self.client.url("/passengers");
        self.client
            .send_json(|http| http.get(&url).query(&[("search", query)]))
            .await
    }

    async fn create_passenger(&self, draft: &PassengerDraft) -> BackendResult<Uuid> {
        let url = self.client.url("/passengers");
        let created: Created = self.client.send_json(|http| http.post(&url).json(draft)).await?;
        Ok(created.id)
    }

    async fn list_trip_occurrences(&self, date: NaiveDate) -> BackendResult<Vec<TripOccurrence>> {
        let url = self.client.url("/trip-occurrences");
        let date = date.format("%Y-%m-%d").to_string();
        self.client
            .send_json(|http| http.get(&url).query(&[("date", date.as_str())]))
            .await
    }

    async fn create_reservation(&self, request: &ReservationRequest) -> BackendResult<Uuid> {
        let url = self.client.url("/reservations");
        let key = request.idempotency_key.to_string();
        tracing::debug!("POST /reservations with {} item(s), key {}", request.items.len(), key);
        let created: Created = self
            .client
            .send_json(|http| http.post(&url).header(IDEMPOTENCY_KEY, &key).json(request))
            .await?;
        Ok(created.id)
    }

    async fn charge_card(&self, request: &CardChargeRequest) -> BackendResult<CardChargeResponse> {
        let url = self.client.url("/checkout/card");
        let key = request.idempotency_key.to_string();
        self.client
            .send_json(|http| http.post(&url).header(IDEMPOTENCY_KEY, &key).json(request))
            .await
    }

    async fn list_reference_options(&self, kind: ReferenceKind) -> BackendResult<Vec<ReferenceOption>> {
        let url = self.client.url(&format!("/references/{}", kind.path_segment()));
        self.client.send_json(|http| http.get(&url)).await
    }
}
