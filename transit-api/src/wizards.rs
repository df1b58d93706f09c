use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use transit_booking::{
    CardPayment, CheckoutOutcome, CommitReceipt, LegDetails, ReturnLegDetails, SearchOutcome, SessionSummary,
    WizardError, WizardStep,
};
use transit_core::{BookingBackend, Passenger, PassengerDraft, PaymentEntry, PaymentMethod};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::{AppState, WizardHandle};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/wizards", post(open_wizard))
        .route("/v1/wizards/{id}", get(get_wizard).delete(cancel_wizard))
        .route("/v1/wizards/{id}/references", post(load_references))
        .route("/v1/wizards/{id}/passengers", get(search_passengers))
        .route("/v1/wizards/{id}/passenger", post(choose_passenger))
        .route("/v1/wizards/{id}/details", post(submit_details))
        .route("/v1/wizards/{id}/return-date", post(change_return_date))
        .route("/v1/wizards/{id}/return-trip", post(select_return_trip))
        .route("/v1/wizards/{id}/payment-options", post(payment_options))
        .route("/v1/wizards/{id}/payments", post(add_payment))
        .route("/v1/wizards/{id}/payments/{index}", delete(remove_payment))
        .route("/v1/wizards/{id}/reauthenticated", post(reauthenticated))
        .route("/v1/wizards/{id}/commit", post(commit))
        .route("/v1/wizards/{id}/checkout", post(checkout))
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct OpenWizardRequest {
    pub trip_occurrence_id: Uuid,
    pub date: NaiveDate,
}

#[derive(Debug, Serialize)]
pub struct WizardView {
    pub wizard_id: Uuid,
    pub step: Option<WizardStep>,
    pub session: Option<SessionSummary>,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub search: String,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub superseded: bool,
    pub passengers: Vec<Passenger>,
}

/// Either an existing passenger or the fields to create one
#[derive(Debug, Deserialize)]
pub struct ChoosePassengerRequest {
    pub passenger: Option<Passenger>,
    pub new_passenger: Option<PassengerDraft>,
}

#[derive(Debug, Deserialize)]
pub struct ReturnDateRequest {
    pub date: NaiveDate,
}

#[derive(Debug, Deserialize)]
pub struct PaymentOptionsRequest {
    pub collect_payment: Option<bool>,
    pub default_method: Option<PaymentMethod>,
}

#[derive(Debug, Deserialize)]
pub struct AddPaymentRequest {
    pub method: PaymentMethod,
    pub amount_cents: i64,
}

#[derive(Debug, Serialize)]
pub struct RemovedPaymentResponse {
    pub removed: PaymentEntry,
    pub remaining_cents: i64,
}

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    #[serde(flatten)]
    pub outcome: CheckoutOutcome,
    pub wizard: WizardView,
}

// ============================================================================
// Handlers
// ============================================================================

async fn handle(state: &AppState, id: Uuid) -> Result<Arc<WizardHandle>, AppError> {
    state
        .wizard(id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("No wizard {}", id)))
}

async fn view(id: Uuid, handle: &WizardHandle) -> WizardView {
    let wizard = handle.wizard.lock().await;
    WizardView {
        wizard_id: id,
        step: wizard.step(),
        session: wizard.summary().ok(),
    }
}

/// Runs a backend round-trip and the wizard update that follows it on its own
/// task. A client that hangs up mid-call does not cancel it, so the session
/// never stays marked as submitting.
async fn detached<T, F>(work: F) -> Result<T, AppError>
where
    T: Send + 'static,
    F: Future<Output = Result<T, WizardError>> + Send + 'static,
{
    let joined = tokio::spawn(work).await.map_err(anyhow::Error::from)?;
    Ok(joined?)
}

/// POST /v1/wizards
/// Open a wizard for one departure
async fn open_wizard(
    State(state): State<AppState>,
    Json(req): Json<OpenWizardRequest>,
) -> Result<(StatusCode, Json<WizardView>), AppError> {
    let outbound = state
        .selector
        .find(req.date, req.trip_occurrence_id)
        .await?
        .ok_or_else(|| {
            AppError::NotFound(format!(
                "Trip {} does not depart on {}",
                req.trip_occurrence_id, req.date
            ))
        })?;

    let id = Uuid::new_v4();
    let handle = Arc::new(state.new_wizard());
    handle.wizard.lock().await.open(outbound);
    state.wizards.write().await.insert(id, handle.clone());
    tracing::info!("Wizard {} opened", id);

    Ok((StatusCode::CREATED, Json(view(id, &handle).await)))
}

/// GET /v1/wizards/{id}
async fn get_wizard(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<WizardView>, AppError> {
    let handle = handle(&state, id).await?;
    Ok(Json(view(id, &handle).await))
}

/// DELETE /v1/wizards/{id}
/// Always succeeds for a known wizard; in-flight calls finish in the background
async fn cancel_wizard(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<StatusCode, AppError> {
    let handle = state
        .wizards
        .write()
        .await
        .remove(&id)
        .ok_or_else(|| AppError::NotFound(format!("No wizard {}", id)))?;
    handle.wizard.lock().await.cancel();
    Ok(StatusCode::NO_CONTENT)
}

/// POST /v1/wizards/{id}/references
/// Snapshot the address and payment-method lists into the session
async fn load_references(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<WizardView>, AppError> {
    let handle = handle(&state, id).await?;
    let ticket = handle.wizard.lock().await.ticket()?;

    let task = handle.clone();
    detached(async move {
        let result = state.references.warm().await;
        task.wizard.lock().await.apply_references(ticket, result)
    })
    .await?;
    Ok(Json(view(id, &handle).await))
}

/// GET /v1/wizards/{id}/passengers?search=
async fn search_passengers(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<SearchResponse>, AppError> {
    let handle = handle(&state, id).await?;
    let response = match handle.search.query(&query.search).await? {
        SearchOutcome::Results(passengers) => SearchResponse {
            superseded: false,
            passengers,
        },
        SearchOutcome::Superseded => SearchResponse {
            superseded: true,
            passengers: Vec::new(),
        },
    };
    Ok(Json(response))
}

/// POST /v1/wizards/{id}/passenger
async fn choose_passenger(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ChoosePassengerRequest>,
) -> Result<Json<WizardView>, AppError> {
    let handle = handle(&state, id).await?;
    match (req.passenger, req.new_passenger) {
        (Some(passenger), _) => handle.wizard.lock().await.select_passenger(passenger)?,
        (None, Some(draft)) => {
            let pending = handle.wizard.lock().await.prepare_passenger(draft)?;
            let task = handle.clone();
            detached(async move {
                let result = state.passengers.create(pending.draft).await;
                task.wizard.lock().await.apply_created_passenger(pending.ticket, result)
            })
            .await?;
        }
        (None, None) => {
            return Err(WizardError::validation("passenger", "Choose a passenger or provide one to create").into())
        }
    }
    Ok(Json(view(id, &handle).await))
}

/// POST /v1/wizards/{id}/details
async fn submit_details(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<LegDetails>,
) -> Result<Json<WizardView>, AppError> {
    let handle = handle(&state, id).await?;
    handle.wizard.lock().await.submit_details(req)?;
    Ok(Json(view(id, &handle).await))
}

/// POST /v1/wizards/{id}/return-date
/// Move the return picker and fetch that day's candidates
async fn change_return_date(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ReturnDateRequest>,
) -> Result<Json<WizardView>, AppError> {
    let handle = handle(&state, id).await?;
    let pending = handle.wizard.lock().await.change_return_date(req.date)?;

    let task = handle.clone();
    let applied = detached(async move {
        let result = state.selector.occurrences(pending.date()).await;
        task.wizard.lock().await.apply_return_trips(pending, result)
    })
    .await?;
    if !applied {
        tracing::debug!("Return-trip lookup for {} was overtaken", req.date);
    }
    Ok(Json(view(id, &handle).await))
}

/// POST /v1/wizards/{id}/return-trip
async fn select_return_trip(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ReturnLegDetails>,
) -> Result<Json<WizardView>, AppError> {
    let handle = handle(&state, id).await?;
    handle.wizard.lock().await.select_return_trip(req)?;
    Ok(Json(view(id, &handle).await))
}

/// POST /v1/wizards/{id}/payment-options
async fn payment_options(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<PaymentOptionsRequest>,
) -> Result<Json<WizardView>, AppError> {
    let handle = handle(&state, id).await?;
    {
        let mut wizard = handle.wizard.lock().await;
        if let Some(collect) = req.collect_payment {
            wizard.set_collect_payment(collect)?;
        }
        if let Some(method) = req.default_method {
            wizard.set_default_method(method)?;
        }
    }
    Ok(Json(view(id, &handle).await))
}

/// POST /v1/wizards/{id}/payments
async fn add_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<AddPaymentRequest>,
) -> Result<Json<WizardView>, AppError> {
    let handle = handle(&state, id).await?;
    handle.wizard.lock().await.add_payment(req.method, req.amount_cents)?;
    Ok(Json(view(id, &handle).await))
}

/// DELETE /v1/wizards/{id}/payments/{index}
async fn remove_payment(
    State(state): State<AppState>,
    Path((id, index)): Path<(Uuid, usize)>,
) -> Result<Json<RemovedPaymentResponse>, AppError> {
    let handle = handle(&state, id).await?;
    let mut wizard = handle.wizard.lock().await;
    let removed = wizard.remove_payment(index)?;
    Ok(Json(RemovedPaymentResponse {
        removed,
        remaining_cents: wizard.remaining()?,
    }))
}

/// POST /v1/wizards/{id}/reauthenticated
async fn reauthenticated(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<WizardView>, AppError> {
    let handle = handle(&state, id).await?;
    handle.wizard.lock().await.reauthenticated()?;
    Ok(Json(view(id, &handle).await))
}

/// POST /v1/wizards/{id}/commit
/// The wizard lock is released while the backend works; a cancel in the
/// meantime makes the result stale. A committed wizard is released.
async fn commit(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<CommitReceipt>, AppError> {
    let handle = handle(&state, id).await?;
    let pending = handle.wizard.lock().await.prepare_commit()?;

    let task = handle.clone();
    let receipt = detached(async move {
        let result = state.backend.create_reservation(&pending.request).await;
        let receipt = task.wizard.lock().await.finish_commit(pending, result)?;
        tracing::info!("Wizard {} committed reservation {}", id, receipt.reservation_id);
        state.release_if_closed(id, &task).await;
        Ok(receipt)
    })
    .await?;
    Ok(Json(receipt))
}

/// POST /v1/wizards/{id}/checkout
/// Tokenized card payment. A declined card is a normal response carrying the
/// gateway status.
async fn checkout(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(card): Json<CardPayment>,
) -> Result<Json<CheckoutResponse>, AppError> {
    let handle = handle(&state, id).await?;
    let pending = handle.wizard.lock().await.prepare_checkout(card)?;

    let task = handle.clone();
    let outcome = detached(async move {
        let result = state.checkout.charge(&pending.request).await;
        let outcome = task.wizard.lock().await.finish_checkout(pending, result)?;
        state.release_if_closed(id, &task).await;
        Ok(outcome)
    })
    .await?;
    Ok(Json(CheckoutResponse {
        outcome,
        wizard: view(id, &handle).await,
    }))
}
