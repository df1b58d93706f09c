use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::backend::{BackendError, BackendResult, BookingBackend};
use crate::passenger::{Passenger, PassengerDraft};
use crate::payment::{CardChargeRequest, CardChargeResponse};
use crate::reference::{ReferenceKind, ReferenceOption};
use crate::reservation::ReservationRequest;
use crate::trip::TripOccurrence;

#[derive(Default)]
struct MockState {
    passengers: Vec<Passenger>,
    occurrences: HashMap<NaiveDate, Vec<TripOccurrence>>,
    references: HashMap<ReferenceKind, Vec<ReferenceOption>>,
    charge_status: String,
    fail_next: Option<BackendError>,
    reservations: Vec<ReservationRequest>,
    reservation_ids: HashMap<Uuid, Uuid>,
    charges: Vec<CardChargeRequest>,
    search_calls: Vec<String>,
    reference_calls: usize,
    occurrence_calls: usize,
}

/// In-memory backend used by tests and local runs without a persistence service
pub struct MockBookingBackend {
    state: Mutex<MockState>,
}

impl MockBookingBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                charge_status: "approved".to_string(),
                ..MockState::default()
            }),
        }
    }

    pub fn with_passenger(mut self, passenger: Passenger) -> Self {
        self.state.get_mut().passengers.push(passenger);
        self
    }

    pub fn with_occurrences(mut self, date: NaiveDate, occurrences: Vec<TripOccurrence>) -> Self {
        self.state.get_mut().occurrences.insert(date, occurrences);
        self
    }

    pub fn with_references(mut self, kind: ReferenceKind, options: Vec<ReferenceOption>) -> Self {
        self.state.get_mut().references.insert(kind, options);
        self
    }

    pub fn with_charge_status(mut self, status: &str) -> Self {
        self.state.get_mut().charge_status = status.to_string();
        self
    }

    pub async fn set_charge_status(&self, status: &str) {
        self.state.lock().await.charge_status = status.to_string();
    }

    /// The next boundary call of any kind fails with `error`
    pub async fn fail_next(&self, error: BackendError) {
        self.state.lock().await.fail_next = Some(error);
    }

    pub async fn reservations(&self) -> Vec<ReservationRequest> {
        self.state.lock().await.reservations.clone()
    }

    pub async fn charges(&self) -> Vec<CardChargeRequest> {
        self.state.lock().await.charges.clone()
    }

    pub async fn search_calls(&self) -> Vec<String> {
        self.state.lock().await.search_calls.clone()
    }

    pub async fn reference_calls(&self) -> usize {
        self.state.lock().await.reference_calls
    }

    pub async fn occurrence_calls(&self) -> usize {
        self.state.lock().await.occurrence_calls
    }

    fn take_failure(state: &mut MockState) -> BackendResult<()> {
        match state.fail_next.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Default for MockBookingBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BookingBackend for MockBookingBackend {
    async fn search_passengers(&self, query: &str) -> BackendResult<Vec<Passenger>> {
        let mut state = self.state.lock().await;
        state.search_calls.push(query.to_string());
        Self::take_failure(&mut state)?;

        let needle = query.to_lowercase();
        Ok(state
            .passengers
            .iter()
            .filter(|p| {
                p.full_name().to_lowercase().contains(&needle)
                    || p.document_number.expose().contains(&needle)
            })
            .cloned()
            .collect())
    }

    async fn create_passenger(&self, draft: &PassengerDraft) -> BackendResult<Uuid> {
        let mut state = self.state.lock().await;
        Self::take_failure(&mut state)?;

        let id = Uuid::new_v4();
        state.passengers.push(draft.clone().into_passenger(id));
        Ok(id)
    }

    async fn list_trip_occurrences(&self, date: NaiveDate) -> BackendResult<Vec<TripOccurrence>> {
        let mut state = self.state.lock().await;
        state.occurrence_calls += 1;
        Self::take_failure(&mut state)?;

        Ok(state.occurrences.get(&date).cloned().unwrap_or_default())
    }

    async fn create_reservation(&self, request: &ReservationRequest) -> BackendResult<Uuid> {
        let mut state = self.state.lock().await;
        Self::take_failure(&mut state)?;

        // a replayed key answers with the reservation it already created
        if let Some(id) = state.reservation_ids.get(&request.idempotency_key) {
            return Ok(*id);
        }
        let id = Uuid::new_v4();
        state.reservation_ids.insert(request.idempotency_key, id);
        state.reservations.push(request.clone());
        Ok(id)
    }

    async fn charge_card(&self, request: &CardChargeRequest) -> BackendResult<CardChargeResponse> {
        let mut state = self.state.lock().await;
        Self::take_failure(&mut state)?;

        state.charges.push(request.clone());
        Ok(CardChargeResponse {
            status: state.charge_status.clone(),
            reserve_id: Some(format!("res_{}", state.charges.len())),
        })
    }

    async fn list_reference_options(&self, kind: ReferenceKind) -> BackendResult<Vec<ReferenceOption>> {
        let mut state = self.state.lock().await;
        state.reference_calls += 1;
        Self::take_failure(&mut state)?;

        Ok(state.references.get(&kind).cloned().unwrap_or_default())
    }
}
