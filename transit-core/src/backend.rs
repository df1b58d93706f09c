use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

use crate::passenger::{Passenger, PassengerDraft};
use crate::payment::{CardChargeRequest, CardChargeResponse};
use crate::reference::{ReferenceKind, ReferenceOption};
use crate::reservation::ReservationRequest;
use crate::trip::TripOccurrence;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("Backend unreachable: {0}")]
    Transport(String),

    #[error("Backend rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Unexpected backend response: {0}")]
    Decode(String),

    /// Credential renewal failed; the user has to sign in again
    #[error("Session expired, please sign in again")]
    SessionExpired,
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Everything the booking wizard needs from the persistence service. Every
/// call is one request through the authenticated request layer.
#[async_trait]
pub trait BookingBackend: Send + Sync {
    /// Fuzzy search by name or document number
    async fn search_passengers(&self, query: &str) -> BackendResult<Vec<Passenger>>;

    async fn create_passenger(&self, draft: &PassengerDraft) -> BackendResult<Uuid>;

    /// Occurrences departing on `date`, ordered by departure hour
    async fn list_trip_occurrences(&self, date: NaiveDate) -> BackendResult<Vec<TripOccurrence>>;

    /// Atomically create every reservation line with its payments
    async fn create_reservation(&self, request: &ReservationRequest) -> BackendResult<Uuid>;

    /// Charge a tokenized card and record the reservation
    async fn charge_card(&self, request: &CardChargeRequest) -> BackendResult<CardChargeResponse>;

    async fn list_reference_options(&self, kind: ReferenceKind) -> BackendResult<Vec<ReferenceOption>>;
}
