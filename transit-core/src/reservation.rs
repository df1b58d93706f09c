use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::payment::PaymentEntry;
use crate::trip::FareType;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Leg {
    Outbound,
    Return,
}

/// One not-yet-committed reservation line: a passenger on one trip occurrence.
/// `price_cents` is fixed when the line is built.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PassengerReservationDraft {
    pub leg: Leg,
    pub passenger_id: Uuid,
    pub trip_occurrence_id: Uuid,
    pub fare_type: FareType,
    pub pickup_id: String,
    pub dropoff_id: String,
    pub price_cents: i64,
}

/// The single commit payload: every line plus the finalized payments.
/// Retries within one wizard session reuse `idempotency_key`, so the backend
/// writes the reservation at most once.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReservationRequest {
    pub idempotency_key: Uuid,
    pub items: Vec<PassengerReservationDraft>,
    pub payments: Vec<PaymentEntry>,
}

impl ReservationRequest {
    pub fn total_cents(&self) -> i64 {
        self.items.iter().map(|item| item.price_cents).sum()
    }

    pub fn collected_cents(&self) -> i64 {
        self.payments.iter().map(|p| p.amount_cents).sum()
    }
}
