use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use transit_catalog::{Candidates, FareResolver, ReferenceSnapshot, ReturnTripPicker};
use transit_core::{FareType, Passenger, PassengerReservationDraft, PaymentEntry, PaymentMethod, TripOccurrence};
use uuid::Uuid;

use crate::ledger::PaymentLedger;

/// Steps of the booking wizard
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WizardStep {
    SelectPassenger,
    AddDetails,
    SelectReturnTrip,
    ConfirmAndPay,
    Committed,
    Cancelled,
}

impl WizardStep {
    pub fn is_terminal(self) -> bool {
        matches!(self, WizardStep::Committed | WizardStep::Cancelled)
    }
}

fn default_collect_payment() -> bool {
    true
}

/// Outbound leg details submitted on the AddDetails step
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LegDetails {
    pub fare_type: FareType,
    pub pickup_id: String,
    pub dropoff_id: String,
    /// Off for unpaid (deferred) bookings; forced on for round trips
    #[serde(default = "default_collect_payment")]
    pub collect_payment: bool,
}

/// Return leg details submitted on the SelectReturnTrip step
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReturnLegDetails {
    pub trip_occurrence_id: Option<Uuid>,
    pub pickup_id: String,
    pub dropoff_id: String,
}

/// The aggregate one open wizard works on. Lives from `open` until cancel or
/// a successful commit; a failed commit leaves it untouched.
#[derive(Debug, Clone)]
pub struct WizardSession {
    pub generation: u64,
    pub step: WizardStep,
    pub outbound: TripOccurrence,
    pub passenger: Option<Passenger>,
    pub fare_type: Option<FareType>,
    pub drafts: Vec<PassengerReservationDraft>,
    pub return_picker: Option<ReturnTripPicker>,
    pub ledger: PaymentLedger,
    pub collect_payment: bool,
    pub default_method: PaymentMethod,
    pub references: ReferenceSnapshot,
    pub submitting: bool,
    pub requires_reauthentication: bool,
    pub last_failure: Option<String>,
    /// Sent with every commit or charge attempt of this session; replaced
    /// only after a declined charge, whose token is spent
    pub idempotency_key: Uuid,
}

impl WizardSession {
    pub fn new(generation: u64, outbound: TripOccurrence, default_method: PaymentMethod) -> Self {
        Self {
            generation,
            step: WizardStep::SelectPassenger,
            outbound,
            passenger: None,
            fare_type: None,
            drafts: Vec::new(),
            return_picker: None,
            ledger: PaymentLedger::default(),
            collect_payment: true,
            default_method,
            references: ReferenceSnapshot::default(),
            submitting: false,
            requires_reauthentication: false,
            last_failure: None,
            idempotency_key: Uuid::new_v4(),
        }
    }

    pub fn is_round_trip(&self) -> bool {
        self.fare_type.is_some_and(FareType::is_round_trip)
    }

    pub fn total_owed(&self) -> i64 {
        self.drafts.iter().map(|d| d.price_cents).sum()
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            generation: self.generation,
            step: self.step,
            outbound: self.outbound.clone(),
            passenger: self.passenger.as_ref().map(|p| PassengerRef {
                id: p.id,
                name: p.full_name(),
            }),
            fare_type: self.fare_type,
            drafts: self.drafts.clone(),
            return_date: self.return_picker.as_ref().map(ReturnTripPicker::date),
            return_candidates: self.return_picker.as_ref().map(|p| p.candidates().clone()),
            return_trip: self.return_picker.as_ref().and_then(|p| p.selected().cloned()),
            total_owed_cents: self.ledger.total_owed(),
            collected_cents: self.ledger.collected(),
            remaining_cents: self.ledger.remaining(),
            payments: self.ledger.entries().to_vec(),
            collect_payment: self.collect_payment,
            default_method: self.default_method,
            can_commit: self.step == WizardStep::ConfirmAndPay
                && !self.submitting
                && !self.requires_reauthentication
                && self.ledger.can_commit(self.collect_payment),
            submitting: self.submitting,
            requires_reauthentication: self.requires_reauthentication,
            last_failure: self.last_failure.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PassengerRef {
    pub id: Uuid,
    pub name: String,
}

/// Read model of a session for display
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub generation: u64,
    pub step: WizardStep,
    pub outbound: TripOccurrence,
    pub passenger: Option<PassengerRef>,
    pub fare_type: Option<FareType>,
    pub drafts: Vec<PassengerReservationDraft>,
    pub return_date: Option<NaiveDate>,
    pub return_candidates: Option<Candidates>,
    pub return_trip: Option<TripOccurrence>,
    pub total_owed_cents: i64,
    pub collected_cents: i64,
    pub remaining_cents: i64,
    pub payments: Vec<PaymentEntry>,
    pub collect_payment: bool,
    pub default_method: PaymentMethod,
    pub can_commit: bool,
    pub submitting: bool,
    pub requires_reauthentication: bool,
    pub last_failure: Option<String>,
}

/// Per-deployment wizard behaviour
#[derive(Debug, Clone)]
pub struct WizardSettings {
    /// Method used for the implicit full-amount payment
    pub default_payment_method: PaymentMethod,
    pub fares: FareResolver,
}

impl Default for WizardSettings {
    fn default() -> Self {
        Self {
            default_payment_method: PaymentMethod::Cash,
            fares: FareResolver::default(),
        }
    }
}

/// What a successful discrete-payment commit returns
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CommitReceipt {
    pub reservation_id: Uuid,
    pub total_cents: i64,
    pub payments: Vec<PaymentEntry>,
}
