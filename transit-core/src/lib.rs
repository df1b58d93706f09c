pub mod backend;
pub mod mock;
pub mod passenger;
pub mod payment;
pub mod reference;
pub mod reservation;
pub mod trip;

pub use backend::{BackendError, BackendResult, BookingBackend};
pub use passenger::{Passenger, PassengerDraft};
pub use payment::{CardChargeRequest, CardChargeResponse, ChargeStatus, PaymentEntry, PaymentMethod};
pub use reference::{ReferenceKind, ReferenceOption};
pub use reservation::{Leg, PassengerReservationDraft, ReservationRequest};
pub use trip::{FarePrice, FareType, TripOccurrence};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed on {field}: {message}")]
    ValidationError { field: String, message: String },
    #[error("Unknown code for {kind}: {code}")]
    UnknownCode { kind: &'static str, code: String },
}

impl CoreError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        CoreError::ValidationError {
            field: field.into(),
            message: message.into(),
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
