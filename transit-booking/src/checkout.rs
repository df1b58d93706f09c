use serde::{Deserialize, Serialize};
use std::sync::Arc;
use transit_core::payment::PayerIdentification;
use transit_core::{BackendResult, BookingBackend, CardChargeRequest, CardChargeResponse, ChargeStatus, PassengerReservationDraft};
use transit_shared::pii::Masked;
use uuid::Uuid;

/// What the card widget hands back once the payer submits the form
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CardPayment {
    pub token: Masked<String>,
    pub installments: u32,
    pub payment_method_id: String,
    pub payer_email: Masked<String>,
    pub identification: PayerIdentification,
}

impl CardPayment {
    pub fn validate(&self) -> Result<(), CheckoutError> {
        if self.token.expose().trim().is_empty() {
            return Err(CheckoutError::MissingField("token"));
        }
        if self.installments == 0 {
            return Err(CheckoutError::InvalidInstallments(self.installments));
        }
        if self.payment_method_id.trim().is_empty() {
            return Err(CheckoutError::MissingField("payment_method_id"));
        }
        if self.payer_email.expose().trim().is_empty() {
            return Err(CheckoutError::MissingField("payer_email"));
        }
        if self.identification.number.expose().trim().is_empty() {
            return Err(CheckoutError::MissingField("identification"));
        }
        Ok(())
    }

    pub fn into_charge(
        self,
        idempotency_key: Uuid,
        amount_cents: i64,
        items: Vec<PassengerReservationDraft>,
    ) -> CardChargeRequest {
        CardChargeRequest {
            idempotency_key,
            token: self.token,
            amount_cents,
            installments: self.installments,
            payment_method_id: self.payment_method_id,
            payer_email: self.payer_email,
            identification: self.identification,
            items,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CheckoutOutcome {
    Approved { reserve_id: Option<String> },
    /// Routed to the failure confirmation view. The backend may still have
    /// recorded the reservation with a non-approved payment marker.
    Declined { status: String, reserve_id: Option<String> },
}

/// Runs tokenized card charges through the backend. Charges are never retried.
#[derive(Clone)]
pub struct CardCheckout {
    backend: Arc<dyn BookingBackend>,
}

impl CardCheckout {
    pub fn new(backend: Arc<dyn BookingBackend>) -> Self {
        Self { backend }
    }

    pub async fn charge(&self, request: &CardChargeRequest) -> BackendResult<CardChargeResponse> {
        tracing::info!(
            "Charging card: amount={} installments={} method={}",
            request.amount_cents,
            request.installments,
            request.payment_method_id
        );
        let response = self.backend.charge_card(request).await?;

        match response.charge_status() {
            ChargeStatus::Approved => tracing::info!("Card charge approved, reserve {:?}", response.reserve_id),
            ChargeStatus::NotApproved(status) => tracing::warn!("Card charge not approved: {}", status),
        }
        Ok(response)
    }
}

// ============================================================================
// Card widget lifetime
// ============================================================================

/// A mounted card-entry widget
pub trait CardWidget: Send {
    fn unmount(&mut self);
}

/// Mounts the card widget for a given amount
pub trait WidgetMount: Send + Sync {
    fn mount(&self, amount_cents: i64) -> Box<dyn CardWidget>;
}

/// Owns the mounted widget for as long as the wizard sits on the
/// confirm-and-pay step. Dropping the lease unmounts the widget.
pub struct WidgetLease {
    widget: Option<Box<dyn CardWidget>>,
}

impl WidgetLease {
    pub fn acquire(mount: &dyn WidgetMount, amount_cents: i64) -> Self {
        tracing::debug!("Mounting card widget for {}", amount_cents);
        Self {
            widget: Some(mount.mount(amount_cents)),
        }
    }

    pub fn release(mut self) {
        self.unmount();
    }

    fn unmount(&mut self) {
        if let Some(mut widget) = self.widget.take() {
            widget.unmount();
        }
    }
}

impl Drop for WidgetLease {
    fn drop(&mut self) {
        self.unmount();
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CheckoutError {
    #[error("{0} is required for card payment")]
    MissingField(&'static str),

    #[error("Installments must be at least 1 (got {0})")]
    InvalidInstallments(u32),

    #[error("Nothing to charge: the reservation total is 0")]
    NothingToCharge,

    #[error("{count} payment(s) already recorded; remove them before charging a card")]
    PaymentsAlreadyRecorded { count: usize },
}
