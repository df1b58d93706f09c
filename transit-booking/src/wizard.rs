use chrono::{NaiveDate, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use transit_catalog::{Candidates, LookupTicket, ReferenceCache, ReferenceSnapshot, ReturnTripPicker, SelectionError, TripOccurrenceSelector};
use transit_core::{
    BackendError, BackendResult, BookingBackend, CardChargeRequest, CardChargeResponse, ChargeStatus, Leg, Passenger,
    PassengerDraft, PaymentEntry, PaymentMethod, ReferenceKind, ReservationRequest, TripOccurrence,
};
use transit_shared::models::events::{CardChargeDeclinedEvent, ReservationCommittedEvent, WizardCancelledEvent};
use transit_shared::BookingEvent;
use uuid::Uuid;

use crate::builder::{BuildError, ReservationLineBuilder};
use crate::checkout::{CardCheckout, CardPayment, CheckoutError, CheckoutOutcome, WidgetLease, WidgetMount};
use crate::ledger::{LedgerError, PaymentLedger};
use crate::models::{CommitReceipt, LegDetails, ReturnLegDetails, SessionSummary, WizardSession, WizardSettings, WizardStep};
use crate::passenger::{PassengerError, PassengerResolver};

/// Identifies the session an async operation was started against. Results
/// presented with a ticket from an older generation are discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTicket {
    pub generation: u64,
}

/// A return-trip lookup waiting for the backend
#[derive(Debug, Clone, Copy)]
pub struct PendingLookup {
    pub ticket: SessionTicket,
    pub lookup: LookupTicket,
}

impl PendingLookup {
    pub fn date(&self) -> NaiveDate {
        self.lookup.date
    }
}

/// A passenger creation waiting for the backend
#[derive(Debug, Clone)]
pub struct PendingPassenger {
    pub ticket: SessionTicket,
    pub draft: PassengerDraft,
}

/// A reservation commit waiting for the backend
#[derive(Debug, Clone)]
pub struct PendingCommit {
    pub ticket: SessionTicket,
    pub request: ReservationRequest,
}

/// A card charge waiting for the gateway
#[derive(Debug, Clone)]
pub struct PendingCharge {
    pub ticket: SessionTicket,
    pub request: CardChargeRequest,
}

/// Drives one booking wizard from passenger selection to commit.
///
/// Every backend call is split in three: a synchronous `prepare_*` that
/// validates and snapshots what goes out, the call itself, and a synchronous
/// `finish_*`/`apply_*` that only takes effect if the session generation is
/// unchanged. The `async` conveniences chain the three for callers that own
/// the wizard exclusively; callers sharing it behind a lock can release the
/// lock for the middle step.
pub struct BookingWizard {
    backend: Arc<dyn BookingBackend>,
    references: Arc<ReferenceCache>,
    selector: TripOccurrenceSelector,
    passengers: PassengerResolver,
    checkout: CardCheckout,
    builder: ReservationLineBuilder,
    settings: WizardSettings,
    widget_mount: Option<Arc<dyn WidgetMount>>,
    events: Option<broadcast::Sender<BookingEvent>>,
    generation: u64,
    session: Option<WizardSession>,
    widget: Option<WidgetLease>,
    closed_as: Option<WizardStep>,
}

impl BookingWizard {
    pub fn new(backend: Arc<dyn BookingBackend>, references: Arc<ReferenceCache>, settings: WizardSettings) -> Self {
        Self {
            selector: TripOccurrenceSelector::new(backend.clone()),
            passengers: PassengerResolver::new(backend.clone()),
            checkout: CardCheckout::new(backend.clone()),
            builder: ReservationLineBuilder::new(settings.fares.clone()),
            backend,
            references,
            settings,
            widget_mount: None,
            events: None,
            generation: 0,
            session: None,
            widget: None,
            closed_as: None,
        }
    }

    pub fn with_widget_mount(mut self, mount: Arc<dyn WidgetMount>) -> Self {
        self.widget_mount = Some(mount);
        self
    }

    pub fn with_events(mut self, events: broadcast::Sender<BookingEvent>) -> Self {
        self.events = Some(events);
        self
    }

    // ========================================================================
    // Session lifecycle
    // ========================================================================

    /// Start a fresh session for `outbound`. Whatever was open before is
    /// discarded; there is no resuming a half-finished session.
    pub fn open(&mut self, outbound: TripOccurrence) -> SessionTicket {
        if self.session.is_some() {
            self.cancel();
        }

        self.generation += 1;
        tracing::info!(
            "Opening booking wizard for {} departing {} (generation {})",
            outbound.route(),
            outbound.departs_at(),
            self.generation
        );
        self.session = Some(WizardSession::new(
            self.generation,
            outbound,
            self.settings.default_payment_method,
        ));
        self.closed_as = None;
        SessionTicket {
            generation: self.generation,
        }
    }

    /// Abort at any point. Always permitted; in-flight calls are left to
    /// finish and their results are dropped.
    pub fn cancel(&mut self) {
        if let Some(session) = &self.session {
            tracing::info!("Booking wizard cancelled at {:?}", session.step);
            self.emit(BookingEvent::WizardCancelled(WizardCancelledEvent {
                trip_occurrence_id: session.outbound.id,
                generation: session.generation,
                timestamp: Utc::now().timestamp(),
            }));
        }
        self.teardown(WizardStep::Cancelled);
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn session(&self) -> Option<&WizardSession> {
        self.session.as_ref()
    }

    /// Current step, or how the last session ended when none is open
    pub fn step(&self) -> Option<WizardStep> {
        self.session.as_ref().map(|s| s.step).or(self.closed_as)
    }

    pub fn ticket(&self) -> Result<SessionTicket, WizardError> {
        let session = self.session.as_ref().ok_or(WizardError::NoSession)?;
        Ok(SessionTicket {
            generation: session.generation,
        })
    }

    pub fn summary(&self) -> Result<SessionSummary, WizardError> {
        Ok(self.session.as_ref().ok_or(WizardError::NoSession)?.summary())
    }

    pub fn widget_mounted(&self) -> bool {
        self.widget.is_some()
    }

    /// Clear the session-expired latch once the user has signed in again
    pub fn reauthenticated(&mut self) -> Result<(), WizardError> {
        let session = active(&mut self.session)?;
        if session.requires_reauthentication {
            tracing::info!("Re-authenticated, commit unblocked");
        }
        session.requires_reauthentication = false;
        Ok(())
    }

    // ========================================================================
    // Reference lists
    // ========================================================================

    pub fn apply_references(
        &mut self,
        ticket: SessionTicket,
        result: BackendResult<ReferenceSnapshot>,
    ) -> Result<(), WizardError> {
        let session = self.current(ticket)?;
        match result {
            Ok(snapshot) => {
                session.references = snapshot;
                Ok(())
            }
            Err(e) => Err(lookup_failure(session, e)),
        }
    }

    /// Load the address and payment-method lists the session validates against
    pub async fn load_references(&mut self) -> Result<(), WizardError> {
        let ticket = self.ticket()?;
        let result = self.references.warm().await;
        self.apply_references(ticket, result)
    }

    // ========================================================================
    // SelectPassenger
    // ========================================================================

    pub fn select_passenger(&mut self, passenger: Passenger) -> Result<(), WizardError> {
        let session = active(&mut self.session)?;
        expect_step(session, &[WizardStep::SelectPassenger, WizardStep::AddDetails], WizardStep::AddDetails)?;

        if passenger.id.is_nil() {
            return Err(WizardError::validation("passenger", "Choose a passenger before continuing"));
        }

        tracing::debug!("Passenger {} selected", passenger.id);
        session.passenger = Some(passenger);
        session.step = WizardStep::AddDetails;
        Ok(())
    }

    /// Check the draft before it goes to the backend
    pub fn prepare_passenger(&mut self, draft: PassengerDraft) -> Result<PendingPassenger, WizardError> {
        let session = active(&mut self.session)?;
        expect_step(
            session,
            &[WizardStep::SelectPassenger, WizardStep::AddDetails],
            WizardStep::AddDetails,
        )?;
        draft.validate().map_err(PassengerError::Invalid)?;

        Ok(PendingPassenger {
            ticket: SessionTicket {
                generation: session.generation,
            },
            draft,
        })
    }

    /// Select the passenger the backend created. A session-expired answer
    /// raises the re-authentication latch.
    pub fn apply_created_passenger(
        &mut self,
        ticket: SessionTicket,
        result: Result<Passenger, PassengerError>,
    ) -> Result<Passenger, WizardError> {
        let session = self.current(ticket)?;
        let passenger = match result {
            Ok(passenger) => passenger,
            Err(PassengerError::Backend(BackendError::SessionExpired)) => {
                session.requires_reauthentication = true;
                return Err(WizardError::SessionExpired);
            }
            Err(e) => return Err(e.into()),
        };

        self.select_passenger(passenger.clone())?;
        Ok(passenger)
    }

    /// Create a passenger through the backend and select it
    pub async fn create_passenger(&mut self, draft: PassengerDraft) -> Result<Passenger, WizardError> {
        let pending = self.prepare_passenger(draft)?;
        let result = self.passengers.create(pending.draft).await;
        self.apply_created_passenger(pending.ticket, result)
    }

    // ========================================================================
    // AddDetails
    // ========================================================================

    /// Build the outbound line. Round trips continue to return-trip selection
    /// with payment collection forced on; one-way trips go straight to
    /// confirmation.
    pub fn submit_details(&mut self, details: LegDetails) -> Result<WizardStep, WizardError> {
        let session = active(&mut self.session)?;
        let next = if details.fare_type.is_round_trip() {
            WizardStep::SelectReturnTrip
        } else {
            WizardStep::ConfirmAndPay
        };
        expect_step(session, &[WizardStep::AddDetails], next)?;

        let passenger = session
            .passenger
            .as_ref()
            .ok_or_else(|| WizardError::validation("passenger", "Choose a passenger before continuing"))?;
        check_addresses(&session.references, &details.pickup_id, &details.dropoff_id)?;

        let line = self.builder.build(
            passenger,
            &session.outbound,
            details.fare_type,
            Leg::Outbound,
            &details.pickup_id,
            &details.dropoff_id,
        )?;

        session.fare_type = Some(details.fare_type);
        session.drafts = vec![line];
        session.ledger = PaymentLedger::new(session.total_owed());

        if details.fare_type.is_round_trip() {
            if !details.collect_payment {
                tracing::debug!("Round trips cannot be deferred, collecting payment");
            }
            session.collect_payment = true;
            session.return_picker = Some(ReturnTripPicker::seeded(session.outbound.departure_date));
        } else {
            session.collect_payment = details.collect_payment;
        }
        session.step = next;

        tracing::info!(
            "Outbound line built: {:?} at {} cents",
            details.fare_type,
            session.ledger.total_owed()
        );

        if next == WizardStep::ConfirmAndPay {
            self.mount_widget();
        }
        Ok(next)
    }

    // ========================================================================
    // SelectReturnTrip
    // ========================================================================

    /// Move the return picker to `date`. Any chosen return trip is dropped; from
    /// the confirmation step this also steps back to return-trip selection.
    pub fn change_return_date(&mut self, date: NaiveDate) -> Result<PendingLookup, WizardError> {
        let session = active(&mut self.session)?;
        let round_trip_confirming = session.step == WizardStep::ConfirmAndPay && session.is_round_trip();
        if !round_trip_confirming {
            expect_step(session, &[WizardStep::SelectReturnTrip], WizardStep::SelectReturnTrip)?;
        }

        let picker = session.return_picker.as_mut().ok_or(WizardError::InvalidTransition {
            from: session.step,
            to: WizardStep::SelectReturnTrip,
        })?;
        let lookup = picker.change_date(date);
        session.drafts.retain(|d| d.leg == Leg::Outbound);
        session.step = WizardStep::SelectReturnTrip;
        let ticket = SessionTicket {
            generation: session.generation,
        };

        if round_trip_confirming {
            self.release_widget();
        }
        Ok(PendingLookup { ticket, lookup })
    }

    /// Re-fetch candidates for the picker's current date
    pub fn begin_return_lookup(&mut self) -> Result<PendingLookup, WizardError> {
        let session = active(&mut self.session)?;
        expect_step(session, &[WizardStep::SelectReturnTrip], WizardStep::SelectReturnTrip)?;

        let picker = session.return_picker.as_mut().ok_or(WizardError::InvalidTransition {
            from: session.step,
            to: WizardStep::SelectReturnTrip,
        })?;
        Ok(PendingLookup {
            ticket: SessionTicket {
                generation: session.generation,
            },
            lookup: picker.begin_lookup(),
        })
    }

    /// Apply a candidate lookup. Returns false when a newer lookup or a newer
    /// session has overtaken it. Lookup failures become a `Failed` candidate
    /// state rather than an error.
    pub fn apply_return_trips(
        &mut self,
        pending: PendingLookup,
        result: BackendResult<Vec<TripOccurrence>>,
    ) -> Result<bool, WizardError> {
        let session = match self.current(pending.ticket) {
            Ok(session) => session,
            Err(WizardError::Stale { .. }) => return Ok(false),
            Err(e) => return Err(e),
        };

        if matches!(result, Err(BackendError::SessionExpired)) {
            session.requires_reauthentication = true;
        }
        if let Err(e) = &result {
            tracing::error!("Return trip lookup for {} failed: {}", pending.date(), e);
        }

        Ok(session
            .return_picker
            .as_mut()
            .is_some_and(|picker| picker.apply(pending.lookup, result)))
    }

    /// Fetch and apply the candidates for the picker's current date
    pub async fn load_return_trips(&mut self) -> Result<Candidates, WizardError> {
        let pending = self.begin_return_lookup()?;
        self.fetch_return_trips(pending).await
    }

    /// Change the return date and fetch its candidates
    pub async fn reload_return_trips(&mut self, date: NaiveDate) -> Result<Candidates, WizardError> {
        let pending = self.change_return_date(date)?;
        self.fetch_return_trips(pending).await
    }

    async fn fetch_return_trips(&mut self, pending: PendingLookup) -> Result<Candidates, WizardError> {
        let result = self.selector.occurrences(pending.date()).await;
        self.apply_return_trips(pending, result)?;

        let session = self.current(pending.ticket)?;
        Ok(session
            .return_picker
            .as_ref()
            .map(|p| p.candidates().clone())
            .unwrap_or(Candidates::NotLoaded))
    }

    /// Choose the return occurrence and build its line (priced at 0, the
    /// round-trip fare already sits on the outbound line)
    pub fn select_return_trip(&mut self, details: ReturnLegDetails) -> Result<(), WizardError> {
        let session = active(&mut self.session)?;
        expect_step(session, &[WizardStep::SelectReturnTrip], WizardStep::ConfirmAndPay)?;

        let id = details
            .trip_occurrence_id
            .ok_or_else(|| WizardError::validation("trip_occurrence_id", "Select a return trip"))?;
        check_addresses(&session.references, &details.pickup_id, &details.dropoff_id)?;

        let fare_type = session.fare_type.ok_or(WizardError::InvalidTransition {
            from: session.step,
            to: WizardStep::ConfirmAndPay,
        })?;
        let picker = session.return_picker.as_mut().ok_or(WizardError::InvalidTransition {
            from: session.step,
            to: WizardStep::ConfirmAndPay,
        })?;
        let occurrence = picker.select(id)?.clone();

        let passenger = session
            .passenger
            .as_ref()
            .ok_or_else(|| WizardError::validation("passenger", "Choose a passenger before continuing"))?;
        let line = match self.builder.build(
            passenger,
            &occurrence,
            fare_type,
            Leg::Return,
            &details.pickup_id,
            &details.dropoff_id,
        ) {
            Ok(line) => line,
            Err(e) => {
                if let Some(picker) = session.return_picker.as_mut() {
                    picker.clear_selection();
                }
                return Err(e.into());
            }
        };

        session.drafts.retain(|d| d.leg == Leg::Outbound);
        session.drafts.push(line);
        session.step = WizardStep::ConfirmAndPay;

        tracing::info!("Return trip {} selected for {}", occurrence.id, occurrence.departs_at());
        self.mount_widget();
        Ok(())
    }

    // ========================================================================
    // ConfirmAndPay
    // ========================================================================

    /// Toggle payment collection. Ignored for round trips, which always
    /// collect. Returns the value now in effect.
    pub fn set_collect_payment(&mut self, collect: bool) -> Result<bool, WizardError> {
        let session = active(&mut self.session)?;
        if session.is_round_trip() {
            if !collect {
                tracing::debug!("Ignoring request to defer payment on a round trip");
            }
            session.collect_payment = true;
        } else {
            session.collect_payment = collect;
        }
        Ok(session.collect_payment)
    }

    /// Method used when no explicit payments were added
    pub fn set_default_method(&mut self, method: PaymentMethod) -> Result<(), WizardError> {
        let session = active(&mut self.session)?;
        check_method(&session.references, method)?;
        session.default_method = method;
        Ok(())
    }

    /// Record a payment and return the new remaining balance
    pub fn add_payment(&mut self, method: PaymentMethod, amount_cents: i64) -> Result<i64, WizardError> {
        let session = active(&mut self.session)?;
        expect_step(session, &[WizardStep::ConfirmAndPay], WizardStep::ConfirmAndPay)?;
        if session.submitting {
            return Err(WizardError::CommitInFlight);
        }
        check_method(&session.references, method)?;

        match session.ledger.add_payment(method, amount_cents) {
            Ok(remaining) => {
                tracing::debug!("Payment {} {} recorded, {} remaining", method, amount_cents, remaining);
                Ok(remaining)
            }
            Err(e) => {
                tracing::warn!("Payment rejected: {}", e);
                Err(e.into())
            }
        }
    }

    pub fn remove_payment(&mut self, index: usize) -> Result<PaymentEntry, WizardError> {
        let session = active(&mut self.session)?;
        expect_step(session, &[WizardStep::ConfirmAndPay], WizardStep::ConfirmAndPay)?;
        if session.submitting {
            return Err(WizardError::CommitInFlight);
        }
        Ok(session.ledger.remove_payment(index)?)
    }

    pub fn remaining(&self) -> Result<i64, WizardError> {
        Ok(self.session.as_ref().ok_or(WizardError::NoSession)?.ledger.remaining())
    }

    pub fn can_commit(&self) -> bool {
        self.session.as_ref().is_some_and(|session| {
            session.step == WizardStep::ConfirmAndPay
                && !session.submitting
                && !session.requires_reauthentication
                && session.ledger.can_commit(session.collect_payment)
        })
    }

    // ========================================================================
    // Commit
    // ========================================================================

    /// Reconcile the ledger and snapshot the one request that writes every
    /// line and payment together
    pub fn prepare_commit(&mut self) -> Result<PendingCommit, WizardError> {
        let session = active(&mut self.session)?;
        ready_to_submit(session)?;

        let payments = session.ledger.finalize(session.collect_payment, session.default_method)?;
        let request = ReservationRequest {
            idempotency_key: session.idempotency_key,
            items: session.drafts.clone(),
            payments,
        };

        session.submitting = true;
        session.last_failure = None;
        tracing::info!(
            "Committing reservation: {} line(s), {} payment(s), total {}",
            request.items.len(),
            request.payments.len(),
            request.total_cents()
        );
        Ok(PendingCommit {
            ticket: SessionTicket {
                generation: session.generation,
            },
            request,
        })
    }

    /// Apply the backend's answer. A failure leaves the session exactly as it
    /// was so the user can retry.
    pub fn finish_commit(
        &mut self,
        pending: PendingCommit,
        result: BackendResult<Uuid>,
    ) -> Result<CommitReceipt, WizardError> {
        let session = self.current(pending.ticket)?;
        session.submitting = false;

        let reservation_id = match result {
            Ok(id) => id,
            Err(e) => return Err(submit_failure(session, e)),
        };

        let event = ReservationCommittedEvent {
            reservation_id: reservation_id.to_string(),
            passenger_id: pending.request.items.first().map(|d| d.passenger_id).unwrap_or_default(),
            trip_occurrence_ids: pending.request.items.iter().map(|d| d.trip_occurrence_id).collect(),
            total_cents: pending.request.total_cents(),
            payment_count: pending.request.payments.len(),
            paid_by_card: false,
            timestamp: Utc::now().timestamp(),
        };
        tracing::info!("Reservation {} committed", reservation_id);

        self.emit(BookingEvent::ReservationCommitted(event));
        self.teardown(WizardStep::Committed);

        Ok(CommitReceipt {
            reservation_id,
            total_cents: pending.request.total_cents(),
            payments: pending.request.payments,
        })
    }

    pub async fn commit(&mut self) -> Result<CommitReceipt, WizardError> {
        let pending = self.prepare_commit()?;
        let result = self.backend.create_reservation(&pending.request).await;
        self.finish_commit(pending, result)
    }

    // ========================================================================
    // Tokenized card checkout
    // ========================================================================

    /// Validate the card payload and snapshot the charge for the full total.
    /// Discrete payments and a card charge do not mix.
    pub fn prepare_checkout(&mut self, card: CardPayment) -> Result<PendingCharge, WizardError> {
        let session = active(&mut self.session)?;
        ready_to_submit(session)?;
        card.validate()?;

        let recorded = session.ledger.entries().len();
        if recorded > 0 {
            return Err(CheckoutError::PaymentsAlreadyRecorded { count: recorded }.into());
        }
        let total = session.ledger.total_owed();
        if total <= 0 {
            return Err(CheckoutError::NothingToCharge.into());
        }

        session.submitting = true;
        session.last_failure = None;
        Ok(PendingCharge {
            ticket: SessionTicket {
                generation: session.generation,
            },
            request: card.into_charge(session.idempotency_key, total, session.drafts.clone()),
        })
    }

    /// Apply the gateway's answer. Only `approved` completes the booking; any
    /// other status keeps the session on the confirmation step.
    pub fn finish_checkout(
        &mut self,
        pending: PendingCharge,
        result: BackendResult<CardChargeResponse>,
    ) -> Result<CheckoutOutcome, WizardError> {
        let session = self.current(pending.ticket)?;
        session.submitting = false;

        let response = match result {
            Ok(response) => response,
            Err(e) => return Err(submit_failure(session, e)),
        };

        let passenger_id = pending.request.items.first().map(|d| d.passenger_id).unwrap_or_default();
        match response.charge_status() {
            ChargeStatus::Approved => {
                self.emit(BookingEvent::ReservationCommitted(ReservationCommittedEvent {
                    reservation_id: response.reserve_id.clone().unwrap_or_default(),
                    passenger_id,
                    trip_occurrence_ids: pending.request.items.iter().map(|d| d.trip_occurrence_id).collect(),
                    total_cents: pending.request.amount_cents,
                    payment_count: 1,
                    paid_by_card: true,
                    timestamp: Utc::now().timestamp(),
                }));
                self.teardown(WizardStep::Committed);
                Ok(CheckoutOutcome::Approved {
                    reserve_id: response.reserve_id,
                })
            }
            ChargeStatus::NotApproved(status) => {
                session.last_failure = Some(format!("Card charge {}", status));
                session.idempotency_key = Uuid::new_v4();
                self.emit(BookingEvent::CardChargeDeclined(CardChargeDeclinedEvent {
                    passenger_id,
                    status: status.clone(),
                    reserve_id: response.reserve_id.clone(),
                    amount_cents: pending.request.amount_cents,
                    timestamp: Utc::now().timestamp(),
                }));
                // tokens are single use, the payer needs a fresh form
                self.release_widget();
                self.mount_widget();
                Ok(CheckoutOutcome::Declined {
                    status,
                    reserve_id: response.reserve_id,
                })
            }
        }
    }

    pub async fn checkout(&mut self, card: CardPayment) -> Result<CheckoutOutcome, WizardError> {
        let pending = self.prepare_checkout(card)?;
        let result = self.checkout.charge(&pending.request).await;
        self.finish_checkout(pending, result)
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// The open session, provided it is still the one `ticket` was issued for
    fn current(&mut self, ticket: SessionTicket) -> Result<&mut WizardSession, WizardError> {
        if self.session.as_ref().map(|s| s.generation) != Some(ticket.generation) {
            tracing::warn!(
                "Discarding result for generation {} (current {})",
                ticket.generation,
                self.generation
            );
            return Err(WizardError::Stale {
                ticket: ticket.generation,
                current: self.generation,
            });
        }
        active(&mut self.session)
    }

    fn teardown(&mut self, outcome: WizardStep) {
        self.release_widget();
        if self.session.take().is_some() {
            self.generation += 1;
            self.closed_as = Some(outcome);
        }
    }

    fn mount_widget(&mut self) {
        let (Some(mount), Some(session)) = (&self.widget_mount, &self.session) else {
            return;
        };
        if self.widget.is_none() {
            self.widget = Some(WidgetLease::acquire(mount.as_ref(), session.ledger.total_owed()));
        }
    }

    fn release_widget(&mut self) {
        if let Some(lease) = self.widget.take() {
            lease.release();
        }
    }

    fn emit(&self, event: BookingEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}

fn active(session: &mut Option<WizardSession>) -> Result<&mut WizardSession, WizardError> {
    session.as_mut().ok_or(WizardError::NoSession)
}

fn expect_step(session: &WizardSession, allowed: &[WizardStep], to: WizardStep) -> Result<(), WizardError> {
    if allowed.contains(&session.step) {
        Ok(())
    } else {
        Err(WizardError::InvalidTransition { from: session.step, to })
    }
}

fn ready_to_submit(session: &WizardSession) -> Result<(), WizardError> {
    expect_step(session, &[WizardStep::ConfirmAndPay], WizardStep::Committed)?;
    if session.submitting {
        return Err(WizardError::CommitInFlight);
    }
    if session.requires_reauthentication {
        return Err(WizardError::SessionExpired);
    }
    Ok(())
}

fn check_addresses(references: &ReferenceSnapshot, pickup_id: &str, dropoff_id: &str) -> Result<(), WizardError> {
    let pickup_id = pickup_id.trim();
    if !pickup_id.is_empty() && !references.accepts(ReferenceKind::PickupAddresses, pickup_id) {
        return Err(WizardError::validation(
            "pickup_id",
            format!("Unknown pickup address '{}'", pickup_id),
        ));
    }
    let dropoff_id = dropoff_id.trim();
    if !dropoff_id.is_empty() && !references.accepts(ReferenceKind::DropoffAddresses, dropoff_id) {
        return Err(WizardError::validation(
            "dropoff_id",
            format!("Unknown dropoff address '{}'", dropoff_id),
        ));
    }
    Ok(())
}

fn check_method(references: &ReferenceSnapshot, method: PaymentMethod) -> Result<(), WizardError> {
    if references.accepts(ReferenceKind::PaymentMethods, method.code()) {
        Ok(())
    } else {
        Err(WizardError::validation(
            "method",
            format!("Payment method {} is not available", method),
        ))
    }
}

fn lookup_failure(session: &mut WizardSession, error: BackendError) -> WizardError {
    if error == BackendError::SessionExpired {
        session.requires_reauthentication = true;
        return WizardError::SessionExpired;
    }
    tracing::error!("Lookup failed: {}", error);
    WizardError::Lookup(error)
}

fn submit_failure(session: &mut WizardSession, error: BackendError) -> WizardError {
    session.last_failure = Some(error.to_string());
    if error == BackendError::SessionExpired {
        tracing::warn!("Session expired during submit, re-authentication required");
        session.requires_reauthentication = true;
        return WizardError::SessionExpired;
    }
    tracing::error!("Submit failed, session kept for retry: {}", error);
    WizardError::CommitFailed(error)
}

/// How a failure should be presented
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Field-level, fixed inline
    Validation,
    /// Payments do not add up to the total
    Reconciliation,
    /// A lookup call failed
    Lookup,
    /// Commit or charge failed; session kept
    CommitFailure,
    /// Credentials could not be renewed
    SessionExpired,
    /// The request does not fit the current step
    InvalidState,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WizardError {
    #[error("No booking wizard is open")]
    NoSession,

    #[error("Cannot move from {from:?} to {to:?}")]
    InvalidTransition { from: WizardStep, to: WizardStep },

    #[error("{message}")]
    Validation { field: String, message: String },

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Selection(#[from] SelectionError),

    #[error(transparent)]
    Checkout(#[from] CheckoutError),

    #[error(transparent)]
    Passenger(#[from] PassengerError),

    #[error("Lookup failed: {0}")]
    Lookup(BackendError),

    #[error("Submit failed: {0}")]
    CommitFailed(BackendError),

    #[error("Session expired, sign in again to continue")]
    SessionExpired,

    #[error("A commit is already in flight")]
    CommitInFlight,

    #[error("Result belongs to session generation {ticket}, current is {current}")]
    Stale { ticket: u64, current: u64 },
}

impl WizardError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        WizardError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            WizardError::Validation { .. }
            | WizardError::Build(_)
            | WizardError::Selection(_)
            | WizardError::Checkout(_) => ErrorKind::Validation,
            WizardError::Ledger(LedgerError::Mismatch { .. }) => ErrorKind::Reconciliation,
            WizardError::Ledger(_) => ErrorKind::Validation,
            WizardError::Passenger(PassengerError::Invalid(_)) => ErrorKind::Validation,
            WizardError::Passenger(PassengerError::Backend(BackendError::SessionExpired)) => {
                ErrorKind::SessionExpired
            }
            WizardError::Passenger(PassengerError::Backend(_)) | WizardError::Lookup(_) => ErrorKind::Lookup,
            WizardError::CommitFailed(_) => ErrorKind::CommitFailure,
            WizardError::SessionExpired => ErrorKind::SessionExpired,
            WizardError::NoSession
            | WizardError::InvalidTransition { .. }
            | WizardError::CommitInFlight
            | WizardError::Stale { .. } => ErrorKind::InvalidState,
        }
    }

    /// The field a validation failure refers to, if any
    pub fn field(&self) -> Option<&str> {
        match self {
            WizardError::Validation { field, .. } => Some(field),
            WizardError::Build(BuildError::MissingField(field)) => Some(field),
            WizardError::Selection(_) => Some("trip_occurrence_id"),
            WizardError::Ledger(LedgerError::ExceedsRemaining { .. } | LedgerError::NonPositiveAmount { .. }) => {
                Some("amount_cents")
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use transit_core::mock::MockBookingBackend;
    use transit_core::payment::PayerIdentification;
    use transit_core::{FarePrice, FareType, ReferenceOption};
    use transit_shared::pii::Masked;

    use crate::checkout::CardWidget;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    fn trip(date: NaiveDate, hour: u32) -> TripOccurrence {
        TripOccurrence {
            id: Uuid::new_v4(),
            origin: "Rosario".to_string(),
            destination: "Funes".to_string(),
            departure_date: date,
            departure_time: NaiveTime::from_hms_opt(hour, 0, 0).unwrap(),
            capacity: 19,
            reserved: 0,
            prices: vec![
                FarePrice { fare_type: FareType::OneWay, amount_cents: 2000 },
                FarePrice { fare_type: FareType::RoundTrip, amount_cents: 3500 },
            ],
        }
    }

    fn ana() -> Passenger {
        PassengerDraft::new("Ana", "Gómez", "30111222")
            .unwrap()
            .into_passenger(Uuid::new_v4())
    }

    fn one_way() -> LegDetails {
        LegDetails {
            fare_type: FareType::OneWay,
            pickup_id: "12".to_string(),
            dropoff_id: "40".to_string(),
            collect_payment: true,
        }
    }

    fn card() -> CardPayment {
        CardPayment {
            token: Masked::from("tok_single_use"),
            installments: 1,
            payment_method_id: "visa".to_string(),
            payer_email: Masked::from("ana@example.com"),
            identification: PayerIdentification {
                kind: "DNI".to_string(),
                number: Masked::from("30111222"),
            },
        }
    }

    fn wizard(backend: Arc<MockBookingBackend>) -> BookingWizard {
        let references = Arc::new(ReferenceCache::new(backend.clone()));
        BookingWizard::new(backend, references, WizardSettings::default())
    }

    #[derive(Default)]
    struct Counter {
        mounted: Arc<AtomicUsize>,
        unmounted: Arc<AtomicUsize>,
    }

    struct Widget(Arc<AtomicUsize>);

    impl CardWidget for Widget {
        fn unmount(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl WidgetMount for Counter {
        fn mount(&self, _amount_cents: i64) -> Box<dyn CardWidget> {
            self.mounted.fetch_add(1, Ordering::SeqCst);
            Box::new(Widget(self.unmounted.clone()))
        }
    }

    #[test]
    fn test_steps_must_run_in_order() {
        let mut wizard = wizard(Arc::new(MockBookingBackend::new()));
        assert!(matches!(wizard.submit_details(one_way()), Err(WizardError::NoSession)));

        wizard.open(trip(day(14), 7));
        let err = wizard.submit_details(one_way()).unwrap_err();
        assert_eq!(
            err,
            WizardError::InvalidTransition {
                from: WizardStep::SelectPassenger,
                to: WizardStep::ConfirmAndPay
            }
        );
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[test]
    fn test_nil_passenger_rejected() {
        let mut wizard = wizard(Arc::new(MockBookingBackend::new()));
        wizard.open(trip(day(14), 7));

        let mut nobody = ana();
        nobody.id = Uuid::nil();
        let err = wizard.select_passenger(nobody).unwrap_err();
        assert_eq!(err.field(), Some("passenger"));
        assert_eq!(wizard.step(), Some(WizardStep::SelectPassenger));
    }

    #[test]
    fn test_missing_dropoff_is_a_field_error() {
        let mut wizard = wizard(Arc::new(MockBookingBackend::new()));
        wizard.open(trip(day(14), 7));
        wizard.select_passenger(ana()).unwrap();

        let mut details = one_way();
        details.dropoff_id = " ".to_string();
        let err = wizard.submit_details(details).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.field(), Some("dropoff_id"));
        assert_eq!(wizard.step(), Some(WizardStep::AddDetails));
    }

    #[tokio::test]
    async fn test_unknown_address_rejected_once_references_loaded() {
        let backend = Arc::new(MockBookingBackend::new().with_references(
            ReferenceKind::PickupAddresses,
            vec![ReferenceOption::new("12", "Terminal Rosario")],
        ));
        let mut wizard = wizard(backend);
        wizard.open(trip(day(14), 7));
        wizard.load_references().await.unwrap();
        wizard.select_passenger(ana()).unwrap();

        let mut details = one_way();
        details.pickup_id = "99".to_string();
        let err = wizard.submit_details(details).unwrap_err();
        assert_eq!(err.to_string(), "Unknown pickup address '99'");

        assert_eq!(wizard.submit_details(one_way()).unwrap(), WizardStep::ConfirmAndPay);
    }

    #[tokio::test]
    async fn test_stale_commit_result_is_ignored_after_cancel() {
        let backend = Arc::new(MockBookingBackend::new());
        let mut wizard = wizard(backend.clone());
        wizard.open(trip(day(14), 7));
        wizard.select_passenger(ana()).unwrap();
        wizard.submit_details(one_way()).unwrap();

        let pending = wizard.prepare_commit().unwrap();
        let result = backend.create_reservation(&pending.request).await;
        wizard.cancel();

        let err = wizard.finish_commit(pending, result).unwrap_err();
        assert!(matches!(err, WizardError::Stale { .. }));
        assert_eq!(wizard.step(), Some(WizardStep::Cancelled));
        assert!(wizard.session().is_none());
    }

    #[tokio::test]
    async fn test_second_commit_refused_while_submitting() {
        let mut wizard = wizard(Arc::new(MockBookingBackend::new()));
        wizard.open(trip(day(14), 7));
        wizard.select_passenger(ana()).unwrap();
        wizard.submit_details(one_way()).unwrap();

        let _pending = wizard.prepare_commit().unwrap();
        assert_eq!(wizard.prepare_commit().unwrap_err(), WizardError::CommitInFlight);
        assert!(!wizard.can_commit());

        let summary = wizard.summary().unwrap();
        assert!(summary.submitting);
        assert!(!summary.can_commit);
    }

    #[tokio::test]
    async fn test_commit_retry_reuses_idempotency_key() {
        let backend = Arc::new(MockBookingBackend::new());
        let mut wizard = wizard(backend.clone());
        wizard.open(trip(day(14), 7));
        wizard.select_passenger(ana()).unwrap();
        wizard.submit_details(one_way()).unwrap();

        let first = wizard.prepare_commit().unwrap();
        let err = wizard
            .finish_commit(first.clone(), Err(BackendError::Transport("timed out".to_string())))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CommitFailure);

        let second = wizard.prepare_commit().unwrap();
        assert_eq!(second.request.idempotency_key, first.request.idempotency_key);

        // the timed-out attempt had in fact landed; the retry must not book twice
        let landed = backend.create_reservation(&first.request).await.unwrap();
        let result = backend.create_reservation(&second.request).await;
        let receipt = wizard.finish_commit(second, result).unwrap();
        assert_eq!(receipt.reservation_id, landed);
        assert_eq!(backend.reservations().await.len(), 1);
    }

    #[tokio::test]
    async fn test_declined_charge_gets_a_fresh_idempotency_key() {
        let backend = Arc::new(MockBookingBackend::new().with_charge_status("rejected"));
        let mut wizard = wizard(backend.clone());
        wizard.open(trip(day(14), 7));
        wizard.select_passenger(ana()).unwrap();
        wizard.submit_details(one_way()).unwrap();

        let outcome = wizard.checkout(card()).await.unwrap();
        assert!(matches!(outcome, CheckoutOutcome::Declined { .. }));

        backend.set_charge_status("approved").await;
        let outcome = wizard.checkout(card()).await.unwrap();
        assert!(matches!(outcome, CheckoutOutcome::Approved { .. }));

        let charges = backend.charges().await;
        assert_eq!(charges.len(), 2);
        assert_ne!(charges[0].idempotency_key, charges[1].idempotency_key);
    }

    #[tokio::test]
    async fn test_created_passenger_is_selected() {
        let backend = Arc::new(MockBookingBackend::new());
        let mut wizard = wizard(backend.clone());
        wizard.open(trip(day(14), 7));
        let draft = PassengerDraft::new("Luis", "Pérez", "28999000").unwrap();

        backend.fail_next(BackendError::SessionExpired).await;
        let err = wizard.create_passenger(draft.clone()).await.unwrap_err();
        assert_eq!(err, WizardError::SessionExpired);
        assert!(wizard.summary().unwrap().requires_reauthentication);
        assert_eq!(wizard.step(), Some(WizardStep::SelectPassenger));

        let passenger = wizard.create_passenger(draft).await.unwrap();
        assert_eq!(wizard.step(), Some(WizardStep::AddDetails));

        let chosen = wizard.summary().unwrap().passenger.unwrap();
        assert_eq!(chosen.id, passenger.id);
        assert_eq!(chosen.name, "Luis Pérez");
        assert_eq!(backend.search_passengers("28999000").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_created_passenger_dropped_after_reopen() {
        let backend = Arc::new(MockBookingBackend::new());
        let mut wizard = wizard(backend.clone());
        wizard.open(trip(day(14), 7));

        let pending = wizard
            .prepare_passenger(PassengerDraft::new("Luis", "Pérez", "28999000").unwrap())
            .unwrap();
        wizard.open(trip(day(15), 7));

        let err = wizard.apply_created_passenger(pending.ticket, Ok(ana())).unwrap_err();
        assert!(matches!(err, WizardError::Stale { .. }));
        assert!(wizard.summary().unwrap().passenger.is_none());
    }

    #[tokio::test]
    async fn test_default_method_settles_implicit_payment() {
        let backend = Arc::new(MockBookingBackend::new());
        let mut wizard = wizard(backend.clone());
        wizard.open(trip(day(14), 7));
        wizard.select_passenger(ana()).unwrap();
        wizard.submit_details(one_way()).unwrap();

        wizard.set_default_method(PaymentMethod::Transfer).unwrap();
        assert_eq!(wizard.summary().unwrap().default_method, PaymentMethod::Transfer);

        let receipt = wizard.commit().await.unwrap();
        let expected = vec![PaymentEntry::new(PaymentMethod::Transfer, 2000)];
        assert_eq!(receipt.payments, expected);
        assert_eq!(backend.reservations().await[0].payments, expected);
    }

    #[tokio::test]
    async fn test_failed_commit_preserves_session() {
        let backend = Arc::new(MockBookingBackend::new());
        let mut wizard = wizard(backend.clone());
        wizard.open(trip(day(14), 7));
        wizard.select_passenger(ana()).unwrap();
        wizard.submit_details(one_way()).unwrap();
        wizard.add_payment(PaymentMethod::Cash, 2000).unwrap();
        let before = wizard.summary().unwrap();

        backend
            .fail_next(BackendError::Rejected {
                status: 500,
                message: "boom".to_string(),
            })
            .await;
        let err = wizard.commit().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CommitFailure);

        let after = wizard.summary().unwrap();
        assert_eq!(after.step, WizardStep::ConfirmAndPay);
        assert_eq!(after.drafts, before.drafts);
        assert_eq!(after.payments, before.payments);
        assert!(after.last_failure.is_some());

        let receipt = wizard.commit().await.unwrap();
        assert_eq!(receipt.total_cents, 2000);
        assert_eq!(wizard.step(), Some(WizardStep::Committed));
    }

    #[tokio::test]
    async fn test_session_expired_blocks_commit_until_reauthenticated() {
        let backend = Arc::new(MockBookingBackend::new());
        let mut wizard = wizard(backend.clone());
        wizard.open(trip(day(14), 7));
        wizard.select_passenger(ana()).unwrap();
        wizard.submit_details(one_way()).unwrap();

        backend.fail_next(BackendError::SessionExpired).await;
        let err = wizard.commit().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SessionExpired);
        assert!(wizard.summary().unwrap().requires_reauthentication);

        assert_eq!(wizard.commit().await.unwrap_err(), WizardError::SessionExpired);
        assert!(backend.reservations().await.is_empty());

        wizard.reauthenticated().unwrap();
        wizard.commit().await.unwrap();
        assert_eq!(backend.reservations().await.len(), 1);
    }

    #[tokio::test]
    async fn test_widget_owned_by_confirm_step() {
        let counter = Arc::new(Counter::default());
        let backend = Arc::new(MockBookingBackend::new());
        let mut wizard = wizard(backend).with_widget_mount(counter.clone());

        wizard.open(trip(day(14), 7));
        wizard.select_passenger(ana()).unwrap();
        assert!(!wizard.widget_mounted());

        wizard.submit_details(one_way()).unwrap();
        assert!(wizard.widget_mounted());
        assert_eq!(counter.mounted.load(Ordering::SeqCst), 1);

        wizard.cancel();
        assert!(!wizard.widget_mounted());
        assert_eq!(counter.unmounted.load(Ordering::SeqCst), 1);

        // reopening does not resurrect the old widget
        wizard.open(trip(day(15), 7));
        assert!(!wizard.widget_mounted());
        assert_eq!(counter.unmounted.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reopen_starts_fresh_session() {
        let mut wizard = wizard(Arc::new(MockBookingBackend::new()));
        let first = wizard.open(trip(day(14), 7));
        wizard.select_passenger(ana()).unwrap();

        let second = wizard.open(trip(day(15), 9));
        assert!(second.generation > first.generation);

        let summary = wizard.summary().unwrap();
        assert_eq!(summary.step, WizardStep::SelectPassenger);
        assert!(summary.passenger.is_none());
        assert_eq!(summary.outbound.departure_date, day(15));
    }

    #[tokio::test]
    async fn test_events_announced() {
        let (tx, mut rx) = broadcast::channel(8);
        let mut wizard = wizard(Arc::new(MockBookingBackend::new())).with_events(tx);

        wizard.open(trip(day(14), 7));
        wizard.select_passenger(ana()).unwrap();
        wizard.submit_details(one_way()).unwrap();
        wizard.commit().await.unwrap();

        match rx.recv().await.unwrap() {
            BookingEvent::ReservationCommitted(event) => {
                assert_eq!(event.total_cents, 2000);
                assert_eq!(event.payment_count, 1);
                assert!(!event.paid_by_card);
            }
            other => panic!("unexpected event {:?}", other),
        }

        wizard.open(trip(day(15), 7));
        wizard.cancel();
        assert!(matches!(rx.recv().await.unwrap(), BookingEvent::WizardCancelled(_)));
    }

    #[test]
    fn test_error_kinds() {
        let mismatch = WizardError::from(LedgerError::Mismatch {
            total_owed_cents: 5000,
            collected_cents: 3000,
        });
        assert_eq!(mismatch.kind(), ErrorKind::Reconciliation);

        let over = WizardError::from(LedgerError::ExceedsRemaining {
            amount_cents: 3000,
            remaining_cents: 2000,
        });
        assert_eq!(over.kind(), ErrorKind::Validation);
        assert_eq!(over.field(), Some("amount_cents"));

        assert_eq!(
            WizardError::Lookup(BackendError::Transport("down".to_string())).kind(),
            ErrorKind::Lookup
        );
    }
}
