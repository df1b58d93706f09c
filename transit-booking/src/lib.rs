pub mod builder;
pub mod checkout;
pub mod ledger;
pub mod models;
pub mod passenger;
pub mod wizard;

pub use builder::{BuildError, ReservationLineBuilder};
pub use checkout::{CardCheckout, CardPayment, CardWidget, CheckoutError, CheckoutOutcome, WidgetLease, WidgetMount};
pub use ledger::{LedgerError, PaymentLedger};
pub use models::{CommitReceipt, LegDetails, ReturnLegDetails, SessionSummary, WizardSession, WizardSettings, WizardStep};
pub use passenger::{PassengerError, PassengerResolver, PassengerSearch, SearchOutcome};
pub use wizard::{BookingWizard, ErrorKind, PendingCharge, PendingCommit, PendingLookup, PendingPassenger, SessionTicket, WizardError};
