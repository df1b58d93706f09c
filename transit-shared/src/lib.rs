pub mod models;
pub mod money;
pub mod pii;

pub use models::events::BookingEvent;
pub use money::format_cents;
pub use pii::Masked;
