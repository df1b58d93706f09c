pub mod pricing;
pub mod reference;
pub mod selector;

pub use pricing::{FareResolver, MissingPricePolicy, PricingConfig, PricingError};
pub use reference::{ReferenceCache, ReferenceSnapshot};
pub use selector::{Candidates, LookupTicket, ReturnTripPicker, SelectionError, TripOccurrenceSelector};
