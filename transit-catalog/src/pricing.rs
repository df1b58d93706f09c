use serde::{Deserialize, Serialize};
use transit_core::{FareType, Leg, TripOccurrence};
use uuid::Uuid;

/// What to do when an occurrence's price table has no entry for the fare type
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MissingPricePolicy {
    /// Price the line at 0 and keep going
    #[default]
    DefaultToZero,
    /// Refuse to build the line
    Reject,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PricingConfig {
    #[serde(default)]
    pub missing_price_policy: MissingPricePolicy,
}

/// Resolves the unit price of a reservation line from a trip's price table
#[derive(Debug, Clone, Default)]
pub struct FareResolver {
    config: PricingConfig,
}

impl FareResolver {
    pub fn new(config: PricingConfig) -> Self {
        Self { config }
    }

    pub fn policy(&self) -> MissingPricePolicy {
        self.config.missing_price_policy
    }

    /// Unit price for `fare_type` on `occurrence`, subject to the missing-price policy
    pub fn unit_price(&self, occurrence: &TripOccurrence, fare_type: FareType) -> Result<i64, PricingError> {
        match occurrence.price_for(fare_type) {
            Some(amount) if amount < 0 => Err(PricingError::NegativePrice {
                occurrence_id: occurrence.id,
                amount_cents: amount,
            }),
            Some(amount) => Ok(amount),
            None => match self.config.missing_price_policy {
                MissingPricePolicy::DefaultToZero => {
                    tracing::warn!(
                        "No {:?} price for trip {} ({}), defaulting to 0",
                        fare_type,
                        occurrence.route(),
                        occurrence.id
                    );
                    Ok(0)
                }
                MissingPricePolicy::Reject => Err(PricingError::MissingPrice {
                    occurrence_id: occurrence.id,
                    route: occurrence.route(),
                    fare_type,
                }),
            },
        }
    }

    /// Price contribution of one leg. A round-trip fare is charged once on the
    /// outbound leg, so the return leg always contributes 0.
    pub fn leg_price(
        &self,
        occurrence: &TripOccurrence,
        fare_type: FareType,
        leg: Leg,
    ) -> Result<i64, PricingError> {
        match (leg, fare_type) {
            (Leg::Return, FareType::RoundTrip) => Ok(0),
            _ => self.unit_price(occurrence, fare_type),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PricingError {
    #[error("No {fare_type:?} price configured for trip {route} ({occurrence_id})")]
    MissingPrice {
        occurrence_id: Uuid,
        route: String,
        fare_type: FareType,
    },

    #[error("Trip {occurrence_id} has a negative price: {amount_cents}")]
    NegativePrice { occurrence_id: Uuid, amount_cents: i64 },
}
