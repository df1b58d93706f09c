use transit_catalog::{FareResolver, PricingError};
use transit_core::{FareType, Leg, Passenger, PassengerReservationDraft, TripOccurrence};

/// Assembles reservation lines from wizard input
#[derive(Debug, Clone, Default)]
pub struct ReservationLineBuilder {
    fares: FareResolver,
}

impl ReservationLineBuilder {
    pub fn new(fares: FareResolver) -> Self {
        Self { fares }
    }

    /// Build one line. The price is resolved here, once, and never changes
    /// for the rest of the session.
    pub fn build(
        &self,
        passenger: &Passenger,
        occurrence: &TripOccurrence,
        fare_type: FareType,
        leg: Leg,
        pickup_id: &str,
        dropoff_id: &str,
    ) -> Result<PassengerReservationDraft, BuildError> {
        if passenger.id.is_nil() {
            return Err(BuildError::MissingField("passenger"));
        }
        if pickup_id.trim().is_empty() {
            return Err(BuildError::MissingField("pickup_id"));
        }
        if dropoff_id.trim().is_empty() {
            return Err(BuildError::MissingField("dropoff_id"));
        }
        if occurrence.is_sold_out() {
            return Err(BuildError::SoldOut {
                route: occurrence.route(),
                departs_at: occurrence.departs_at().to_string(),
            });
        }

        let price_cents = self.fares.leg_price(occurrence, fare_type, leg)?;

        Ok(PassengerReservationDraft {
            leg,
            passenger_id: passenger.id,
            trip_occurrence_id: occurrence.id,
            fare_type,
            pickup_id: pickup_id.trim().to_string(),
            dropoff_id: dropoff_id.trim().to_string(),
            price_cents,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    #[error("{0} is required")]
    MissingField(&'static str),

    #[error("Trip {route} departing {departs_at} has no seats left")]
    SoldOut { route: String, departs_at: String },

    #[error(transparent)]
    Pricing(#[from] PricingError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};
    use transit_catalog::{MissingPricePolicy, PricingConfig};
    use transit_core::{FarePrice, PassengerDraft};
    use uuid::Uuid;

    fn passenger() -> Passenger {
        PassengerDraft::new("Ana", "Gómez", "30111222")
            .unwrap()
            .into_passenger(Uuid::new_v4())
    }

    fn occurrence() -> TripOccurrence {
        TripOccurrence {
            id: Uuid::new_v4(),
            origin: "Rosario".to_string(),
            destination: "Funes".to_string(),
            departure_date: NaiveDate::from_ymd_opt(2026, 3, 14).unwrap(),
            departure_time: NaiveTime::from_hms_opt(7, 30, 0).unwrap(),
            capacity: 19,
            reserved: 4,
            prices: vec![
                FarePrice { fare_type: FareType::OneWay, amount_cents: 2000 },
                FarePrice { fare_type: FareType::RoundTrip, amount_cents: 3500 },
            ],
        }
    }

    #[test]
    fn test_build_outbound_line() {
        let builder = ReservationLineBuilder::default();
        let passenger = passenger();
        let trip = occurrence();

        let line = builder
            .build(&passenger, &trip, FareType::OneWay, Leg::Outbound, " 12 ", "40")
            .unwrap();

        assert_eq!(line.passenger_id, passenger.id);
        assert_eq!(line.trip_occurrence_id, trip.id);
        assert_eq!(line.pickup_id, "12");
        assert_eq!(line.price_cents, 2000);
    }

    #[test]
    fn test_round_trip_return_line_is_zero() {
        let builder = ReservationLineBuilder::default();
        let line = builder
            .build(&passenger(), &occurrence(), FareType::RoundTrip, Leg::Return, "40", "12")
            .unwrap();
        assert_eq!(line.price_cents, 0);
    }

    #[test]
    fn test_missing_pickup_is_reported_by_field() {
        let builder = ReservationLineBuilder::default();
        let err = builder
            .build(&passenger(), &occurrence(), FareType::OneWay, Leg::Outbound, "", "40")
            .unwrap_err();
        assert_eq!(err, BuildError::MissingField("pickup_id"));
    }

    #[test]
    fn test_missing_price_follows_policy() {
        let mut trip = occurrence();
        trip.prices.clear();

        let lenient = ReservationLineBuilder::default();
        let line = lenient
            .build(&passenger(), &trip, FareType::OneWay, Leg::Outbound, "12", "40")
            .unwrap();
        assert_eq!(line.price_cents, 0);

        let strict = ReservationLineBuilder::new(FareResolver::new(PricingConfig {
            missing_price_policy: MissingPricePolicy::Reject,
        }));
        let err = strict
            .build(&passenger(), &trip, FareType::OneWay, Leg::Outbound, "12", "40")
            .unwrap_err();
        assert!(matches!(err, BuildError::Pricing(PricingError::MissingPrice { .. })));
    }

    #[test]
    fn test_sold_out_trip_rejected() {
        let mut trip = occurrence();
        trip.reserved = trip.capacity;

        let err = ReservationLineBuilder::default()
            .build(&passenger(), &trip, FareType::OneWay, Leg::Outbound, "12", "40")
            .unwrap_err();
        assert!(matches!(err, BuildError::SoldOut { .. }));
    }
}
