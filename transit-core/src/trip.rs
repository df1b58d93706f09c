use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Fare types a trip occurrence can be priced under
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FareType {
    OneWay,
    /// The price covers both legs; it is charged once, on the outbound leg.
    RoundTrip,
}

impl FareType {
    pub fn is_round_trip(self) -> bool {
        self == FareType::RoundTrip
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FarePrice {
    pub fare_type: FareType,
    pub amount_cents: i64,
}

/// A single scheduled departure (date + hour + route) as published by the
/// scheduling backend. Read-only from the booking side.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TripOccurrence {
    pub id: Uuid,
    pub origin: String,
    pub destination: String,
    pub departure_date: NaiveDate,
    pub departure_time: NaiveTime,
    pub capacity: i32,
    pub reserved: i32,
    #[serde(default)]
    pub prices: Vec<FarePrice>,
}

impl TripOccurrence {
    /// Unit price for a fare type, if the price table has one
    pub fn price_for(&self, fare_type: FareType) -> Option<i64> {
        self.prices
            .iter()
            .find(|p| p.fare_type == fare_type)
            .map(|p| p.amount_cents)
    }

    pub fn seats_remaining(&self) -> i32 {
        (self.capacity - self.reserved).max(0)
    }

    pub fn is_sold_out(&self) -> bool {
        self.seats_remaining() == 0
    }

    pub fn departs_at(&self) -> NaiveDateTime {
        self.departure_date.and_time(self.departure_time)
    }

    pub fn route(&self) -> String {
        format!("{} -> {}", self.origin, self.destination)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn occurrence() -> TripOccurrence {
        TripOccurrence {
            id: Uuid::new_v4(),
            origin: "Rosario".to_string(),
            destination: "Funes".to_string(),
            departure_date: NaiveDate::from_ymd_opt(2026, 3, 14).unwrap(),
            departure_time: NaiveTime::from_hms_opt(7, 30, 0).unwrap(),
            capacity: 19,
            reserved: 17,
            prices: vec![FarePrice {
                fare_type: FareType::OneWay,
                amount_cents: 2000,
            }],
        }
    }

    #[test]
    fn test_price_lookup_by_fare_type() {
        let trip = occurrence();
        assert_eq!(trip.price_for(FareType::OneWay), Some(2000));
        assert_eq!(trip.price_for(FareType::RoundTrip), None);
    }

    #[test]
    fn test_seats_remaining_never_negative() {
        let mut trip = occurrence();
        assert_eq!(trip.seats_remaining(), 2);

        trip.reserved = 25;
        assert_eq!(trip.seats_remaining(), 0);
        assert!(trip.is_sold_out());
    }

    #[test]
    fn test_occurrence_deserialization() {
        let json = r#"
            {
                "id": "7f1c1c3e-8d8b-4a8e-9a51-0c7c2d1e3f40",
                "origin": "Rosario",
                "destination": "Funes",
                "departure_date": "2026-03-14",
                "departure_time": "07:30:00",
                "capacity": 19,
                "reserved": 3,
                "prices": [{ "fare_type": "ROUND_TRIP", "amount_cents": 3500 }]
            }
        "#;
        let trip: TripOccurrence = serde_json::from_str(json).expect("Failed to deserialize");
        assert_eq!(trip.price_for(FareType::RoundTrip), Some(3500));
        assert_eq!(trip.route(), "Rosario -> Funes");
    }
}
