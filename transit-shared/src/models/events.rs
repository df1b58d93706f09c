use uuid::Uuid;

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq)]
pub struct ReservationCommittedEvent {
    pub reservation_id: String,
    pub passenger_id: Uuid,
    pub trip_occurrence_ids: Vec<Uuid>,
    pub total_cents: i64,
    pub payment_count: usize,
    pub paid_by_card: bool,
    pub timestamp: i64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq)]
pub struct CardChargeDeclinedEvent {
    pub passenger_id: Uuid,
    pub status: String,
    pub reserve_id: Option<String>,
    pub amount_cents: i64,
    pub timestamp: i64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq)]
pub struct WizardCancelledEvent {
    pub trip_occurrence_id: Uuid,
    pub generation: u64,
    pub timestamp: i64,
}

/// Everything the booking wizard announces to listeners (SSE clients, audit log).
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingEvent {
    ReservationCommitted(ReservationCommittedEvent),
    CardChargeDeclined(CardChargeDeclinedEvent),
    WizardCancelled(WizardCancelledEvent),
}

impl BookingEvent {
    pub fn name(&self) -> &'static str {
        match self {
            BookingEvent::ReservationCommitted(_) => "reservation.committed",
            BookingEvent::CardChargeDeclined(_) => "card_charge.declined",
            BookingEvent::WizardCancelled(_) => "wizard.cancelled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_is_tagged_by_type() {
        let event = BookingEvent::CardChargeDeclined(CardChargeDeclinedEvent {
            passenger_id: Uuid::nil(),
            status: "rejected".to_string(),
            reserve_id: None,
            amount_cents: 2000,
            timestamp: 0,
        });

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "CARD_CHARGE_DECLINED");
        assert_eq!(json["status"], "rejected");
        assert_eq!(event.name(), "card_charge.declined");
    }
}
