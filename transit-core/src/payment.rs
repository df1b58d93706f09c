use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use transit_shared::pii::Masked;
use uuid::Uuid;

use crate::reservation::PassengerReservationDraft;
use crate::CoreError;

/// Payment methods a desk agent can record against a reservation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Cash,
    DebitCard,
    CreditCard,
    Transfer,
    CardToken,
}

impl PaymentMethod {
    pub fn code(self) -> &'static str {
        match self {
            PaymentMethod::Cash => "CASH",
            PaymentMethod::DebitCard => "DEBIT_CARD",
            PaymentMethod::CreditCard => "CREDIT_CARD",
            PaymentMethod::Transfer => "TRANSFER",
            PaymentMethod::CardToken => "CARD_TOKEN",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for PaymentMethod {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CASH" => Ok(PaymentMethod::Cash),
            "DEBIT_CARD" => Ok(PaymentMethod::DebitCard),
            "CREDIT_CARD" => Ok(PaymentMethod::CreditCard),
            "TRANSFER" => Ok(PaymentMethod::Transfer),
            "CARD_TOKEN" => Ok(PaymentMethod::CardToken),
            _ => Err(CoreError::UnknownCode {
                kind: "payment method",
                code: s.to_string(),
            }),
        }
    }
}

/// One discrete payment collected against a reservation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaymentEntry {
    pub method: PaymentMethod,
    pub amount_cents: i64,
}

impl PaymentEntry {
    pub fn new(method: PaymentMethod, amount_cents: i64) -> Self {
        Self {
            method,
            amount_cents,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PayerIdentification {
    #[serde(rename = "type")]
    pub kind: String,
    pub number: Masked<String>,
}

/// Tokenized card charge. The backend charges the gateway and records the
/// reservation in one call, whatever the gateway answers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CardChargeRequest {
    pub idempotency_key: Uuid,
    pub token: Masked<String>,
    pub amount_cents: i64,
    pub installments: u32,
    pub payment_method_id: String,
    pub payer_email: Masked<String>,
    pub identification: PayerIdentification,
    pub items: Vec<PassengerReservationDraft>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CardChargeResponse {
    pub status: String,
    #[serde(default)]
    pub reserve_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChargeStatus {
    Approved,
    /// Raw gateway status, kept verbatim for the failure view
    NotApproved(String),
}

impl ChargeStatus {
    pub fn from_raw(status: &str) -> Self {
        if status == "approved" {
            ChargeStatus::Approved
        } else {
            ChargeStatus::NotApproved(status.to_string())
        }
    }

    pub fn is_approved(&self) -> bool {
        matches!(self, ChargeStatus::Approved)
    }
}

impl CardChargeResponse {
    pub fn charge_status(&self) -> ChargeStatus {
        ChargeStatus::from_raw(&self.status)
    }
}
