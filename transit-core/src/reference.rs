use serde::{Deserialize, Serialize};

/// Read-only lookup lists the wizard needs
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    PickupAddresses,
    DropoffAddresses,
    PaymentMethods,
}

impl ReferenceKind {
    pub const ALL: [ReferenceKind; 3] = [
        ReferenceKind::PickupAddresses,
        ReferenceKind::DropoffAddresses,
        ReferenceKind::PaymentMethods,
    ];

    pub fn path_segment(self) -> &'static str {
        match self {
            ReferenceKind::PickupAddresses => "pickup-addresses",
            ReferenceKind::DropoffAddresses => "dropoff-addresses",
            ReferenceKind::PaymentMethods => "payment-methods",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReferenceOption {
    pub id: String,
    pub label: String,
}

impl ReferenceOption {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
        }
    }
}
