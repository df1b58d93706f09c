use serde::{Deserialize, Serialize};
use transit_shared::pii::Masked;
use uuid::Uuid;

use crate::{CoreError, CoreResult};

/// A passenger record owned by the backend; the wizard only references it by id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Passenger {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub document_number: Masked<String>,
    pub email: Option<Masked<String>>,
    pub phone: Option<String>,
}

impl Passenger {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// Fields needed to create a passenger on demand. Name and document are
/// required; contact fields are optional.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PassengerDraft {
    pub first_name: String,
    pub last_name: String,
    pub document_number: Masked<String>,
    #[serde(default)]
    pub email: Option<Masked<String>>,
    #[serde(default)]
    pub phone: Option<String>,
}

impl PassengerDraft {
    pub fn new(
        first_name: impl Into<String>,
        last_name: impl Into<String>,
        document_number: impl Into<String>,
    ) -> CoreResult<Self> {
        let draft = Self {
            first_name: first_name.into(),
            last_name: last_name.into(),
            document_number: Masked(document_number.into()),
            email: None,
            phone: None,
        };
        draft.validate()?;
        Ok(draft)
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(Masked(email.into()));
        self
    }

    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    /// Required fields must be present. Drafts that arrive through serde skip
    /// `new`, so callers validate again before sending them anywhere.
    pub fn validate(&self) -> CoreResult<()> {
        if self.first_name.trim().is_empty() {
            return Err(CoreError::validation("first_name", "first name is required"));
        }
        if self.last_name.trim().is_empty() {
            return Err(CoreError::validation("last_name", "last name is required"));
        }
        if self.document_number.expose().trim().is_empty() {
            return Err(CoreError::validation(
                "document_number",
                "document number is required",
            ));
        }
        Ok(())
    }

    pub fn into_passenger(self, id: Uuid) -> Passenger {
        Passenger {
            id,
            first_name: self.first_name,
            last_name: self.last_name,
            document_number: self.document_number,
            email: self.email,
            phone: self.phone,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_draft_requires_document() {
        let err = PassengerDraft::new("Ana", "Gómez", "  ").unwrap_err();
        assert_eq!(
            err,
            CoreError::validation("document_number", "document number is required")
        );
    }

    #[test]
    fn test_draft_into_passenger_keeps_contact() {
        let draft = PassengerDraft::new("Ana", "Gómez", "30111222")
            .unwrap()
            .with_email("ana@example.com")
            .with_phone("+54 341 555 0101");
        let id = Uuid::new_v4();

        let passenger = draft.into_passenger(id);
        assert_eq!(passenger.id, id);
        assert_eq!(passenger.full_name(), "Ana Gómez");
        assert_eq!(passenger.email.unwrap().expose(), "ana@example.com");
    }

    #[test]
    fn test_passenger_debug_masks_document() {
        let passenger = PassengerDraft::new("Ana", "Gómez", "30111222")
            .unwrap()
            .into_passenger(Uuid::nil());
        assert!(!format!("{:?}", passenger).contains("30111222"));
    }
}
