use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Wraps sensitive values (card tokens, document numbers, payer emails) so that
/// `Debug` and `Display` never print them. Serialization passes the real value
/// through because the backend needs it.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Masked<T>(pub T);

impl<T> fmt::Debug for Masked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "********")
    }
}

impl<T> fmt::Display for Masked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "********")
    }
}

impl<T: Serialize> Serialize for Masked<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.0.serialize(serializer)
    }
}

impl<T> Masked<T> {
    pub fn expose(&self) -> &T {
        &self.0
    }

    pub fn into_inner(self) -> T {
        self.0
    }
}

impl From<String> for Masked<String> {
    fn from(value: String) -> Self {
        Masked(value)
    }
}

impl From<&str> for Masked<String> {
    fn from(value: &str) -> Self {
        Masked(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_masked_hides_value_in_debug() {
        let token = Masked::from("tok_live_123");
        assert_eq!(format!("{:?}", token), "********");
        assert_eq!(token.to_string(), "********");
        assert_eq!(token.expose(), "tok_live_123");
    }

    #[test]
    fn test_masked_serializes_inner_value() {
        let token = Masked::from("tok_live_123");
        let json = serde_json::to_string(&token).unwrap();
        assert_eq!(json, "\"tok_live_123\"");

        let back: Masked<String> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, token);
    }
}
