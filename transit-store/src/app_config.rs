use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;
use transit_catalog::{MissingPricePolicy, PricingConfig};
use transit_core::PaymentMethod;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub backend: BackendConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub booking: BookingRules,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

/// Where the reservation backend lives
#[derive(Debug, Deserialize, Clone)]
pub struct BackendConfig {
    pub base_url: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl BackendConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_timeout_ms() -> u64 {
    10_000
}

/// Bearer credentials for the backend. Without a refresh token an expired
/// access token cannot be renewed.
#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub access_token: String,
    pub refresh_token: Option<String>,
    #[serde(default = "default_refresh_path")]
    pub refresh_path: String,
}

fn default_refresh_path() -> String {
    "/auth/refresh".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct BookingRules {
    #[serde(default = "default_payment_method")]
    pub default_payment_method: PaymentMethod,
    #[serde(default)]
    pub missing_price_policy: MissingPricePolicy,
    #[serde(default = "default_search_debounce_ms")]
    pub search_debounce_ms: u64,
    #[serde(default = "default_currency")]
    pub currency: String,
}

impl Default for BookingRules {
    fn default() -> Self {
        Self {
            default_payment_method: default_payment_method(),
            missing_price_policy: MissingPricePolicy::default(),
            search_debounce_ms: default_search_debounce_ms(),
            currency: default_currency(),
        }
    }
}

impl BookingRules {
    pub fn pricing(&self) -> PricingConfig {
        PricingConfig {
            missing_price_policy: self.missing_price_policy,
        }
    }

    pub fn search_delay(&self) -> Duration {
        Duration::from_millis(self.search_debounce_ms)
    }
}

fn default_payment_method() -> PaymentMethod {
    PaymentMethod::Cash
}

fn default_search_debounce_ms() -> u64 {
    500
}

fn default_currency() -> String {
    "ARS".to_string()
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // optional per-environment overrides
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // not checked in
            .add_source(config::File::with_name("config/local").required(false))
            // e.g. TRANSIT__BACKEND__BASE_URL
            .add_source(config::Environment::with_prefix("TRANSIT").separator("__"))
            .build()?;

        s.try_deserialize()
    }

    /// Load a single explicit file, no environment layering
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_booking_section_defaults() {
        let file = write_config(
            r#"
            [server]
            port = 8080

            [backend]
            base_url = "http://localhost:9000"

            [auth]
            access_token = "tok"
            "#,
        );

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.backend.timeout(), Duration::from_secs(10));
        assert_eq!(config.auth.refresh_path, "/auth/refresh");
        assert!(config.auth.refresh_token.is_none());
        assert_eq!(config.booking.default_payment_method, PaymentMethod::Cash);
        assert_eq!(config.booking.missing_price_policy, MissingPricePolicy::DefaultToZero);
        assert_eq!(config.booking.search_delay(), Duration::from_millis(500));
        assert_eq!(config.booking.currency, "ARS");
    }

    #[test]
    fn test_booking_rules_override() {
        let file = write_config(
            r#"
            [server]
            port = 8080

            [backend]
            base_url = "http://localhost:9000"
            timeout_ms = 2500

            [auth]
            access_token = "tok"
            refresh_token = "refresh"

            [booking]
            default_payment_method = "TRANSFER"
            missing_price_policy = "reject"
            search_debounce_ms = 300
            "#,
        );

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.backend.timeout_ms, 2500);
        assert_eq!(config.auth.refresh_token.as_deref(), Some("refresh"));
        assert_eq!(config.booking.default_payment_method, PaymentMethod::Transfer);
        assert_eq!(config.booking.pricing().missing_price_policy, MissingPricePolicy::Reject);
        assert_eq!(config.booking.search_debounce_ms, 300);
    }

    #[test]
    fn test_missing_backend_section_fails() {
        let file = write_config(
            r#"
            [server]
            port = 8080
            "#,
        );
        assert!(Config::from_file(file.path()).is_err());
    }
}
