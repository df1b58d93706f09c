pub mod app_config;
pub mod credentials;
pub mod http_backend;

pub use app_config::Config;
pub use credentials::{CredentialProvider, RefreshingCredentials, StaticCredentials};
pub use http_backend::{AuthenticatedClient, HttpBookingBackend};
