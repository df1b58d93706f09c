use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use transit_booking::{ErrorKind, PassengerError, WizardError};
use transit_core::BackendError;

#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    Wizard(WizardError),
    Backend(BackendError),
    Anyhow(anyhow::Error),
}

impl AppError {
    fn status_and_kind(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            AppError::Wizard(err) => match err.kind() {
                ErrorKind::Validation => (StatusCode::UNPROCESSABLE_ENTITY, "validation"),
                ErrorKind::Reconciliation => (StatusCode::UNPROCESSABLE_ENTITY, "reconciliation"),
                ErrorKind::Lookup => (StatusCode::BAD_GATEWAY, "lookup"),
                ErrorKind::CommitFailure => (StatusCode::BAD_GATEWAY, "commit_failure"),
                ErrorKind::SessionExpired => (StatusCode::UNAUTHORIZED, "session_expired"),
                ErrorKind::InvalidState => (StatusCode::CONFLICT, "invalid_state"),
            },
            AppError::Backend(BackendError::SessionExpired) => (StatusCode::UNAUTHORIZED, "session_expired"),
            AppError::Backend(_) => (StatusCode::BAD_GATEWAY, "lookup"),
            AppError::Anyhow(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, kind) = self.status_and_kind();
        let mut body = json!({ "kind": kind });

        match self {
            AppError::NotFound(msg) => body["error"] = json!(msg),
            AppError::Wizard(err) => {
                if status.is_server_error() {
                    tracing::error!("Wizard operation failed: {}", err);
                }
                body["error"] = json!(err.to_string());
                if let Some(field) = err.field() {
                    body["field"] = json!(field);
                }
            }
            AppError::Backend(err) => {
                tracing::error!("Backend call failed: {}", err);
                body["error"] = json!(err.to_string());
            }
            AppError::Anyhow(err) => {
                tracing::error!("Internal Server Error: {}", err);
                body["error"] = json!("Internal Server Error");
            }
        }

        (status, Json(body)).into_response()
    }
}

impl From<WizardError> for AppError {
    fn from(err: WizardError) -> Self {
        Self::Wizard(err)
    }
}

impl From<PassengerError> for AppError {
    fn from(err: PassengerError) -> Self {
        Self::Wizard(WizardError::Passenger(err))
    }
}

impl From<BackendError> for AppError {
    fn from(err: BackendError) -> Self {
        Self::Backend(err)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::Anyhow(err)
    }
}
