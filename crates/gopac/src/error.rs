use crate::config::ConfigError;
use crate::mail::MailError;
use crate::telemetry::TelemetryError;
use crate::workflows::accounts::AccountError;
use crate::workflows::requests::{DocumentError, WorkflowError};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::fmt;

/// Failures raised while starting or operating the portal outside a workflow call.
#[derive(Debug)]
pub enum AppError {
    Config(ConfigError),
    Telemetry(TelemetryError),
    Io(std::io::Error),
    Server(axum::Error),
    Mail(MailError),
    Storage(DocumentError),
    Workflow(WorkflowError),
    Account(AccountError),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Config(err) => write!(f, "configuration error: {}", err),
            AppError::Telemetry(err) => write!(f, "telemetry error: {}", err),
            AppError::Io(err) => write!(f, "io error: {}", err),
            AppError::Server(err) => write!(f, "server error: {}", err),
            AppError::Mail(err) => write!(f, "mail error: {}", err),
            AppError::Storage(err) => write!(f, "document storage error: {}", err),
            AppError::Workflow(err) => write!(f, "request workflow error: {}", err),
            AppError::Account(err) => write!(f, "account error: {}", err),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Config(err) => Some(err),
            AppError::Telemetry(err) => Some(err),
            AppError::Io(err) => Some(err),
            AppError::Server(err) => Some(err),
            AppError::Mail(err) => Some(err),
            AppError::Storage(err) => Some(err),
            AppError::Workflow(err) => Some(err),
            AppError::Account(err) => Some(err),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::Workflow(err) => return crate::workflows::requests::router::error_response(err),
            AppError::Account(err) => return crate::workflows::accounts::router::error_response(err),
            AppError::Storage(DocumentError::NotFound(_)) => StatusCode::NOT_FOUND,
            AppError::Storage(DocumentError::InvalidKey(_)) => StatusCode::BAD_REQUEST,
            AppError::Mail(MailError::InvalidAddress(_)) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Mail(_) => StatusCode::BAD_GATEWAY,
            AppError::Config(_)
            | AppError::Telemetry(_)
            | AppError::Io(_)
            | AppError::Server(_)
            | AppError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

impl From<ConfigError> for AppError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<TelemetryError> for AppError {
    fn from(value: TelemetryError) -> Self {
        Self::Telemetry(value)
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<axum::Error> for AppError {
    fn from(value: axum::Error) -> Self {
        Self::Server(value)
    }
}

impl From<MailError> for AppError {
    fn from(value: MailError) -> Self {
        Self::Mail(value)
    }
}

impl From<DocumentError> for AppError {
    fn from(value: DocumentError) -> Self {
        Self::Storage(value)
    }
}

impl From<WorkflowError> for AppError {
    fn from(value: WorkflowError) -> Self {
        Self::Workflow(value)
    }
}

impl From<AccountError> for AppError {
    fn from(value: AccountError) -> Self {
        Self::Account(value)
    }
}
