use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tracing::error;

use super::service::{AccountError, AccountService, Registration, SignIn};
use crate::workflows::actor::Actor;
use crate::workflows::requests::{DirectoryRepository, RepositoryError, WorkflowRepository};

type Service<R> = Arc<AccountService<R>>;

pub fn account_router<R>(service: Service<R>) -> Router
where
    R: DirectoryRepository + WorkflowRepository + 'static,
{
    Router::new()
        .route("/api/v1/accounts/register", post(register_handler::<R>))
        .route("/api/v1/accounts/sign-in", post(sign_in_handler::<R>))
        .route("/api/v1/accounts/me", get(profile_handler::<R>))
        .route("/api/v1/departments", get(departments_handler::<R>))
        .with_state(service)
}

fn status_for(error: &AccountError) -> StatusCode {
    match error {
        AccountError::Validation(_) | AccountError::UnknownDepartment(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        AccountError::EmailTaken | AccountError::RoleTaken { .. } => StatusCode::CONFLICT,
        AccountError::InvalidCredentials | AccountError::UnknownUser => StatusCode::UNAUTHORIZED,
        AccountError::RoleMismatch(_) | AccountError::DepartmentMismatch => StatusCode::FORBIDDEN,
        AccountError::Repository(RepositoryError::Conflict) => StatusCode::CONFLICT,
        AccountError::Hashing(_) | AccountError::Repository(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

pub(crate) fn error_response(error: AccountError) -> Response {
    let status = status_for(&error);
    if status.is_server_error() {
        error!(error = %error, "account call failed");
    }
    (status, Json(json!({ "error": error.to_string() }))).into_response()
}

fn respond<T: serde::Serialize>(status: StatusCode, result: Result<T, AccountError>) -> Response {
    match result {
        Ok(value) => (status, Json(value)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn register_handler<R>(
    State(service): State<Service<R>>,
    Json(form): Json<Registration>,
) -> Response
where
    R: DirectoryRepository + WorkflowRepository + 'static,
{
    respond(StatusCode::CREATED, service.register(form).await)
}

pub(crate) async fn sign_in_handler<R>(
    State(service): State<Service<R>>,
    Json(form): Json<SignIn>,
) -> Response
where
    R: DirectoryRepository + WorkflowRepository + 'static,
{
    respond(StatusCode::OK, service.sign_in(form).await)
}

pub(crate) async fn profile_handler<R>(
    State(service): State<Service<R>>,
    Actor(actor): Actor,
) -> Response
where
    R: DirectoryRepository + WorkflowRepository + 'static,
{
    respond(StatusCode::OK, service.profile(&actor))
}

pub(crate) async fn departments_handler<R>(State(service): State<Service<R>>) -> Response
where
    R: DirectoryRepository + WorkflowRepository + 'static,
{
    respond(StatusCode::OK, service.departments())
}
