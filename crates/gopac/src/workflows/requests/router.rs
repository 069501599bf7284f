use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{header, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{delete, get, post},
    Json, Router,
};
use futures::stream::{self, Stream};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{error, warn};

use super::catalog::request_types;
use super::documents::{DocumentError, DocumentUpload};
use super::domain::{NotificationId, RequestId, RequestStatus};
use super::messaging::NewMessage;
use super::realtime::{PortalEvent, Topic};
use super::repository::{DirectoryRepository, RepositoryError, WorkflowRepository};
use super::service::{NewRequest, RequestWorkflowService, WorkflowError};
use crate::error::AppError;
use crate::workflows::actor::Actor;

/// Documents accepted in one submission body.
const MAX_DOCUMENTS_PER_BODY: usize = 4;

type Service<R> = Arc<RequestWorkflowService<R>>;

/// Router for requests, messages, notifications, dashboards and stored documents.
pub fn request_router<R>(service: Service<R>) -> Router
where
    R: DirectoryRepository + WorkflowRepository + 'static,
{
    // base64 inflates uploads by a third.
    let body_limit = (service.policy.max_bytes / 3 + 1) * 4 * MAX_DOCUMENTS_PER_BODY + 64 * 1024;

    Router::new()
        .route("/api/v1/request-types", get(request_types_handler))
        .route(
            "/api/v1/requests",
            post(submit_handler::<R>).get(own_requests_handler::<R>),
        )
        .route("/api/v1/requests/queue", get(queue_handler::<R>))
        .route(
            "/api/v1/requests/:request_id",
            get(detail_handler::<R>).delete(delete_handler::<R>),
        )
        .route("/api/v1/requests/:request_id/process", post(process_handler::<R>))
        .route("/api/v1/requests/:request_id/approve", post(approve_handler::<R>))
        .route("/api/v1/requests/:request_id/reject", post(reject_handler::<R>))
        .route("/api/v1/requests/:request_id/cancel", post(cancel_handler::<R>))
        .route(
            "/api/v1/requests/:request_id/messages",
            get(thread_handler::<R>).post(send_message_handler::<R>),
        )
        .route(
            "/api/v1/requests/:request_id/messages/stream",
            get(thread_stream_handler::<R>),
        )
        .route("/api/v1/notifications", get(inbox_handler::<R>))
        .route("/api/v1/notifications/read-all", post(read_all_handler::<R>))
        .route("/api/v1/notifications/stream", get(inbox_stream_handler::<R>))
        .route(
            "/api/v1/notifications/:notification_id/read",
            post(mark_read_handler::<R>),
        )
        .route(
            "/api/v1/notifications/:notification_id",
            delete(delete_notification_handler::<R>),
        )
        .route("/api/v1/dashboard", get(dashboard_handler::<R>))
        .route("/api/v1/audit/export", get(audit_export_handler::<R>))
        .route("/documents/*key", get(document_handler::<R>))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(service)
}

#[derive(Debug, Deserialize)]
pub(crate) struct QueueQuery {
    #[serde(default)]
    status: Option<RequestStatus>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DocumentBody {
    document: DocumentUpload,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct RejectBody {
    #[serde(default)]
    motif: Option<String>,
}

fn status_for(error: &WorkflowError) -> StatusCode {
    match error {
        WorkflowError::Unauthenticated => StatusCode::UNAUTHORIZED,
        WorkflowError::Forbidden(_) => StatusCode::FORBIDDEN,
        WorkflowError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        WorkflowError::NotFound(_) => StatusCode::NOT_FOUND,
        WorkflowError::NotDeletable(_) | WorkflowError::Transition(_) => StatusCode::CONFLICT,
        WorkflowError::Document(err) if err.is_rejection() => StatusCode::UNPROCESSABLE_ENTITY,
        WorkflowError::Document(DocumentError::NotFound(_)) => StatusCode::NOT_FOUND,
        WorkflowError::Repository(RepositoryError::NotFound) => StatusCode::NOT_FOUND,
        WorkflowError::Repository(RepositoryError::StaleStatus { .. })
        | WorkflowError::Repository(RepositoryError::Conflict) => StatusCode::CONFLICT,
        WorkflowError::Document(_)
        | WorkflowError::Repository(RepositoryError::Unavailable(_))
        | WorkflowError::Export(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub(crate) fn error_response(error: WorkflowError) -> Response {
    let status = status_for(&error);
    if status.is_server_error() {
        error!(error = %error, "workflow call failed");
    }
    let payload = json!({
        "error": error.to_string(),
    });
    (status, Json(payload)).into_response()
}

fn respond<T: serde::Serialize>(status: StatusCode, result: Result<T, WorkflowError>) -> Response {
    match result {
        Ok(value) => (status, Json(value)).into_response(),
        Err(err) => error_response(err),
    }
}

async fn request_types_handler() -> Response {
    (StatusCode::OK, Json(request_types())).into_response()
}

pub(crate) async fn submit_handler<R>(
    State(service): State<Service<R>>,
    Actor(actor): Actor,
    Json(form): Json<NewRequest>,
) -> Response
where
    R: DirectoryRepository + WorkflowRepository + 'static,
{
    respond(StatusCode::CREATED, service.submit(&actor, form).await)
}

pub(crate) async fn own_requests_handler<R>(
    State(service): State<Service<R>>,
    Actor(actor): Actor,
) -> Response
where
    R: DirectoryRepository + WorkflowRepository + 'static,
{
    respond(StatusCode::OK, service.list_own(&actor))
}

pub(crate) async fn queue_handler<R>(
    State(service): State<Service<R>>,
    Actor(actor): Actor,
    Query(query): Query<QueueQuery>,
) -> Response
where
    R: DirectoryRepository + WorkflowRepository + 'static,
{
    respond(StatusCode::OK, service.queue(&actor, query.status))
}

pub(crate) async fn detail_handler<R>(
    State(service): State<Service<R>>,
    Actor(actor): Actor,
    Path(request_id): Path<String>,
) -> Response
where
    R: DirectoryRepository + WorkflowRepository + 'static,
{
    respond(StatusCode::OK, service.detail(&actor, &RequestId(request_id)))
}

pub(crate) async fn delete_handler<R>(
    State(service): State<Service<R>>,
    Actor(actor): Actor,
    Path(request_id): Path<String>,
) -> Response
where
    R: DirectoryRepository + WorkflowRepository + 'static,
{
    respond(
        StatusCode::OK,
        service.delete(&actor, &RequestId(request_id)).await,
    )
}

pub(crate) async fn process_handler<R>(
    State(service): State<Service<R>>,
    Actor(actor): Actor,
    Path(request_id): Path<String>,
    Json(body): Json<DocumentBody>,
) -> Response
where
    R: DirectoryRepository + WorkflowRepository + 'static,
{
    respond(
        StatusCode::OK,
        service
            .process(&actor, &RequestId(request_id), body.document)
            .await,
    )
}

pub(crate) async fn approve_handler<R>(
    State(service): State<Service<R>>,
    Actor(actor): Actor,
    Path(request_id): Path<String>,
    Json(body): Json<DocumentBody>,
) -> Response
where
    R: DirectoryRepository + WorkflowRepository + 'static,
{
    respond(
        StatusCode::OK,
        service
            .approve(&actor, &RequestId(request_id), body.document)
            .await,
    )
}

pub(crate) async fn reject_handler<R>(
    State(service): State<Service<R>>,
    Actor(actor): Actor,
    Path(request_id): Path<String>,
    body: Option<Json<RejectBody>>,
) -> Response
where
    R: DirectoryRepository + WorkflowRepository + 'static,
{
    let motif = body.and_then(|Json(body)| body.motif);
    respond(
        StatusCode::OK,
        service.reject(&actor, &RequestId(request_id), motif).await,
    )
}

pub(crate) async fn cancel_handler<R>(
    State(service): State<Service<R>>,
    Actor(actor): Actor,
    Path(request_id): Path<String>,
) -> Response
where
    R: DirectoryRepository + WorkflowRepository + 'static,
{
    respond(StatusCode::OK, service.cancel(&actor, &RequestId(request_id)))
}

pub(crate) async fn thread_handler<R>(
    State(service): State<Service<R>>,
    Actor(actor): Actor,
    Path(request_id): Path<String>,
) -> Response
where
    R: DirectoryRepository + WorkflowRepository + 'static,
{
    respond(StatusCode::OK, service.thread(&actor, &RequestId(request_id)))
}

pub(crate) async fn send_message_handler<R>(
    State(service): State<Service<R>>,
    Actor(actor): Actor,
    Path(request_id): Path<String>,
    Json(input): Json<NewMessage>,
) -> Response
where
    R: DirectoryRepository + WorkflowRepository + 'static,
{
    respond(
        StatusCode::CREATED,
        service
            .send_message(&actor, &RequestId(request_id), input)
            .await,
    )
}

pub(crate) async fn inbox_handler<R>(
    State(service): State<Service<R>>,
    Actor(actor): Actor,
) -> Response
where
    R: DirectoryRepository + WorkflowRepository + 'static,
{
    respond(StatusCode::OK, service.inbox(&actor))
}

pub(crate) async fn read_all_handler<R>(
    State(service): State<Service<R>>,
    Actor(actor): Actor,
) -> Response
where
    R: DirectoryRepository + WorkflowRepository + 'static,
{
    respond(
        StatusCode::OK,
        service
            .mark_all_read(&actor)
            .map(|updated| json!({ "updated": updated })),
    )
}

pub(crate) async fn mark_read_handler<R>(
    State(service): State<Service<R>>,
    Actor(actor): Actor,
    Path(notification_id): Path<String>,
) -> Response
where
    R: DirectoryRepository + WorkflowRepository + 'static,
{
    respond(
        StatusCode::OK,
        service.mark_notification_read(&actor, &NotificationId(notification_id)),
    )
}

pub(crate) async fn delete_notification_handler<R>(
    State(service): State<Service<R>>,
    Actor(actor): Actor,
    Path(notification_id): Path<String>,
) -> Response
where
    R: DirectoryRepository + WorkflowRepository + 'static,
{
    match service.delete_notification(&actor, &NotificationId(notification_id)) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn dashboard_handler<R>(
    State(service): State<Service<R>>,
    Actor(actor): Actor,
) -> Response
where
    R: DirectoryRepository + WorkflowRepository + 'static,
{
    respond(StatusCode::OK, service.dashboard(&actor).await)
}

pub(crate) async fn audit_export_handler<R>(
    State(service): State<Service<R>>,
    Actor(actor): Actor,
) -> Response
where
    R: DirectoryRepository + WorkflowRepository + 'static,
{
    match service.export_audit(&actor) {
        Ok(csv) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
                (
                    header::CONTENT_DISPOSITION,
                    "attachment; filename=\"logs_suivi.csv\"",
                ),
            ],
            csv,
        )
            .into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn document_handler<R>(
    State(service): State<Service<R>>,
    Path(key): Path<String>,
) -> Result<Response, AppError>
where
    R: DirectoryRepository + WorkflowRepository + 'static,
{
    let bytes = service.documents().fetch(&key).await?;
    let content_type = mime_guess::from_path(&key).first_or_octet_stream();
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, content_type.essence_str().to_string())],
        bytes,
    )
        .into_response())
}

pub(crate) async fn thread_stream_handler<R>(
    State(service): State<Service<R>>,
    Actor(actor): Actor,
    Path(request_id): Path<String>,
) -> Response
where
    R: DirectoryRepository + WorkflowRepository + 'static,
{
    let request_id = RequestId(request_id);
    if let Err(err) = service.thread(&actor, &request_id) {
        return error_response(err);
    }
    let receiver = service.events().subscribe(Topic::Request(request_id));
    event_stream(receiver).into_response()
}

pub(crate) async fn inbox_stream_handler<R>(
    State(service): State<Service<R>>,
    Actor(actor): Actor,
) -> Response
where
    R: DirectoryRepository + WorkflowRepository + 'static,
{
    let user = match service.actor(&actor) {
        Ok(user) => user,
        Err(err) => return error_response(err),
    };
    let receiver = service.events().subscribe(Topic::Inbox(user.id));
    event_stream(receiver).into_response()
}

fn event_stream(
    receiver: broadcast::Receiver<PortalEvent>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = stream::unfold(receiver, |mut receiver| async move {
        match receiver.recv().await {
            Ok(event) => {
                let id = match &event {
                    PortalEvent::MessagePosted(message) => message.id.to_string(),
                    PortalEvent::NotificationCreated(row) => row.id.to_string(),
                };
                let json = serde_json::to_string(&event).unwrap_or_default();
                Some((
                    Ok(Event::default().event(event.name()).id(id).data(json)),
                    receiver,
                ))
            }
            Err(broadcast::error::RecvError::Lagged(count)) => {
                warn!(count, "event subscriber lagged");
                Some((
                    Ok(Event::default()
                        .event("warning")
                        .data(format!("{count} événements manqués"))),
                    receiver,
                ))
            }
            Err(broadcast::error::RecvError::Closed) => None,
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}
