//! Administrative request workflow: submission, processing, final validation,
//! cancellation and deletion, plus the message threads, inboxes and
//! dashboards built on top of the same storage.
//!
//! Every status change goes through [`lifecycle::next_status`] and is written
//! as one [`WorkflowBatch`]. Emails are sent only after the batch commits.

pub mod audit;
pub mod catalog;
pub mod dashboard;
pub mod documents;
pub mod domain;
pub mod inbox;
pub mod lifecycle;
pub mod memory;
pub mod messaging;
pub mod notify;
pub mod realtime;
pub mod repository;
pub mod router;
pub mod service;

#[cfg(test)]
mod tests;

pub use audit::{audit_csv, AuditExportError};
pub use catalog::{authority_for, request_types, spec_for, RequestTypeSpec};
pub use dashboard::Dashboard;
pub use documents::{
    DocumentError, DocumentStore, DocumentUpload, LocalDocumentStore, StoredDocument, UploadPolicy,
};
pub use domain::{
    AdministrativeRequest, Attachment, AttachmentKind, Decision, DeliveryMethod, Department,
    DepartmentCode, LicenseLevel, LogEntry, LogState, Message, Notification, NotificationId,
    RequestDetail, RequestId, RequestKind, RequestStatus, Role, StatusCounts, Urgency, UserId,
    UserProfile, ValidationRecord,
};
pub use inbox::Inbox;
pub use lifecycle::{next_status, LifecycleEvent, TransitionError};
pub use memory::{InMemoryDocumentStore, InMemoryPortalStore};
pub use messaging::NewMessage;
pub use notify::{EmailBudget, NotificationFanout, WorkflowWarning};
pub use realtime::{EventHub, PortalEvent, Topic};
pub use repository::{
    DirectoryRepository, RepositoryError, RequestFilter, StatusChange, StoredAccount,
    WorkflowBatch, WorkflowRepository,
};
pub use router::request_router;
pub use service::{NewRequest, RequestWorkflowService, WorkflowError, WorkflowOutcome};
