use chrono::{DateTime, Utc};
use serde::Serialize;

use super::domain::{
    AdministrativeRequest, Attachment, Department, DepartmentCode, LogEntry, LogState, Message,
    Notification, NotificationId, RequestDetail, RequestId, RequestKind, RequestStatus, Role,
    UserId, UserProfile, ValidationRecord,
};

/// Account row: public profile plus the argon2 PHC string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredAccount {
    pub profile: UserProfile,
    pub password_hash: String,
}

/// Compare-and-set guard for a status transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusChange {
    pub request_id: RequestId,
    pub expected: RequestStatus,
    pub next: RequestStatus,
    pub at: DateTime<Utc>,
}

/// Rows written by one workflow step. The repository applies all of them or none.
#[derive(Debug, Clone, Default)]
pub struct WorkflowBatch {
    pub new_request: Option<AdministrativeRequest>,
    pub status_change: Option<StatusChange>,
    pub attachments: Vec<Attachment>,
    pub validations: Vec<ValidationRecord>,
    pub logs: Vec<LogEntry>,
    pub notifications: Vec<Notification>,
    pub messages: Vec<Message>,
    pub mark_read: Vec<NotificationId>,
}

impl WorkflowBatch {
    pub fn is_empty(&self) -> bool {
        self.new_request.is_none()
            && self.status_change.is_none()
            && self.attachments.is_empty()
            && self.validations.is_empty()
            && self.logs.is_empty()
            && self.notifications.is_empty()
            && self.messages.is_empty()
            && self.mark_read.is_empty()
    }
}

/// Queue filter used by processing authorities.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestFilter {
    pub kinds: Vec<RequestKind>,
    pub department: Option<DepartmentCode>,
    pub status: Option<RequestStatus>,
}

impl RequestFilter {
    pub fn matches(&self, request: &AdministrativeRequest) -> bool {
        (self.kinds.is_empty() || self.kinds.contains(&request.kind))
            && self
                .department
                .as_ref()
                .map_or(true, |code| request.department.as_ref() == Some(code))
            && self.status.map_or(true, |status| request.status == status)
    }
}

/// Users and departments.
pub trait DirectoryRepository: Send + Sync {
    fn insert_account(&self, account: StoredAccount, log: LogEntry) -> Result<UserProfile, RepositoryError>;
    fn account_by_email(&self, email: &str) -> Result<Option<StoredAccount>, RepositoryError>;
    fn user(&self, id: &UserId) -> Result<Option<UserProfile>, RepositoryError>;
    /// Users holding `role`, restricted to `department` when one is given.
    fn users_with_role(
        &self,
        role: Role,
        department: Option<&DepartmentCode>,
    ) -> Result<Vec<UserProfile>, RepositoryError>;
    fn departments(&self) -> Result<Vec<Department>, RepositoryError>;
    fn department(&self, code: &DepartmentCode) -> Result<Option<Department>, RepositoryError>;
}

/// Requests and everything hanging off them.
pub trait WorkflowRepository: Send + Sync {
    /// Apply a batch atomically, honoring `status_change.expected`.
    fn commit(&self, batch: WorkflowBatch) -> Result<(), RepositoryError>;
    fn request(&self, id: &RequestId) -> Result<Option<AdministrativeRequest>, RepositoryError>;
    fn detail(&self, id: &RequestId) -> Result<Option<RequestDetail>, RepositoryError>;
    /// Newest first.
    fn requests_by_requester(&self, requester: &UserId) -> Result<Vec<AdministrativeRequest>, RepositoryError>;
    /// Newest first.
    fn requests_matching(&self, filter: &RequestFilter) -> Result<Vec<AdministrativeRequest>, RepositoryError>;
    /// Remove the request with its attachments, validations and messages, keeping
    /// the audit trail and appending `log`. Returns the removed attachments.
    fn delete_request(&self, id: &RequestId, log: LogEntry) -> Result<Vec<Attachment>, RepositoryError>;
    fn latest_log(&self, id: &RequestId, state: LogState) -> Result<Option<LogEntry>, RepositoryError>;
    /// Whole audit trail, oldest first.
    fn audit_trail(&self) -> Result<Vec<LogEntry>, RepositoryError>;
    fn append_log(&self, log: LogEntry) -> Result<(), RepositoryError>;
    /// Oldest first.
    fn messages(&self, id: &RequestId) -> Result<Vec<Message>, RepositoryError>;
    /// Newest first.
    fn notifications_for(&self, recipient: &UserId) -> Result<Vec<Notification>, RepositoryError>;
    fn notification(&self, id: &NotificationId) -> Result<Option<Notification>, RepositoryError>;
    fn delete_notification(&self, id: &NotificationId) -> Result<(), RepositoryError>;
}

/// Error enumeration for repository failures.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("request {request_id} is {found}, expected {expected}")]
    StaleStatus {
        request_id: RequestId,
        expected: RequestStatus,
        found: RequestStatus,
    },
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}
