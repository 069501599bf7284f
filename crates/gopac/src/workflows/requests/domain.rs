use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! row_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn generate() -> Self {
                Self(format!(concat!($prefix, "-{}"), uuid::Uuid::new_v4()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

row_id!(
    /// Identifier of a portal user (student or staff).
    UserId,
    "usr"
);
row_id!(
    /// Identifier of an administrative request (`demande`).
    RequestId,
    "dem"
);
row_id!(AttachmentId, "pj");
row_id!(ValidationId, "val");
row_id!(LogEntryId, "log");
row_id!(NotificationId, "notif");
row_id!(MessageId, "msg");

/// Department code such as `NTIC` or `DL`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DepartmentCode(pub String);

impl DepartmentCode {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into().trim().to_ascii_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DepartmentCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Department row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Department {
    pub code: DepartmentCode,
    pub name: String,
}

/// The six fixed portal roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Etudiant,
    ChefDept,
    DirecteurProg,
    Dae,
    SecretaireDg,
    Dg,
}

impl Role {
    pub const ALL: [Role; 6] = [
        Role::Etudiant,
        Role::ChefDept,
        Role::DirecteurProg,
        Role::Dae,
        Role::SecretaireDg,
        Role::Dg,
    ];

    pub const fn label(self) -> &'static str {
        match self {
            Role::Etudiant => "etudiant",
            Role::ChefDept => "chef_dept",
            Role::DirecteurProg => "directeur_prog",
            Role::Dae => "dae",
            Role::SecretaireDg => "secretaire_dg",
            Role::Dg => "dg",
        }
    }

    /// Authorities whose queue is filtered by the student's department.
    pub const fn is_department_scoped(self) -> bool {
        matches!(self, Role::ChefDept | Role::DirecteurProg)
    }

    /// Roles that must (and others must not) belong to a department.
    pub const fn requires_department(self) -> bool {
        matches!(self, Role::Etudiant | Role::ChefDept | Role::DirecteurProg)
    }

    pub const fn is_staff(self) -> bool {
        !matches!(self, Role::Etudiant)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Public profile of a portal user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub department: Option<DepartmentCode>,
    pub created_at: DateTime<Utc>,
}

/// Lifecycle status of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    EnAttente,
    EnTraitement,
    Validee,
    Rejetee,
}

impl RequestStatus {
    pub const fn label(self) -> &'static str {
        match self {
            RequestStatus::EnAttente => "en_attente",
            RequestStatus::EnTraitement => "en_traitement",
            RequestStatus::Validee => "validee",
            RequestStatus::Rejetee => "rejetee",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, RequestStatus::Validee | RequestStatus::Rejetee)
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Catalogue identifier of a request type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    Releve,
    Inscription,
    Reussite,
    Reclamation,
    Stage,
    Suspension,
    Absence,
    Diplome,
    Reinscription,
    Conge,
    Changement,
    Recommandation,
    Convention,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LicenseLevel {
    L1,
    L2,
    L3,
}

impl fmt::Display for LicenseLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LicenseLevel::L1 => "L1",
            LicenseLevel::L2 => "L2",
            LicenseLevel::L3 => "L3",
        };
        f.write_str(label)
    }
}

/// How the signed document reaches the student.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMethod {
    #[default]
    Email,
    InPerson,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    #[default]
    Normal,
    Urgent,
}

/// Stored request row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdministrativeRequest {
    pub id: RequestId,
    pub title: String,
    pub kind: RequestKind,
    pub description: String,
    pub requester: UserId,
    pub requester_name: String,
    pub license_level: LicenseLevel,
    pub delivery_method: DeliveryMethod,
    pub urgency: Urgency,
    pub department: Option<DepartmentCode>,
    pub status: RequestStatus,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Stage that produced an attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentKind {
    StudentUpload,
    Processed,
    Signed,
}

impl AttachmentKind {
    pub const fn label(self) -> &'static str {
        match self {
            AttachmentKind::StudentUpload => "student_upload",
            AttachmentKind::Processed => "processed",
            AttachmentKind::Signed => "signed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: AttachmentId,
    pub request_id: RequestId,
    pub file_name: String,
    pub url: String,
    pub storage_key: String,
    pub kind: AttachmentKind,
    pub content_type: String,
    pub size_bytes: usize,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Valide,
    Rejete,
}

/// Final-validation decision row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationRecord {
    pub id: ValidationId,
    pub request_id: RequestId,
    pub actor: UserId,
    pub role: Role,
    pub decision: Decision,
    pub motif: Option<String>,
    pub decided_at: DateTime<Utc>,
}

/// State recorded by an audit entry: a request status or an account event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogState {
    EnAttente,
    EnTraitement,
    Validee,
    Rejetee,
    Supprimee,
    Inscription,
    Connexion,
}

impl LogState {
    pub const fn label(self) -> &'static str {
        match self {
            LogState::EnAttente => "en_attente",
            LogState::EnTraitement => "en_traitement",
            LogState::Validee => "validee",
            LogState::Rejetee => "rejetee",
            LogState::Supprimee => "supprimee",
            LogState::Inscription => "inscription",
            LogState::Connexion => "connexion",
        }
    }
}

impl From<RequestStatus> for LogState {
    fn from(status: RequestStatus) -> Self {
        match status {
            RequestStatus::EnAttente => LogState::EnAttente,
            RequestStatus::EnTraitement => LogState::EnTraitement,
            RequestStatus::Validee => LogState::Validee,
            RequestStatus::Rejetee => LogState::Rejetee,
        }
    }
}

/// Append-only audit trail row (`logs_suivi`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: LogEntryId,
    pub request_id: Option<RequestId>,
    pub state: LogState,
    pub actor: UserId,
    pub message: String,
    pub recorded_at: DateTime<Utc>,
}

impl LogEntry {
    pub fn new(
        request_id: Option<RequestId>,
        state: LogState,
        actor: UserId,
        message: impl Into<String>,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: LogEntryId::generate(),
            request_id,
            state,
            actor,
            message: message.into(),
            recorded_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub recipient: UserId,
    pub message: String,
    pub request_id: Option<RequestId>,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

/// Correspondence posted on a request thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub request_id: RequestId,
    pub author: UserId,
    pub author_name: String,
    pub content: String,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
}

/// Request with everything attached to it, as returned by detail views.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestDetail {
    pub request: AdministrativeRequest,
    pub attachments: Vec<Attachment>,
    pub validations: Vec<ValidationRecord>,
    pub history: Vec<LogEntry>,
}

impl RequestDetail {
    pub fn signed_document(&self) -> Option<&Attachment> {
        self.attachments
            .iter()
            .find(|attachment| attachment.kind == AttachmentKind::Signed)
    }
}

/// Per-status tallies shown on dashboards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub rejected: usize,
}

impl StatusCounts {
    pub fn tally<'a>(requests: impl IntoIterator<Item = &'a AdministrativeRequest>) -> Self {
        requests
            .into_iter()
            .fold(Self::default(), |mut counts, request| {
                match request.status {
                    RequestStatus::EnAttente => counts.pending += 1,
                    RequestStatus::EnTraitement => counts.processing += 1,
                    RequestStatus::Validee => counts.completed += 1,
                    RequestStatus::Rejetee => counts.rejected += 1,
                }
                counts
            })
    }
}
