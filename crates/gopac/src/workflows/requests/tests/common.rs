use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::response::Response;
use chrono::Utc;
use serde_json::Value;

use crate::mail::{EmailMessage, MailError, Mailer};
use crate::workflows::requests::documents::DocumentUpload;
use crate::workflows::requests::domain::{
    AdministrativeRequest, Attachment, Department, DepartmentCode, LicenseLevel, LogEntry,
    LogState, Message, Notification, NotificationId, RequestDetail, RequestId, RequestKind, Role,
    UserId, UserProfile,
};
use crate::workflows::requests::memory::{InMemoryDocumentStore, InMemoryPortalStore};
use crate::workflows::requests::realtime::EventHub;
use crate::workflows::requests::repository::{
    DirectoryRepository, RepositoryError, RequestFilter, StoredAccount, WorkflowBatch,
    WorkflowRepository,
};
use crate::workflows::requests::service::{NewRequest, RequestWorkflowService};

pub(super) const PUBLIC_BASE: &str = "http://portal.test";

/// Mailer that records every accepted message and fails for chosen recipients.
#[derive(Default)]
pub(super) struct RecordingMailer {
    fail_for: Vec<String>,
    sent: Mutex<Vec<EmailMessage>>,
}

impl RecordingMailer {
    pub(super) fn failing_for(recipients: &[&str]) -> Self {
        Self {
            fail_for: recipients.iter().map(|value| value.to_string()).collect(),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub(super) fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().expect("mailer mutex poisoned").clone()
    }

    pub(super) fn sent_to(&self, address: &str) -> Vec<EmailMessage> {
        self.sent()
            .into_iter()
            .filter(|message| message.to == address)
            .collect()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, message: EmailMessage) -> Result<(), MailError> {
        if self.fail_for.contains(&message.to) {
            return Err(MailError::NotConfigured);
        }
        self.sent.lock().expect("mailer mutex poisoned").push(message);
        Ok(())
    }
}

/// Portal users seeded for every test.
pub(super) struct Cast {
    pub student: UserProfile,
    pub ntic_student: UserProfile,
    pub chef_dl: UserProfile,
    pub chef_ntic: UserProfile,
    pub directeur_dl: UserProfile,
    pub dae: UserProfile,
    pub dg: UserProfile,
}

fn profile(id: &str, name: &str, role: Role, department: Option<&str>) -> UserProfile {
    UserProfile {
        id: UserId(id.to_string()),
        name: name.to_string(),
        email: format!("{id}@univ.test"),
        role,
        department: department.map(DepartmentCode::new),
        created_at: Utc::now(),
    }
}

pub(super) fn seed(store: &InMemoryPortalStore) -> Cast {
    let cast = Cast {
        student: profile("awa", "Awa Camara", Role::Etudiant, Some("DL")),
        ntic_student: profile("moussa", "Moussa Diallo", Role::Etudiant, Some("NTIC")),
        chef_dl: profile("kaba", "Ibrahima Kaba", Role::ChefDept, Some("DL")),
        chef_ntic: profile("bah", "Fatou Bah", Role::ChefDept, Some("NTIC")),
        directeur_dl: profile("conde", "Sekou Condé", Role::DirecteurProg, Some("DL")),
        dae: profile("sylla", "Aissatou Sylla", Role::Dae, None),
        dg: profile("sow", "Mariam Sow", Role::Dg, None),
    };
    for user in [
        &cast.student,
        &cast.ntic_student,
        &cast.chef_dl,
        &cast.chef_ntic,
        &cast.directeur_dl,
        &cast.dae,
        &cast.dg,
    ] {
        store
            .insert_account(
                StoredAccount {
                    profile: user.clone(),
                    password_hash: "unused".to_string(),
                },
                LogEntry::new(
                    None,
                    LogState::Inscription,
                    user.id.clone(),
                    "Inscription",
                    Utc::now(),
                ),
            )
            .expect("seed user");
    }
    cast
}

pub(super) struct Harness<R> {
    pub service: Arc<RequestWorkflowService<R>>,
    pub store: Arc<R>,
    pub documents: Arc<InMemoryDocumentStore>,
    pub mailer: Arc<RecordingMailer>,
    pub cast: Cast,
}

pub(super) fn harness() -> Harness<InMemoryPortalStore> {
    harness_with_mailer(RecordingMailer::default())
}

pub(super) fn harness_with_mailer(mailer: RecordingMailer) -> Harness<InMemoryPortalStore> {
    let store = Arc::new(InMemoryPortalStore::new());
    let cast = seed(&store);
    build(store, mailer, cast)
}

pub(super) fn build<R>(store: Arc<R>, mailer: RecordingMailer, cast: Cast) -> Harness<R>
where
    R: DirectoryRepository + WorkflowRepository + 'static,
{
    let documents = Arc::new(InMemoryDocumentStore::new(PUBLIC_BASE));
    let mailer = Arc::new(mailer);
    let service = Arc::new(RequestWorkflowService::new(
        store.clone(),
        documents.clone(),
        mailer.clone(),
        Arc::new(EventHub::default()),
    ));
    Harness {
        service,
        store,
        documents,
        mailer,
        cast,
    }
}

pub(super) fn pdf(name: &str) -> DocumentUpload {
    DocumentUpload::from_bytes(name, Some("application/pdf"), b"%PDF-1.7 test document")
}

pub(super) fn png(name: &str) -> DocumentUpload {
    DocumentUpload::from_bytes(name, Some("image/png"), b"\x89PNG fake image")
}

pub(super) fn releve_form() -> NewRequest {
    NewRequest {
        kind: RequestKind::Releve,
        title: None,
        description: String::new(),
        license_level: LicenseLevel::L2,
        delivery_method: Default::default(),
        urgency: Default::default(),
        documents: vec![png("recu_paiement.png")],
    }
}

/// Submit a transcript request as the DL student.
pub(super) async fn submitted<R>(harness: &Harness<R>) -> AdministrativeRequest
where
    R: DirectoryRepository + WorkflowRepository + 'static,
{
    harness
        .service
        .submit(&harness.cast.student.id, releve_form())
        .await
        .expect("submission succeeds")
        .value
        .request
}

/// Submitted and processed by the DL department head.
pub(super) async fn processed<R>(harness: &Harness<R>) -> AdministrativeRequest
where
    R: DirectoryRepository + WorkflowRepository + 'static,
{
    let request = submitted(harness).await;
    harness
        .service
        .process(&harness.cast.chef_dl.id, &request.id, pdf("releve_traite.pdf"))
        .await
        .expect("processing succeeds")
        .value
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}

/// Delegates to the in-memory store but refuses every commit.
pub(super) struct CommitFailingStore {
    pub inner: InMemoryPortalStore,
}

impl DirectoryRepository for CommitFailingStore {
    fn insert_account(&self, account: StoredAccount, log: LogEntry) -> Result<UserProfile, RepositoryError> {
        self.inner.insert_account(account, log)
    }

    fn account_by_email(&self, email: &str) -> Result<Option<StoredAccount>, RepositoryError> {
        self.inner.account_by_email(email)
    }

    fn user(&self, id: &UserId) -> Result<Option<UserProfile>, RepositoryError> {
        self.inner.user(id)
    }

    fn users_with_role(
        &self,
        role: Role,
        department: Option<&DepartmentCode>,
    ) -> Result<Vec<UserProfile>, RepositoryError> {
        self.inner.users_with_role(role, department)
    }

    fn departments(&self) -> Result<Vec<Department>, RepositoryError> {
        self.inner.departments()
    }

    fn department(&self, code: &DepartmentCode) -> Result<Option<Department>, RepositoryError> {
        self.inner.department(code)
    }
}

impl WorkflowRepository for CommitFailingStore {
    fn commit(&self, _batch: WorkflowBatch) -> Result<(), RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn request(&self, id: &RequestId) -> Result<Option<AdministrativeRequest>, RepositoryError> {
        self.inner.request(id)
    }

    fn detail(&self, id: &RequestId) -> Result<Option<RequestDetail>, RepositoryError> {
        self.inner.detail(id)
    }

    fn requests_by_requester(&self, requester: &UserId) -> Result<Vec<AdministrativeRequest>, RepositoryError> {
        self.inner.requests_by_requester(requester)
    }

    fn requests_matching(&self, filter: &RequestFilter) -> Result<Vec<AdministrativeRequest>, RepositoryError> {
        self.inner.requests_matching(filter)
    }

    fn delete_request(&self, id: &RequestId, log: LogEntry) -> Result<Vec<Attachment>, RepositoryError> {
        self.inner.delete_request(id, log)
    }

    fn latest_log(&self, id: &RequestId, state: LogState) -> Result<Option<LogEntry>, RepositoryError> {
        self.inner.latest_log(id, state)
    }

    fn audit_trail(&self) -> Result<Vec<LogEntry>, RepositoryError> {
        self.inner.audit_trail()
    }

    fn append_log(&self, log: LogEntry) -> Result<(), RepositoryError> {
        self.inner.append_log(log)
    }

    fn messages(&self, id: &RequestId) -> Result<Vec<Message>, RepositoryError> {
        self.inner.messages(id)
    }

    fn notifications_for(&self, recipient: &UserId) -> Result<Vec<Notification>, RepositoryError> {
        self.inner.notifications_for(recipient)
    }

    fn notification(&self, id: &NotificationId) -> Result<Option<Notification>, RepositoryError> {
        self.inner.notification(id)
    }

    fn delete_notification(&self, id: &NotificationId) -> Result<(), RepositoryError> {
        self.inner.delete_notification(id)
    }
}
