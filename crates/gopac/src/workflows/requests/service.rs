use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use super::catalog::{self, authority_for, spec_for};
use super::documents::{
    storage_key, AcceptedDocument, DocumentError, DocumentStore, DocumentUpload, UploadPolicy,
};
use super::domain::{
    AdministrativeRequest, Attachment, AttachmentId, AttachmentKind, Decision, DeliveryMethod,
    DepartmentCode, LicenseLevel, LogEntry, LogState, RequestDetail, RequestId, RequestKind, RequestStatus, Role,
    Urgency, UserId, UserProfile, ValidationId, ValidationRecord,
};
use super::lifecycle::{initial_status, next_status, LifecycleEvent, TransitionError};
use super::notify::{NotificationFanout, WorkflowWarning};
use super::realtime::EventHub;
use super::repository::{
    DirectoryRepository, RepositoryError, RequestFilter, StatusChange, WorkflowBatch,
    WorkflowRepository,
};
use crate::mail::Mailer;

pub(crate) const DEFAULT_REJECTION_MOTIF: &str = "Non spécifié";

/// Submission form.
#[derive(Debug, Clone, Deserialize)]
pub struct NewRequest {
    pub kind: RequestKind,
    /// Defaults to the catalogue label.
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: String,
    pub license_level: LicenseLevel,
    #[serde(default)]
    pub delivery_method: DeliveryMethod,
    #[serde(default)]
    pub urgency: Urgency,
    #[serde(default)]
    pub documents: Vec<DocumentUpload>,
}

/// Result of a workflow step together with its non-blocking warnings.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowOutcome<T> {
    #[serde(rename = "data")]
    pub value: T,
    pub warnings: Vec<WorkflowWarning>,
}

impl<T> WorkflowOutcome<T> {
    pub fn new(value: T, warnings: Vec<WorkflowWarning>) -> Self {
        Self { value, warnings }
    }

    pub fn clean(value: T) -> Self {
        Self::new(value, Vec::new())
    }
}

/// Entry point for every request workflow stage.
pub struct RequestWorkflowService<R> {
    pub(crate) repository: Arc<R>,
    pub(crate) documents: Arc<dyn DocumentStore>,
    pub(crate) mailer: Arc<dyn Mailer>,
    pub(crate) events: Arc<EventHub>,
    pub(crate) policy: UploadPolicy,
    pub(crate) email_budget: usize,
}

impl<R> RequestWorkflowService<R>
where
    R: DirectoryRepository + WorkflowRepository + 'static,
{
    pub fn new(
        repository: Arc<R>,
        documents: Arc<dyn DocumentStore>,
        mailer: Arc<dyn Mailer>,
        events: Arc<EventHub>,
    ) -> Self {
        Self {
            repository,
            documents,
            mailer,
            events,
            policy: UploadPolicy::default(),
            email_budget: 5,
        }
    }

    pub fn with_upload_policy(mut self, policy: UploadPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_email_budget(mut self, budget: usize) -> Self {
        self.email_budget = budget;
        self
    }

    pub fn events(&self) -> &Arc<EventHub> {
        &self.events
    }

    pub fn documents(&self) -> &Arc<dyn DocumentStore> {
        &self.documents
    }

    /// Resolve the caller; unknown ids are unauthenticated.
    pub fn actor(&self, id: &UserId) -> Result<UserProfile, WorkflowError> {
        self.repository
            .user(id)?
            .ok_or(WorkflowError::Unauthenticated)
    }

    pub(crate) fn load_request(&self, id: &RequestId) -> Result<AdministrativeRequest, WorkflowError> {
        self.repository
            .request(id)?
            .ok_or_else(|| WorkflowError::NotFound(id.clone()))
    }

    /// Processing authorities for a request kind, scoped to `department` when required.
    pub fn resolve_authorities(
        &self,
        kind: RequestKind,
        department: Option<&DepartmentCode>,
    ) -> Result<(Role, Vec<UserProfile>), WorkflowError> {
        let role = authority_for(kind);
        if role.is_department_scoped() {
            let Some(code) = department else {
                return Ok((role, Vec::new()));
            };
            return Ok((role, self.repository.users_with_role(role, Some(code))?));
        }
        Ok((role, self.repository.users_with_role(role, None)?))
    }

    /// Submit a new request: store documents, write the request with its
    /// log and notifications, then email the student and the authority.
    pub async fn submit(
        &self,
        actor_id: &UserId,
        form: NewRequest,
    ) -> Result<WorkflowOutcome<RequestDetail>, WorkflowError> {
        let student = self.actor(actor_id)?;
        if student.role != Role::Etudiant {
            return Err(WorkflowError::Forbidden(
                "seuls les étudiants peuvent soumettre une demande".to_string(),
            ));
        }

        let spec = spec_for(form.kind);
        let description = form.description.trim().to_string();
        if spec.requires_justification && description.is_empty() {
            return Err(WorkflowError::Validation(format!(
                "une justification est requise pour « {} »",
                spec.label
            )));
        }
        let title = form
            .title
            .map(|title| title.trim().to_string())
            .filter(|title| !title.is_empty())
            .unwrap_or_else(|| spec.label.to_string());

        let accepted = form
            .documents
            .into_iter()
            .map(|upload| {
                upload
                    .decode()
                    .and_then(|document| self.policy.check(document, AttachmentKind::StudentUpload))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let now = Utc::now();
        let request = AdministrativeRequest {
            id: RequestId::generate(),
            title,
            kind: form.kind,
            description,
            requester: student.id.clone(),
            requester_name: student.name.clone(),
            license_level: form.license_level,
            delivery_method: form.delivery_method,
            urgency: form.urgency,
            department: student.department.clone(),
            status: initial_status(),
            submitted_at: now,
            updated_at: now,
        };

        let mut warnings = Vec::new();
        let (role, authorities) = self.resolve_authorities(request.kind, request.department.as_ref())?;
        if authorities.is_empty() {
            warn!(
                request_id = %request.id,
                role = %role,
                department = ?request.department,
                "no processing authority found"
            );
            warnings.push(WorkflowWarning::NoAuthorityFound {
                role,
                department: request
                    .department
                    .clone()
                    .filter(|_| role.is_department_scoped()),
            });
        }

        let attachments = self
            .store_documents(&request.id, AttachmentKind::StudentUpload, accepted, now)
            .await?;

        let mut fanout = NotificationFanout::new();
        fanout.push(
            student.clone(),
            format!("Confirmation de soumission: {}", spec.label),
            format!(
                "Votre demande pour {} (ID: {}) a été soumise avec succès et est en attente de traitement.",
                spec.label, request.id
            ),
        );
        for authority in authorities {
            fanout.push(
                authority,
                format!("Nouvelle demande à traiter: {}", spec.label),
                format!(
                    "Une nouvelle demande pour {} (ID: {}) par {} ({}) nécessite votre traitement.",
                    spec.label, request.id, student.name, request.license_level
                ),
            );
        }

        let notifications = fanout.notifications(Some(&request.id), now);
        let batch = WorkflowBatch {
            new_request: Some(request.clone()),
            attachments: attachments.clone(),
            logs: vec![LogEntry::new(
                Some(request.id.clone()),
                LogState::EnAttente,
                student.id.clone(),
                format!("Demande soumise par {}", student.name),
                now,
            )],
            notifications: notifications.clone(),
            ..WorkflowBatch::default()
        };
        self.commit_or_discard(batch, &attachments).await?;
        info!(request_id = %request.id, kind = ?request.kind, "request submitted");

        self.events.notifications_created(&notifications);
        warnings.extend(fanout.deliver(self.mailer.as_ref()).await);

        let detail = RequestDetail {
            request,
            attachments,
            validations: Vec::new(),
            history: Vec::new(),
        };
        Ok(WorkflowOutcome::new(detail, warnings))
    }

    /// Attach the processed document and move the request to `en_traitement`.
    pub async fn process(
        &self,
        actor_id: &UserId,
        request_id: &RequestId,
        document: DocumentUpload,
    ) -> Result<WorkflowOutcome<AdministrativeRequest>, WorkflowError> {
        let actor = self.actor(actor_id)?;
        if !LifecycleEvent::Process.permits(actor.role) {
            return Err(WorkflowError::Forbidden(
                "rôle non autorisé à traiter les demandes".to_string(),
            ));
        }
        let mut request = self.load_request(request_id)?;
        if !catalog::handles(&actor, &request) {
            return Err(WorkflowError::Forbidden(
                "cette demande ne relève pas de votre service".to_string(),
            ));
        }
        let next = next_status(request.status, LifecycleEvent::Process)?;
        let accepted = self
            .policy
            .check(document.decode()?, AttachmentKind::Processed)?;

        let now = Utc::now();
        let mut fanout = NotificationFanout::new();
        if let Some(student) = self.repository.user(&request.requester)? {
            fanout.push(
                student,
                format!("Mise à jour de votre demande: {}", request.title),
                format!("Votre demande de {} est en cours de traitement.", request.title),
            );
        }
        for director in self.repository.users_with_role(Role::Dg, None)? {
            fanout.push(
                director,
                format!("Nouvelle demande à valider: {}", request.title),
                format!(
                    "Une demande de {} est en attente de validation finale. Veuillez vérifier dans l'application.",
                    request.title
                ),
            );
        }

        let attachments = self
            .store_documents(&request.id, AttachmentKind::Processed, vec![accepted], now)
            .await?;
        let notifications = fanout.notifications(Some(&request.id), now);
        let batch = WorkflowBatch {
            status_change: Some(StatusChange {
                request_id: request.id.clone(),
                expected: request.status,
                next,
                at: now,
            }),
            attachments: attachments.clone(),
            logs: vec![LogEntry::new(
                Some(request.id.clone()),
                LogState::from(next),
                actor.id.clone(),
                format!("Demande traitée par {}", actor.name),
                now,
            )],
            notifications: notifications.clone(),
            ..WorkflowBatch::default()
        };
        self.commit_or_discard(batch, &attachments).await?;
        info!(request_id = %request.id, processor = %actor.id, "request processed");

        request.status = next;
        request.updated_at = now;
        self.events.notifications_created(&notifications);
        let warnings = fanout.deliver(self.mailer.as_ref()).await;
        Ok(WorkflowOutcome::new(request, warnings))
    }

    /// Final approval with the signed PDF.
    pub async fn approve(
        &self,
        actor_id: &UserId,
        request_id: &RequestId,
        signed: DocumentUpload,
    ) -> Result<WorkflowOutcome<AdministrativeRequest>, WorkflowError> {
        let (actor, request, next) = self.decision_context(actor_id, request_id, Decision::Valide)?;
        let accepted = self.policy.check(signed.decode()?, AttachmentKind::Signed)?;

        let student = self.repository.user(&request.requester)?;
        let processor = self.last_processor(&request.id)?;
        let head = match request.department.as_ref() {
            Some(department) => self
                .repository
                .users_with_role(Role::ChefDept, Some(department))?
                .into_iter()
                .next(),
            None => None,
        };

        let now = Utc::now();
        let attachments = self
            .store_documents(&request.id, AttachmentKind::Signed, vec![accepted], now)
            .await?;
        let url = attachments
            .first()
            .map(|attachment| attachment.url.clone())
            .unwrap_or_default();

        let mut fanout = NotificationFanout::new();
        if let Some(student) = student {
            let message = match request.delivery_method {
                DeliveryMethod::Email => format!(
                    "Votre demande de {} a été validée. Téléchargez le document signé ici : {}",
                    request.title, url
                ),
                DeliveryMethod::InPerson => format!(
                    "Votre demande de {} a été validée. Veuillez récupérer le document signé en personne.",
                    request.title
                ),
            };
            fanout.push(
                student,
                format!("Mise à jour de votre demande: {}", request.title),
                message,
            );
        }
        if let Some(processor) = processor {
            fanout.push(
                processor,
                format!("Mise à jour de la demande: {}", request.title),
                format!("La demande de {} a été validée par le DG.", request.title),
            );
        }
        if let Some(head) = head {
            let message = match request.delivery_method {
                DeliveryMethod::Email => format!(
                    "La demande de {} a été validée par le DG. Le document signé est disponible ici : {}",
                    request.title, url
                ),
                DeliveryMethod::InPerson => format!(
                    "La demande de {} a été validée par le DG. Le document signé est prêt à être récupéré en personne.",
                    request.title
                ),
            };
            fanout.push(head, format!("Demande validée: {}", request.title), message);
        }

        let validation = ValidationRecord {
            id: ValidationId::generate(),
            request_id: request.id.clone(),
            actor: actor.id.clone(),
            role: actor.role,
            decision: Decision::Valide,
            motif: None,
            decided_at: now,
        };
        let log = LogEntry::new(
            Some(request.id.clone()),
            LogState::from(next),
            actor.id.clone(),
            format!("Demande validée par {}", actor.name),
            now,
        );
        self.finish_decision(request, next, now, attachments, validation, log, fanout)
            .await
    }

    /// Final rejection. An empty motif is stored as "Non spécifié".
    pub async fn reject(
        &self,
        actor_id: &UserId,
        request_id: &RequestId,
        motif: Option<String>,
    ) -> Result<WorkflowOutcome<AdministrativeRequest>, WorkflowError> {
        let (actor, request, next) = self.decision_context(actor_id, request_id, Decision::Rejete)?;
        let motif = motif
            .map(|motif| motif.trim().to_string())
            .filter(|motif| !motif.is_empty())
            .unwrap_or_else(|| DEFAULT_REJECTION_MOTIF.to_string());
        let now = Utc::now();

        let mut fanout = NotificationFanout::new();
        if let Some(student) = self.repository.user(&request.requester)? {
            fanout.push(
                student,
                format!("Mise à jour de votre demande: {}", request.title),
                format!(
                    "Votre demande de {} a été rejetée. Motif : {}.",
                    request.title, motif
                ),
            );
        }
        if let Some(processor) = self.last_processor(&request.id)? {
            fanout.push(
                processor,
                format!("Mise à jour de la demande: {}", request.title),
                format!(
                    "La demande de {} a été rejetée par le DG: {}.",
                    request.title, motif
                ),
            );
        }

        let validation = ValidationRecord {
            id: ValidationId::generate(),
            request_id: request.id.clone(),
            actor: actor.id.clone(),
            role: actor.role,
            decision: Decision::Rejete,
            motif: Some(motif.clone()),
            decided_at: now,
        };
        let log = LogEntry::new(
            Some(request.id.clone()),
            LogState::from(next),
            actor.id.clone(),
            format!("Demande rejetée par {}: {}", actor.name, motif),
            now,
        );
        self.finish_decision(request, next, now, Vec::new(), validation, log, fanout)
            .await
    }

    /// Student withdraws a request that nobody has processed yet.
    pub fn cancel(
        &self,
        actor_id: &UserId,
        request_id: &RequestId,
    ) -> Result<WorkflowOutcome<AdministrativeRequest>, WorkflowError> {
        let actor = self.actor(actor_id)?;
        let mut request = self.load_request(request_id)?;
        if !LifecycleEvent::Cancel.permits(actor.role) || request.requester != actor.id {
            return Err(WorkflowError::Forbidden(
                "seul l'auteur de la demande peut l'annuler".to_string(),
            ));
        }
        let next = next_status(request.status, LifecycleEvent::Cancel)?;
        let now = Utc::now();

        self.repository.commit(WorkflowBatch {
            status_change: Some(StatusChange {
                request_id: request.id.clone(),
                expected: request.status,
                next,
                at: now,
            }),
            logs: vec![LogEntry::new(
                Some(request.id.clone()),
                LogState::from(next),
                actor.id.clone(),
                format!("Demande annulée par l'étudiant {}", actor.name),
                now,
            )],
            ..WorkflowBatch::default()
        })?;
        info!(request_id = %request.id, "request cancelled by student");

        request.status = next;
        request.updated_at = now;
        Ok(WorkflowOutcome::clean(request))
    }

    /// Owner removes a finished request. The audit trail keeps a `supprimee` entry.
    pub async fn delete(
        &self,
        actor_id: &UserId,
        request_id: &RequestId,
    ) -> Result<WorkflowOutcome<RequestId>, WorkflowError> {
        let actor = self.actor(actor_id)?;
        let request = self.load_request(request_id)?;
        if actor.role != Role::Etudiant || request.requester != actor.id {
            return Err(WorkflowError::Forbidden(
                "seul l'auteur de la demande peut la supprimer".to_string(),
            ));
        }
        if !request.status.is_terminal() {
            return Err(WorkflowError::NotDeletable(request.status));
        }

        let log = LogEntry::new(
            Some(request.id.clone()),
            LogState::Supprimee,
            actor.id.clone(),
            format!("Demande supprimée par l'étudiant {}", actor.name),
            Utc::now(),
        );
        let removed = self.repository.delete_request(&request.id, log)?;
        info!(request_id = %request.id, attachments = removed.len(), "request deleted");

        let mut warnings = Vec::new();
        for attachment in removed {
            if let Err(err) = self.documents.remove(&attachment.storage_key).await {
                warn!(key = %attachment.storage_key, error = %err, "stored document left behind");
                warnings.push(WorkflowWarning::DocumentCleanupFailed {
                    key: attachment.storage_key,
                });
            }
        }
        Ok(WorkflowOutcome::new(request.id, warnings))
    }

    /// Request with attachments, decisions and history, for its owner,
    /// the handling authority or the director general.
    pub fn detail(
        &self,
        actor_id: &UserId,
        request_id: &RequestId,
    ) -> Result<RequestDetail, WorkflowError> {
        let actor = self.actor(actor_id)?;
        let detail = self
            .repository
            .detail(request_id)?
            .ok_or_else(|| WorkflowError::NotFound(request_id.clone()))?;
        ensure_can_view(&actor, &detail.request)?;
        Ok(detail)
    }

    /// The caller's own requests, newest first.
    pub fn list_own(&self, actor_id: &UserId) -> Result<Vec<AdministrativeRequest>, WorkflowError> {
        let actor = self.actor(actor_id)?;
        Ok(self.repository.requests_by_requester(&actor.id)?)
    }

    /// Requests awaiting the caller. Authorities see the kinds routed to their
    /// role (department-scoped where required); the director general sees every
    /// request, `en_traitement` ones when no filter is given.
    pub fn queue(
        &self,
        actor_id: &UserId,
        status: Option<RequestStatus>,
    ) -> Result<Vec<AdministrativeRequest>, WorkflowError> {
        let actor = self.actor(actor_id)?;
        let filter = queue_filter(&actor, status)?;
        match filter {
            Some(filter) => Ok(self.repository.requests_matching(&filter)?),
            None => Ok(Vec::new()),
        }
    }

    fn decision_context(
        &self,
        actor_id: &UserId,
        request_id: &RequestId,
        decision: Decision,
    ) -> Result<(UserProfile, AdministrativeRequest, RequestStatus), WorkflowError> {
        let actor = self.actor(actor_id)?;
        let event = LifecycleEvent::from_decision(decision);
        if !event.permits(actor.role) {
            return Err(WorkflowError::Forbidden(
                "seul le DG peut rendre la décision finale".to_string(),
            ));
        }
        let request = self.load_request(request_id)?;
        let next = next_status(request.status, event)?;
        Ok((actor, request, next))
    }

    #[allow(clippy::too_many_arguments)]
    async fn finish_decision(
        &self,
        mut request: AdministrativeRequest,
        next: RequestStatus,
        now: DateTime<Utc>,
        attachments: Vec<Attachment>,
        validation: ValidationRecord,
        log: LogEntry,
        fanout: NotificationFanout,
    ) -> Result<WorkflowOutcome<AdministrativeRequest>, WorkflowError> {
        let notifications = fanout.notifications(Some(&request.id), now);
        let decision = validation.decision;
        let batch = WorkflowBatch {
            status_change: Some(StatusChange {
                request_id: request.id.clone(),
                expected: request.status,
                next,
                at: now,
            }),
            attachments: attachments.clone(),
            validations: vec![validation],
            logs: vec![log],
            notifications: notifications.clone(),
            ..WorkflowBatch::default()
        };
        self.commit_or_discard(batch, &attachments).await?;
        info!(request_id = %request.id, decision = ?decision, "final decision recorded");

        request.status = next;
        request.updated_at = now;
        self.events.notifications_created(&notifications);
        let warnings = fanout.deliver(self.mailer.as_ref()).await;
        Ok(WorkflowOutcome::new(request, warnings))
    }

    /// Author of the most recent `en_traitement` log entry.
    fn last_processor(&self, request_id: &RequestId) -> Result<Option<UserProfile>, WorkflowError> {
        let Some(entry) = self
            .repository
            .latest_log(request_id, LogState::EnTraitement)?
        else {
            return Ok(None);
        };
        Ok(self.repository.user(&entry.actor)?)
    }

    async fn store_documents(
        &self,
        request_id: &RequestId,
        kind: AttachmentKind,
        documents: Vec<AcceptedDocument>,
        at: DateTime<Utc>,
    ) -> Result<Vec<Attachment>, WorkflowError> {
        let mut stored: Vec<Attachment> = Vec::with_capacity(documents.len());
        for document in documents {
            let key = storage_key(request_id, kind, &document.file_name);
            match self.documents.put(&key, &document).await {
                Ok(location) => stored.push(Attachment {
                    id: AttachmentId::generate(),
                    request_id: request_id.clone(),
                    file_name: document.file_name,
                    url: location.url,
                    storage_key: location.key,
                    kind,
                    content_type: document.content_type,
                    size_bytes: document.bytes.len(),
                    created_at: at,
                }),
                Err(err) => {
                    error!(request_id = %request_id, key = %key, error = %err, "document upload failed");
                    self.discard(&stored).await;
                    return Err(err.into());
                }
            }
        }
        Ok(stored)
    }

    async fn commit_or_discard(
        &self,
        batch: WorkflowBatch,
        uploaded: &[Attachment],
    ) -> Result<(), WorkflowError> {
        if let Err(err) = self.repository.commit(batch) {
            error!(error = %err, uploaded = uploaded.len(), "workflow commit failed");
            self.discard(uploaded).await;
            return Err(err.into());
        }
        Ok(())
    }

    /// Compensating removal of documents whose rows were never written.
    async fn discard(&self, uploaded: &[Attachment]) {
        for attachment in uploaded {
            if let Err(err) = self.documents.remove(&attachment.storage_key).await {
                warn!(key = %attachment.storage_key, error = %err, "could not remove orphaned document");
            }
        }
    }
}

pub(crate) fn can_view(actor: &UserProfile, request: &AdministrativeRequest) -> bool {
    actor.id == request.requester || actor.role == Role::Dg || catalog::handles(actor, request)
}

pub(crate) fn ensure_can_view(
    actor: &UserProfile,
    request: &AdministrativeRequest,
) -> Result<(), WorkflowError> {
    if can_view(actor, request) {
        Ok(())
    } else {
        Err(WorkflowError::Forbidden(
            "accès refusé à cette demande".to_string(),
        ))
    }
}

/// `None` when the caller has no queue at all (students).
pub(crate) fn queue_filter(
    actor: &UserProfile,
    status: Option<RequestStatus>,
) -> Result<Option<RequestFilter>, WorkflowError> {
    match actor.role {
        Role::Etudiant => Err(WorkflowError::Forbidden(
            "les étudiants n'ont pas de file de traitement".to_string(),
        )),
        Role::Dg => Ok(Some(RequestFilter {
            kinds: Vec::new(),
            department: None,
            status: Some(status.unwrap_or(RequestStatus::EnTraitement)),
        })),
        role => {
            let department = if role.is_department_scoped() {
                match actor.department.clone() {
                    Some(code) => Some(code),
                    None => return Ok(None),
                }
            } else {
                None
            };
            Ok(Some(RequestFilter {
                kinds: catalog::kinds_handled_by(role),
                department,
                status,
            }))
        }
    }
}

/// Error raised by the request workflow service.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("utilisateur non authentifié")]
    Unauthenticated,
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    Validation(String),
    #[error("demande {0} introuvable")]
    NotFound(RequestId),
    #[error("seules les demandes validées ou rejetées peuvent être supprimées (statut actuel: {0})")]
    NotDeletable(RequestStatus),
    #[error("export impossible: {0}")]
    Export(String),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error(transparent)]
    Document(#[from] DocumentError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}
