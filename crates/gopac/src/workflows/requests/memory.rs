//! In-process adapters used by the API binary, the demo and the tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::documents::{
    public_url, validate_key, AcceptedDocument, DocumentError, DocumentStore, StoredDocument,
};
use super::domain::{
    AdministrativeRequest, Attachment, Department, DepartmentCode, LogEntry, LogState, Message,
    Notification, NotificationId, RequestDetail, RequestId, Role, UserId, UserProfile,
    ValidationRecord,
};
use super::repository::{
    DirectoryRepository, RepositoryError, RequestFilter, StoredAccount, WorkflowBatch,
    WorkflowRepository,
};

#[derive(Debug, Default)]
struct PortalTables {
    departments: BTreeMap<DepartmentCode, Department>,
    accounts: Vec<StoredAccount>,
    requests: Vec<AdministrativeRequest>,
    attachments: Vec<Attachment>,
    validations: Vec<ValidationRecord>,
    logs: Vec<LogEntry>,
    notifications: Vec<Notification>,
    messages: Vec<Message>,
}

impl PortalTables {
    fn request_mut(&mut self, id: &RequestId) -> Option<&mut AdministrativeRequest> {
        self.requests.iter_mut().find(|request| &request.id == id)
    }

    fn has_request(&self, id: &RequestId) -> bool {
        self.requests.iter().any(|request| &request.id == id)
    }
}

/// Every portal table behind one lock, so a batch commits atomically.
#[derive(Debug)]
pub struct InMemoryPortalStore {
    tables: Mutex<PortalTables>,
}

impl Default for InMemoryPortalStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryPortalStore {
    /// Store seeded with the `NTIC` and `DL` departments.
    pub fn new() -> Self {
        let mut tables = PortalTables::default();
        for (code, name) in [
            ("NTIC", "Nouvelles Technologies de l'Information et de la Communication"),
            ("DL", "Droit et Lettres"),
        ] {
            let code = DepartmentCode::new(code);
            tables.departments.insert(
                code.clone(),
                Department {
                    code,
                    name: name.to_string(),
                },
            );
        }
        Self {
            tables: Mutex::new(tables),
        }
    }

    fn tables(&self) -> Result<MutexGuard<'_, PortalTables>, RepositoryError> {
        self.tables
            .lock()
            .map_err(|_| RepositoryError::Unavailable("portal store lock poisoned".to_string()))
    }
}

fn newest_first(mut requests: Vec<AdministrativeRequest>) -> Vec<AdministrativeRequest> {
    requests.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
    requests
}

impl DirectoryRepository for InMemoryPortalStore {
    fn insert_account(&self, account: StoredAccount, log: LogEntry) -> Result<UserProfile, RepositoryError> {
        let mut tables = self.tables()?;
        let email = account.profile.email.to_ascii_lowercase();
        let taken = tables.accounts.iter().any(|existing| {
            existing.profile.id == account.profile.id
                || existing.profile.email.to_ascii_lowercase() == email
        });
        if taken {
            return Err(RepositoryError::Conflict);
        }
        let profile = account.profile.clone();
        tables.accounts.push(account);
        tables.logs.push(log);
        Ok(profile)
    }

    fn account_by_email(&self, email: &str) -> Result<Option<StoredAccount>, RepositoryError> {
        let tables = self.tables()?;
        let email = email.trim().to_ascii_lowercase();
        Ok(tables
            .accounts
            .iter()
            .find(|account| account.profile.email.to_ascii_lowercase() == email)
            .cloned())
    }

    fn user(&self, id: &UserId) -> Result<Option<UserProfile>, RepositoryError> {
        let tables = self.tables()?;
        Ok(tables
            .accounts
            .iter()
            .find(|account| &account.profile.id == id)
            .map(|account| account.profile.clone()))
    }

    fn users_with_role(
        &self,
        role: Role,
        department: Option<&DepartmentCode>,
    ) -> Result<Vec<UserProfile>, RepositoryError> {
        let tables = self.tables()?;
        Ok(tables
            .accounts
            .iter()
            .map(|account| &account.profile)
            .filter(|profile| profile.role == role)
            .filter(|profile| department.map_or(true, |code| profile.department.as_ref() == Some(code)))
            .cloned()
            .collect())
    }

    fn departments(&self) -> Result<Vec<Department>, RepositoryError> {
        Ok(self.tables()?.departments.values().cloned().collect())
    }

    fn department(&self, code: &DepartmentCode) -> Result<Option<Department>, RepositoryError> {
        Ok(self.tables()?.departments.get(code).cloned())
    }
}

impl WorkflowRepository for InMemoryPortalStore {
    fn commit(&self, batch: WorkflowBatch) -> Result<(), RepositoryError> {
        let mut tables = self.tables()?;

        // Validate everything before the first write.
        if let Some(request) = &batch.new_request {
            if tables.has_request(&request.id) {
                return Err(RepositoryError::Conflict);
            }
        }
        if let Some(change) = &batch.status_change {
            let current = tables
                .requests
                .iter()
                .find(|request| request.id == change.request_id)
                .ok_or(RepositoryError::NotFound)?;
            if current.status != change.expected {
                return Err(RepositoryError::StaleStatus {
                    request_id: change.request_id.clone(),
                    expected: change.expected,
                    found: current.status,
                });
            }
        }
        let new_id = batch.new_request.as_ref().map(|request| &request.id);
        let known = |id: &RequestId| Some(id) == new_id || tables.has_request(id);
        let dangling = batch.attachments.iter().any(|row| !known(&row.request_id))
            || batch.validations.iter().any(|row| !known(&row.request_id))
            || batch.messages.iter().any(|row| !known(&row.request_id));
        if dangling {
            return Err(RepositoryError::NotFound);
        }
        let unknown_notification = batch
            .mark_read
            .iter()
            .any(|id| !tables.notifications.iter().any(|row| &row.id == id));
        if unknown_notification {
            return Err(RepositoryError::NotFound);
        }

        let WorkflowBatch {
            new_request,
            status_change,
            attachments,
            validations,
            logs,
            notifications,
            messages,
            mark_read,
        } = batch;

        if let Some(request) = new_request {
            tables.requests.push(request);
        }
        if let Some(change) = status_change {
            if let Some(request) = tables.request_mut(&change.request_id) {
                request.status = change.next;
                request.updated_at = change.at;
            }
        }
        tables.attachments.extend(attachments);
        tables.validations.extend(validations);
        tables.logs.extend(logs);
        tables.notifications.extend(notifications);
        tables.messages.extend(messages);
        for id in &mark_read {
            if let Some(row) = tables.notifications.iter_mut().find(|row| &row.id == id) {
                row.read = true;
            }
        }
        Ok(())
    }

    fn request(&self, id: &RequestId) -> Result<Option<AdministrativeRequest>, RepositoryError> {
        let tables = self.tables()?;
        Ok(tables.requests.iter().find(|request| &request.id == id).cloned())
    }

    fn detail(&self, id: &RequestId) -> Result<Option<RequestDetail>, RepositoryError> {
        let tables = self.tables()?;
        let Some(request) = tables.requests.iter().find(|request| &request.id == id).cloned() else {
            return Ok(None);
        };
        let attachments = tables
            .attachments
            .iter()
            .filter(|row| &row.request_id == id)
            .cloned()
            .collect();
        let validations = tables
            .validations
            .iter()
            .filter(|row| &row.request_id == id)
            .cloned()
            .collect();
        let history = tables
            .logs
            .iter()
            .filter(|row| row.request_id.as_ref() == Some(id))
            .cloned()
            .collect();
        Ok(Some(RequestDetail {
            request,
            attachments,
            validations,
            history,
        }))
    }

    fn requests_by_requester(&self, requester: &UserId) -> Result<Vec<AdministrativeRequest>, RepositoryError> {
        let tables = self.tables()?;
        Ok(newest_first(
            tables
                .requests
                .iter()
                .filter(|request| &request.requester == requester)
                .cloned()
                .collect(),
        ))
    }

    fn requests_matching(&self, filter: &RequestFilter) -> Result<Vec<AdministrativeRequest>, RepositoryError> {
        let tables = self.tables()?;
        Ok(newest_first(
            tables
                .requests
                .iter()
                .filter(|request| filter.matches(request))
                .cloned()
                .collect(),
        ))
    }

    fn delete_request(&self, id: &RequestId, log: LogEntry) -> Result<Vec<Attachment>, RepositoryError> {
        let mut tables = self.tables()?;
        if !tables.has_request(id) {
            return Err(RepositoryError::NotFound);
        }
        tables.requests.retain(|request| &request.id != id);
        let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut tables.attachments)
            .into_iter()
            .partition(|row| &row.request_id == id);
        tables.attachments = kept;
        tables.validations.retain(|row| &row.request_id != id);
        tables.messages.retain(|row| &row.request_id != id);
        tables.logs.push(log);
        Ok(removed)
    }

    fn latest_log(&self, id: &RequestId, state: LogState) -> Result<Option<LogEntry>, RepositoryError> {
        let tables = self.tables()?;
        Ok(tables
            .logs
            .iter()
            .filter(|row| row.request_id.as_ref() == Some(id) && row.state == state)
            .max_by_key(|row| row.recorded_at)
            .cloned())
    }

    fn audit_trail(&self) -> Result<Vec<LogEntry>, RepositoryError> {
        let tables = self.tables()?;
        let mut logs = tables.logs.clone();
        logs.sort_by_key(|row| row.recorded_at);
        Ok(logs)
    }

    fn append_log(&self, log: LogEntry) -> Result<(), RepositoryError> {
        self.tables()?.logs.push(log);
        Ok(())
    }

    fn messages(&self, id: &RequestId) -> Result<Vec<Message>, RepositoryError> {
        let tables = self.tables()?;
        let mut messages: Vec<_> = tables
            .messages
            .iter()
            .filter(|row| &row.request_id == id)
            .cloned()
            .collect();
        messages.sort_by_key(|row| row.created_at);
        Ok(messages)
    }

    fn notifications_for(&self, recipient: &UserId) -> Result<Vec<Notification>, RepositoryError> {
        let tables = self.tables()?;
        let mut rows: Vec<_> = tables
            .notifications
            .iter()
            .filter(|row| &row.recipient == recipient)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    fn notification(&self, id: &NotificationId) -> Result<Option<Notification>, RepositoryError> {
        let tables = self.tables()?;
        Ok(tables.notifications.iter().find(|row| &row.id == id).cloned())
    }

    fn delete_notification(&self, id: &NotificationId) -> Result<(), RepositoryError> {
        let mut tables = self.tables()?;
        let before = tables.notifications.len();
        tables.notifications.retain(|row| &row.id != id);
        if tables.notifications.len() == before {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }
}

/// Object store kept in a map; URLs still follow the `/documents/{key}` scheme.
#[derive(Debug)]
pub struct InMemoryDocumentStore {
    public_base: String,
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl InMemoryDocumentStore {
    pub fn new(public_base: impl Into<String>) -> Self {
        Self {
            public_base: public_base.into(),
            objects: Mutex::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.objects.lock().map(|objects| objects.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn objects(&self) -> Result<MutexGuard<'_, HashMap<String, Vec<u8>>>, DocumentError> {
        self.objects
            .lock()
            .map_err(|_| DocumentError::Unavailable("document map lock poisoned".to_string()))
    }
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new("http://localhost:3000")
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn put(&self, key: &str, document: &AcceptedDocument) -> Result<StoredDocument, DocumentError> {
        validate_key(key)?;
        self.objects()?.insert(key.to_string(), document.bytes.clone());
        Ok(StoredDocument {
            key: key.to_string(),
            url: public_url(&self.public_base, key),
        })
    }

    async fn fetch(&self, key: &str) -> Result<Vec<u8>, DocumentError> {
        validate_key(key)?;
        self.objects()?
            .get(key)
            .cloned()
            .ok_or_else(|| DocumentError::NotFound(key.to_string()))
    }

    async fn remove(&self, key: &str) -> Result<(), DocumentError> {
        validate_key(key)?;
        self.objects()?.remove(key);
        Ok(())
    }
}
