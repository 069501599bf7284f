//! Per-request message threads between the student and the handling staff.

use chrono::Utc;
use serde::Deserialize;
use tracing::{info, warn};

use super::domain::{Message, MessageId, NotificationId, RequestId, UserId, UserProfile};
use super::notify::{NotificationFanout, WorkflowWarning};
use super::repository::{DirectoryRepository, WorkflowBatch, WorkflowRepository};
use super::service::{ensure_can_view, RequestWorkflowService, WorkflowError, WorkflowOutcome};

const PREVIEW_CHARS: usize = 50;

#[derive(Debug, Clone, Deserialize)]
pub struct NewMessage {
    pub content: String,
    /// Notification being answered; it is marked read with the reply.
    #[serde(default)]
    pub in_reply_to: Option<NotificationId>,
}

fn preview(content: &str) -> String {
    let mut chars = content.chars();
    let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

impl<R> RequestWorkflowService<R>
where
    R: DirectoryRepository + WorkflowRepository + 'static,
{
    /// Post to a request thread and notify the other side.
    pub async fn send_message(
        &self,
        actor_id: &UserId,
        request_id: &RequestId,
        input: NewMessage,
    ) -> Result<WorkflowOutcome<Message>, WorkflowError> {
        let author = self.actor(actor_id)?;
        let request = self.load_request(request_id)?;
        ensure_can_view(&author, &request)?;

        let content = input.content.trim().to_string();
        if content.is_empty() {
            return Err(WorkflowError::Validation(
                "le message ne peut pas être vide".to_string(),
            ));
        }

        let mut mark_read = Vec::new();
        if let Some(notification_id) = input.in_reply_to {
            let notification = self
                .repository
                .notification(&notification_id)?
                .ok_or_else(|| WorkflowError::Validation("notification introuvable".to_string()))?;
            if notification.recipient != author.id {
                return Err(WorkflowError::Forbidden(
                    "cette notification ne vous est pas destinée".to_string(),
                ));
            }
            mark_read.push(notification_id);
        }

        let is_admin = author.id != request.requester;
        let mut warnings = Vec::new();
        let recipients: Vec<UserProfile> = if is_admin {
            self.repository.user(&request.requester)?.into_iter().collect()
        } else {
            let (role, authorities) =
                self.resolve_authorities(request.kind, request.department.as_ref())?;
            if authorities.is_empty() {
                warn!(request_id = %request.id, role = %role, "message has no staff recipient");
                warnings.push(WorkflowWarning::NoAuthorityFound {
                    role,
                    department: request
                        .department
                        .clone()
                        .filter(|_| role.is_department_scoped()),
                });
            }
            authorities
        };

        let now = Utc::now();
        let message = Message {
            id: MessageId::generate(),
            request_id: request.id.clone(),
            author: author.id.clone(),
            author_name: author.name.clone(),
            content,
            is_admin,
            created_at: now,
        };

        let text = format!(
            "Nouveau message de {} pour la demande {} (Ref: {}): \"{}\"",
            author.name,
            request.title,
            request.id,
            preview(&message.content)
        );
        let mut fanout = NotificationFanout::new();
        for recipient in recipients {
            if recipient.id != author.id {
                fanout.push(recipient, format!("Nouveau message: {}", request.title), text.clone());
            }
        }
        let notifications = fanout.notifications(Some(&request.id), now);

        self.repository.commit(WorkflowBatch {
            messages: vec![message.clone()],
            notifications: notifications.clone(),
            mark_read,
            ..WorkflowBatch::default()
        })?;
        info!(request_id = %request.id, author = %author.id, is_admin, "message posted");

        self.events.message_posted(&message);
        self.events.notifications_created(&notifications);
        Ok(WorkflowOutcome::new(message, warnings))
    }

    /// Thread of a request, oldest first.
    pub fn thread(
        &self,
        actor_id: &UserId,
        request_id: &RequestId,
    ) -> Result<Vec<Message>, WorkflowError> {
        let actor = self.actor(actor_id)?;
        let request = self.load_request(request_id)?;
        ensure_can_view(&actor, &request)?;
        Ok(self.repository.messages(&request.id)?)
    }
}
