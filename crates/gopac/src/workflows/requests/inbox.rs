use serde::Serialize;
use tracing::debug;

use super::domain::{Notification, NotificationId, UserId};
use super::repository::{DirectoryRepository, RepositoryError, WorkflowBatch, WorkflowRepository};
use super::service::{RequestWorkflowService, WorkflowError};

/// Notifications of one user, newest first.
#[derive(Debug, Clone, Serialize)]
pub struct Inbox {
    pub unread: usize,
    pub notifications: Vec<Notification>,
}

impl<R> RequestWorkflowService<R>
where
    R: DirectoryRepository + WorkflowRepository + 'static,
{
    pub fn inbox(&self, actor_id: &UserId) -> Result<Inbox, WorkflowError> {
        let actor = self.actor(actor_id)?;
        let notifications = self.repository.notifications_for(&actor.id)?;
        let unread = notifications.iter().filter(|row| !row.read).count();
        Ok(Inbox {
            unread,
            notifications,
        })
    }

    pub fn unread_count(&self, actor_id: &UserId) -> Result<usize, WorkflowError> {
        Ok(self.inbox(actor_id)?.unread)
    }

    pub fn mark_notification_read(
        &self,
        actor_id: &UserId,
        id: &NotificationId,
    ) -> Result<Notification, WorkflowError> {
        let mut notification = self.owned_notification(actor_id, id)?;
        if !notification.read {
            self.repository.commit(WorkflowBatch {
                mark_read: vec![id.clone()],
                ..WorkflowBatch::default()
            })?;
            notification.read = true;
        }
        Ok(notification)
    }

    /// Returns how many notifications changed.
    pub fn mark_all_read(&self, actor_id: &UserId) -> Result<usize, WorkflowError> {
        let actor = self.actor(actor_id)?;
        let unread: Vec<NotificationId> = self
            .repository
            .notifications_for(&actor.id)?
            .into_iter()
            .filter(|row| !row.read)
            .map(|row| row.id)
            .collect();
        let count = unread.len();
        if count > 0 {
            self.repository.commit(WorkflowBatch {
                mark_read: unread,
                ..WorkflowBatch::default()
            })?;
        }
        debug!(user = %actor.id, count, "notifications marked read");
        Ok(count)
    }

    pub fn delete_notification(
        &self,
        actor_id: &UserId,
        id: &NotificationId,
    ) -> Result<(), WorkflowError> {
        self.owned_notification(actor_id, id)?;
        self.repository.delete_notification(id)?;
        Ok(())
    }

    fn owned_notification(
        &self,
        actor_id: &UserId,
        id: &NotificationId,
    ) -> Result<Notification, WorkflowError> {
        let actor = self.actor(actor_id)?;
        let notification = self
            .repository
            .notification(id)?
            .ok_or(WorkflowError::Repository(RepositoryError::NotFound))?;
        if notification.recipient != actor.id {
            return Err(WorkflowError::Forbidden(
                "cette notification ne vous est pas destinée".to_string(),
            ));
        }
        Ok(notification)
    }
}
