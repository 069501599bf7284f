//! Per-role landing data. Loading a dashboard also emails reminders for
//! pending work, capped by the per-load email budget.

use serde::Serialize;

use super::domain::{AdministrativeRequest, Notification, RequestStatus, Role, StatusCounts, UserId};
use super::notify::EmailBudget;
use super::repository::{DirectoryRepository, RequestFilter, WorkflowRepository};
use super::service::{queue_filter, RequestWorkflowService, WorkflowError, WorkflowOutcome};
use crate::mail::EmailMessage;

const RECENT_REQUESTS: usize = 5;
const RECENT_NOTIFICATIONS: usize = 10;

#[derive(Debug, Clone, Serialize)]
pub struct Dashboard {
    pub role: Role,
    pub counts: StatusCounts,
    pub recent_requests: Vec<AdministrativeRequest>,
    pub recent_notifications: Vec<Notification>,
    pub unread_notifications: usize,
    pub reminders_sent: usize,
}

impl<R> RequestWorkflowService<R>
where
    R: DirectoryRepository + WorkflowRepository + 'static,
{
    pub async fn dashboard(
        &self,
        actor_id: &UserId,
    ) -> Result<WorkflowOutcome<Dashboard>, WorkflowError> {
        let actor = self.actor(actor_id)?;

        let scope = match actor.role {
            Role::Etudiant => self.repository.requests_by_requester(&actor.id)?,
            Role::Dg => self.repository.requests_matching(&RequestFilter::default())?,
            _ => match queue_filter(&actor, None)? {
                Some(filter) => self.repository.requests_matching(&filter)?,
                None => Vec::new(),
            },
        };
        let counts = StatusCounts::tally(&scope);
        let recent_requests: Vec<_> = match actor.role {
            Role::Dg => scope
                .into_iter()
                .filter(|request| request.status == RequestStatus::EnTraitement)
                .take(RECENT_REQUESTS)
                .collect(),
            _ => scope.into_iter().take(RECENT_REQUESTS).collect(),
        };

        let notifications = self.repository.notifications_for(&actor.id)?;
        let unread_notifications = notifications.iter().filter(|row| !row.read).count();
        let recent_notifications: Vec<_> =
            notifications.into_iter().take(RECENT_NOTIFICATIONS).collect();

        let mut reminders = Vec::new();
        match actor.role {
            Role::Etudiant => {}
            Role::Dg => {
                reminders.extend(recent_requests.iter().map(|request| {
                    EmailMessage::new(
                        &actor.email,
                        format!("Nouvelle demande à valider: {}", request.title),
                        format!(
                            "Une demande de {} ({}) est en attente de validation finale. Veuillez vérifier dans l'application.",
                            request.requester_name, request.title
                        ),
                    )
                }));
            }
            _ => {
                reminders.extend(
                    recent_requests
                        .iter()
                        .filter(|request| request.status == RequestStatus::EnAttente)
                        .map(|request| {
                            EmailMessage::new(
                                &actor.email,
                                format!("Nouvelle demande à traiter: {}", request.title),
                                format!(
                                    "Une nouvelle demande de {} ({}) a été soumise. Veuillez la traiter dans l'application.",
                                    request.requester_name, request.title
                                ),
                            )
                        }),
                );
            }
        }
        if actor.role != Role::Dg {
            reminders.extend(recent_notifications.iter().filter(|row| !row.read).map(|row| {
                EmailMessage::new(
                    &actor.email,
                    "Nouvelle notification",
                    format!("Vous avez une nouvelle notification : {}", row.message),
                )
            }));
        }

        let mut budget = EmailBudget::new(self.email_budget);
        let warnings = budget.send_reminders(self.mailer.as_ref(), reminders).await;

        Ok(WorkflowOutcome::new(
            Dashboard {
                role: actor.role,
                counts,
                recent_requests,
                recent_notifications,
                unread_notifications,
                reminders_sent: budget.sent(),
            },
            warnings,
        ))
    }
}
