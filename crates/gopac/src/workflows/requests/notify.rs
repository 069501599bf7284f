//! In-app notification and email fan-out shared by every workflow stage.
//!
//! Notification rows are built before the commit and written with it. Emails
//! go out afterwards; a failed send only produces a [`WorkflowWarning`].

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use tracing::{info, warn};

use super::domain::{DepartmentCode, Notification, NotificationId, RequestId, Role, UserProfile};
use crate::mail::{is_valid_email, EmailMessage, MailError, Mailer};

/// Non-blocking problem reported alongside a successful workflow step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkflowWarning {
    NoAuthorityFound {
        role: Role,
        department: Option<DepartmentCode>,
    },
    InvalidEmailAddress {
        recipient: String,
    },
    EmailFailed {
        recipient: String,
        reason: String,
    },
    EmailBudgetExhausted,
    DocumentCleanupFailed {
        key: String,
    },
}

impl fmt::Display for WorkflowWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowWarning::NoAuthorityFound { role, department } => match department {
                Some(code) => write!(f, "Aucune autorité ({role}) trouvée pour le département {code}"),
                None => write!(f, "Aucune autorité ({role}) trouvée"),
            },
            WorkflowWarning::InvalidEmailAddress { recipient } => {
                write!(f, "Adresse e-mail invalide pour {recipient}")
            }
            WorkflowWarning::EmailFailed { recipient, reason } => {
                write!(f, "Impossible d'envoyer l'e-mail à {recipient}: {reason}")
            }
            WorkflowWarning::EmailBudgetExhausted => {
                write!(f, "Limite d'envoi d'e-mails atteinte, rappels restants ignorés")
            }
            WorkflowWarning::DocumentCleanupFailed { key } => {
                write!(f, "Le document {key} n'a pas pu être supprimé du stockage")
            }
        }
    }
}

/// One recipient of a fan-out: in-app text plus the email built from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    pub recipient: UserProfile,
    pub message: String,
    pub subject: String,
}

impl Dispatch {
    pub fn notification(&self, request_id: Option<&RequestId>, at: DateTime<Utc>) -> Notification {
        Notification {
            id: NotificationId::generate(),
            recipient: self.recipient.id.clone(),
            message: self.message.clone(),
            request_id: request_id.cloned(),
            read: false,
            created_at: at,
        }
    }

    pub fn email(&self) -> EmailMessage {
        EmailMessage::new(&self.recipient.email, &self.subject, &self.message)
    }
}

/// Recipients of one workflow step, deduplicated by user id.
#[derive(Debug, Clone, Default)]
pub struct NotificationFanout {
    dispatches: Vec<Dispatch>,
}

impl NotificationFanout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a recipient; a user already present keeps the first message.
    pub fn push(&mut self, recipient: UserProfile, subject: impl Into<String>, message: impl Into<String>) {
        if self
            .dispatches
            .iter()
            .any(|dispatch| dispatch.recipient.id == recipient.id)
        {
            return;
        }
        self.dispatches.push(Dispatch {
            recipient,
            message: message.into(),
            subject: subject.into(),
        });
    }

    pub fn len(&self) -> usize {
        self.dispatches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dispatches.is_empty()
    }

    pub fn dispatches(&self) -> &[Dispatch] {
        &self.dispatches
    }

    pub fn notifications(&self, request_id: Option<&RequestId>, at: DateTime<Utc>) -> Vec<Notification> {
        self.dispatches
            .iter()
            .map(|dispatch| dispatch.notification(request_id, at))
            .collect()
    }

    /// Send every email in order and collect the failures as warnings.
    pub async fn deliver(self, mailer: &dyn Mailer) -> Vec<WorkflowWarning> {
        let mut warnings = Vec::new();
        for dispatch in self.dispatches {
            if let Err(warning) = send_one(mailer, dispatch.email()).await {
                warnings.push(warning);
            }
        }
        warnings
    }
}

async fn send_one(mailer: &dyn Mailer, email: EmailMessage) -> Result<(), WorkflowWarning> {
    let recipient = email.to.clone();
    if !is_valid_email(&recipient) {
        warn!(recipient = %recipient, "skipping email to malformed address");
        return Err(WorkflowWarning::InvalidEmailAddress { recipient });
    }

    match mailer.send(email).await {
        Ok(()) => {
            info!(recipient = %recipient, "email sent");
            Ok(())
        }
        Err(MailError::InvalidAddress(_)) => {
            warn!(recipient = %recipient, "mailer refused malformed address");
            Err(WorkflowWarning::InvalidEmailAddress { recipient })
        }
        Err(err) => {
            warn!(recipient = %recipient, error = %err, "email delivery failed");
            Err(WorkflowWarning::EmailFailed {
                recipient,
                reason: err.to_string(),
            })
        }
    }
}

/// Successful-send allowance for one dashboard load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmailBudget {
    remaining: usize,
    sent: usize,
}

impl EmailBudget {
    pub fn new(limit: usize) -> Self {
        Self {
            remaining: limit,
            sent: 0,
        }
    }

    pub fn remaining(&self) -> usize {
        self.remaining
    }

    pub fn sent(&self) -> usize {
        self.sent
    }

    /// Send reminders until the allowance is spent. Only successful sends
    /// count; one [`WorkflowWarning::EmailBudgetExhausted`] marks the cut-off.
    pub async fn send_reminders(
        &mut self,
        mailer: &dyn Mailer,
        emails: impl IntoIterator<Item = EmailMessage>,
    ) -> Vec<WorkflowWarning> {
        let mut warnings = Vec::new();
        for email in emails {
            if self.remaining == 0 {
                warn!("reminder email budget exhausted");
                warnings.push(WorkflowWarning::EmailBudgetExhausted);
                break;
            }
            match send_one(mailer, email).await {
                Ok(()) => {
                    self.remaining -= 1;
                    self.sent += 1;
                }
                Err(warning) => warnings.push(warning),
            }
        }
        warnings
    }
}
