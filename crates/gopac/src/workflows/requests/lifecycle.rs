//! Request status state machine.
//!
//! A request is created in [`RequestStatus::EnAttente`]. From there:
//!
//! ```text
//! en_attente --process--> en_traitement --approve--> validee
//!     |                         |
//!     |                         +--reject--> rejetee
//!     +--cancel--> rejetee
//! ```
//!
//! `validee` and `rejetee` are terminal. Every stage asks [`next_status`]
//! before touching storage, and the repository re-checks the expected status
//! when the write is committed.

use serde::Serialize;

use super::domain::{Decision, RequestStatus, Role};

/// Action applied to an existing request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// Processing authority attached the processed document.
    Process,
    /// Student withdrew the request before processing.
    Cancel,
    /// Director general signed the processed document.
    Approve,
    /// Director general refused the processed document.
    Reject,
}

impl LifecycleEvent {
    pub const ALL: [LifecycleEvent; 4] = [
        LifecycleEvent::Process,
        LifecycleEvent::Cancel,
        LifecycleEvent::Approve,
        LifecycleEvent::Reject,
    ];

    pub const fn label(self) -> &'static str {
        match self {
            LifecycleEvent::Process => "process",
            LifecycleEvent::Cancel => "cancel",
            LifecycleEvent::Approve => "approve",
            LifecycleEvent::Reject => "reject",
        }
    }

    pub const fn from_decision(decision: Decision) -> Self {
        match decision {
            Decision::Valide => LifecycleEvent::Approve,
            Decision::Rejete => LifecycleEvent::Reject,
        }
    }

    /// Who may trigger the event, ignoring department scoping and ownership.
    pub fn permits(self, role: Role) -> bool {
        match self {
            LifecycleEvent::Cancel => role == Role::Etudiant,
            LifecycleEvent::Process => {
                matches!(
                    role,
                    Role::ChefDept | Role::DirecteurProg | Role::Dae | Role::SecretaireDg
                )
            }
            LifecycleEvent::Approve | LifecycleEvent::Reject => role == Role::Dg,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("cannot {} a request that is {from}", .event.label())]
pub struct TransitionError {
    pub from: RequestStatus,
    pub event: LifecycleEvent,
}

pub const fn initial_status() -> RequestStatus {
    RequestStatus::EnAttente
}

/// The only transition function of the portal.
pub fn next_status(
    from: RequestStatus,
    event: LifecycleEvent,
) -> Result<RequestStatus, TransitionError> {
    match (from, event) {
        (RequestStatus::EnAttente, LifecycleEvent::Process) => Ok(RequestStatus::EnTraitement),
        (RequestStatus::EnAttente, LifecycleEvent::Cancel) => Ok(RequestStatus::Rejetee),
        (RequestStatus::EnTraitement, LifecycleEvent::Approve) => Ok(RequestStatus::Validee),
        (RequestStatus::EnTraitement, LifecycleEvent::Reject) => Ok(RequestStatus::Rejetee),
        _ => Err(TransitionError { from, event }),
    }
}

/// Events that can currently be applied to a request in `status`.
pub fn available_events(status: RequestStatus) -> Vec<LifecycleEvent> {
    LifecycleEvent::ALL
        .into_iter()
        .filter(|event| next_status(status, *event).is_ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATUSES: [RequestStatus; 4] = [
        RequestStatus::EnAttente,
        RequestStatus::EnTraitement,
        RequestStatus::Validee,
        RequestStatus::Rejetee,
    ];

    #[test]
    fn only_table_edges_are_reachable() {
        let mut edges = Vec::new();
        for from in STATUSES {
            for event in LifecycleEvent::ALL {
                if let Ok(to) = next_status(from, event) {
                    edges.push((from, event, to));
                }
            }
        }

        assert_eq!(
            edges,
            vec![
                (
                    RequestStatus::EnAttente,
                    LifecycleEvent::Process,
                    RequestStatus::EnTraitement
                ),
                (
                    RequestStatus::EnAttente,
                    LifecycleEvent::Cancel,
                    RequestStatus::Rejetee
                ),
                (
                    RequestStatus::EnTraitement,
                    LifecycleEvent::Approve,
                    RequestStatus::Validee
                ),
                (
                    RequestStatus::EnTraitement,
                    LifecycleEvent::Reject,
                    RequestStatus::Rejetee
                ),
            ]
        );
    }

    #[test]
    fn terminal_states_accept_no_event() {
        assert!(available_events(RequestStatus::Validee).is_empty());
        assert!(available_events(RequestStatus::Rejetee).is_empty());
    }

    #[test]
    fn cancellation_after_processing_is_refused() {
        let err = next_status(RequestStatus::EnTraitement, LifecycleEvent::Cancel)
            .expect_err("processed requests cannot be cancelled");
        assert_eq!(err.from, RequestStatus::EnTraitement);
        assert_eq!(
            err.to_string(),
            "cannot cancel a request that is en_traitement"
        );
    }

    #[test]
    fn only_dg_signs_off() {
        assert!(LifecycleEvent::Approve.permits(Role::Dg));
        assert!(!LifecycleEvent::Approve.permits(Role::ChefDept));
        assert!(!LifecycleEvent::Process.permits(Role::Dg));
        assert!(LifecycleEvent::Process.permits(Role::Dae));
        assert!(LifecycleEvent::Cancel.permits(Role::Etudiant));
        assert_eq!(
            LifecycleEvent::from_decision(Decision::Rejete),
            LifecycleEvent::Reject
        );
    }
}
