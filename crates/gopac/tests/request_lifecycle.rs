//! End-to-end scenarios for the request lifecycle, driven through the public
//! account and workflow services with documents written to disk.

mod common {
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use gopac::mail::{EmailMessage, MailError, Mailer};
    use gopac::workflows::accounts::{AccountService, Registration};
    use gopac::workflows::requests::{
        DocumentUpload, EventHub, InMemoryPortalStore, LocalDocumentStore, Role,
        RequestWorkflowService, UserProfile,
    };

    #[derive(Default)]
    pub struct OutboxMailer {
        sent: Mutex<Vec<EmailMessage>>,
    }

    impl OutboxMailer {
        pub fn subjects_for(&self, address: &str) -> Vec<String> {
            self.sent
                .lock()
                .expect("outbox poisoned")
                .iter()
                .filter(|message| message.to == address)
                .map(|message| message.subject.clone())
                .collect()
        }
    }

    #[async_trait]
    impl Mailer for OutboxMailer {
        async fn send(&self, message: EmailMessage) -> Result<(), MailError> {
            self.sent.lock().expect("outbox poisoned").push(message);
            Ok(())
        }
    }

    pub struct Portal {
        pub accounts: AccountService<InMemoryPortalStore>,
        pub workflow: Arc<RequestWorkflowService<InMemoryPortalStore>>,
        pub mailer: Arc<OutboxMailer>,
        pub documents_dir: PathBuf,
    }

    impl Drop for Portal {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.documents_dir);
        }
    }

    pub fn portal() -> Portal {
        let store = Arc::new(InMemoryPortalStore::new());
        let documents_dir =
            std::env::temp_dir().join(format!("gopac-documents-{}", uuid::Uuid::new_v4()));
        let mailer = Arc::new(OutboxMailer::default());
        let workflow = Arc::new(RequestWorkflowService::new(
            store.clone(),
            Arc::new(LocalDocumentStore::new(
                documents_dir.clone(),
                "http://gopac.test",
            )),
            mailer.clone(),
            Arc::new(EventHub::default()),
        ));
        Portal {
            accounts: AccountService::new(store),
            workflow,
            mailer,
            documents_dir,
        }
    }

    pub async fn register(
        portal: &Portal,
        name: &str,
        email: &str,
        role: Role,
        department: Option<&str>,
    ) -> UserProfile {
        portal
            .accounts
            .register(Registration {
                name: name.to_string(),
                email: email.to_string(),
                password: "motdepasse".to_string(),
                role,
                department: department.map(str::to_string),
            })
            .await
            .expect("registration succeeds")
    }

    pub fn pdf(name: &str) -> DocumentUpload {
        DocumentUpload::from_bytes(name, Some("application/pdf"), b"%PDF-1.4 signed")
    }

    pub fn jpeg(name: &str) -> DocumentUpload {
        DocumentUpload::from_bytes(name, Some("image/jpeg"), b"\xff\xd8\xff jpeg")
    }
}

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::*;
use gopac::workflows::actor::ACTOR_HEADER;
use gopac::workflows::requests::{
    request_router, Decision, LicenseLevel, LogState, NewRequest, RequestKind,
    RequestStatus, Role, WorkflowError,
};
use tower::ServiceExt;

fn releve() -> NewRequest {
    NewRequest {
        kind: RequestKind::Releve,
        title: None,
        description: String::new(),
        license_level: LicenseLevel::L3,
        delivery_method: Default::default(),
        urgency: Default::default(),
        documents: vec![jpeg("quittance.jpg")],
    }
}

#[tokio::test]
async fn transcript_request_runs_from_submission_to_signed_document() {
    let portal = portal();
    let student = register(&portal, "Awa Camara", "awa@univ.test", Role::Etudiant, Some("DL")).await;
    let head = register(&portal, "Ibrahima Kaba", "kaba@univ.test", Role::ChefDept, Some("DL")).await;
    let dg = register(&portal, "Mariam Sow", "sow@univ.test", Role::Dg, None).await;
    register(&portal, "Fatou Bah", "bah@univ.test", Role::ChefDept, Some("NTIC")).await;

    let submitted = portal
        .workflow
        .submit(&student.id, releve())
        .await
        .expect("submitted");
    let request_id = submitted.value.request.id.clone();
    assert!(portal.mailer.subjects_for("bah@univ.test").is_empty());
    assert_eq!(
        portal.mailer.subjects_for("kaba@univ.test"),
        vec!["Nouvelle demande à traiter: Relevé de notes".to_string()]
    );

    portal
        .workflow
        .process(&head.id, &request_id, pdf("releve.pdf"))
        .await
        .expect("processed");
    let approved = portal
        .workflow
        .approve(&dg.id, &request_id, pdf("releve_signe.pdf"))
        .await
        .expect("approved");
    assert_eq!(approved.value.status, RequestStatus::Validee);

    let detail = portal
        .workflow
        .detail(&student.id, &request_id)
        .expect("detail");
    let signed = detail.signed_document().expect("signed pdf attached");
    assert!(portal.documents_dir.join(&signed.storage_key).is_file());
    let bytes = portal
        .workflow
        .documents()
        .fetch(&signed.storage_key)
        .await
        .expect("stored on disk");
    assert!(bytes.starts_with(b"%PDF"));

    let states: Vec<_> = detail.history.iter().map(|entry| entry.state).collect();
    assert_eq!(
        states,
        vec![LogState::EnAttente, LogState::EnTraitement, LogState::Validee]
    );
}

#[tokio::test]
async fn unreadable_document_is_rejected_with_its_motif() {
    let portal = portal();
    let student = register(&portal, "Awa Camara", "awa@univ.test", Role::Etudiant, Some("DL")).await;
    let head = register(&portal, "Ibrahima Kaba", "kaba@univ.test", Role::ChefDept, Some("DL")).await;
    let dg = register(&portal, "Mariam Sow", "sow@univ.test", Role::Dg, None).await;

    let request_id = portal
        .workflow
        .submit(&student.id, releve())
        .await
        .expect("submitted")
        .value
        .request
        .id;
    portal
        .workflow
        .process(&head.id, &request_id, pdf("releve.pdf"))
        .await
        .expect("processed");
    portal
        .workflow
        .reject(&dg.id, &request_id, Some("Document illisible".to_string()))
        .await
        .expect("rejected");

    let detail = portal
        .workflow
        .detail(&student.id, &request_id)
        .expect("detail");
    assert_eq!(detail.request.status, RequestStatus::Rejetee);
    assert_eq!(detail.validations[0].decision, Decision::Rejete);
    assert_eq!(detail.validations[0].motif.as_deref(), Some("Document illisible"));

    // Terminal requests can be removed by their owner, leaving the log behind.
    portal
        .workflow
        .delete(&student.id, &request_id)
        .await
        .expect("deleted");
    assert!(matches!(
        portal.workflow.detail(&student.id, &request_id),
        Err(WorkflowError::NotFound(_))
    ));
    let csv = portal.workflow.export_audit(&dg.id).expect("export");
    assert!(csv.contains("supprimee"));
}

#[tokio::test]
async fn http_clients_walk_the_same_lifecycle() {
    let portal = portal();
    let student = register(&portal, "Awa Camara", "awa@univ.test", Role::Etudiant, Some("DL")).await;
    let head = register(&portal, "Ibrahima Kaba", "kaba@univ.test", Role::ChefDept, Some("DL")).await;
    let router = request_router(portal.workflow.clone());

    let response = router
        .clone()
        .oneshot(
            Request::post("/api/v1/requests")
                .header(ACTOR_HEADER, student.id.as_str())
                .header("content-type", "application/json")
                .body(Body::from(
                    serde_json::to_vec(&serde_json::json!({
                        "kind": "releve",
                        "license_level": "L1",
                        "documents": [jpeg("quittance.jpg")],
                    }))
                    .expect("json"),
                ))
                .expect("request builds"),
        )
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = router
        .oneshot(
            Request::get("/api/v1/requests/queue?status=en_attente")
                .header(ACTOR_HEADER, head.id.as_str())
                .body(Body::empty())
                .expect("request builds"),
        )
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .expect("body");
    let queue: serde_json::Value = serde_json::from_slice(&body).expect("json");
    assert_eq!(queue.as_array().map(Vec::len), Some(1));
    assert_eq!(queue[0]["requester_name"].as_str(), Some("Awa Camara"));
}
