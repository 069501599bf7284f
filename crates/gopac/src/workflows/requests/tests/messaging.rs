use super::common::*;

use crate::workflows::requests::messaging::NewMessage;
use crate::workflows::requests::realtime::{PortalEvent, Topic};
use crate::workflows::requests::repository::WorkflowRepository;
use crate::workflows::requests::service::WorkflowError;

fn text(content: &str) -> NewMessage {
    NewMessage {
        content: content.to_string(),
        in_reply_to: None,
    }
}

#[tokio::test]
async fn student_messages_reach_the_handling_authority() {
    let harness = harness();
    let request = submitted(&harness).await;

    let outcome = harness
        .service
        .send_message(
            &harness.cast.student.id,
            &request.id,
            text("Bonjour, avez-vous bien reçu mon reçu de paiement ?"),
        )
        .await
        .expect("message posted");

    assert!(!outcome.value.is_admin);
    assert!(outcome.warnings.is_empty());
    let inbox = harness
        .store
        .notifications_for(&harness.cast.chef_dl.id)
        .expect("inbox");
    assert_eq!(inbox.len(), 2);
    assert_eq!(
        inbox[0].message,
        format!(
            "Nouveau message de Awa Camara pour la demande Relevé de notes (Ref: {}): \"Bonjour, avez-vous bien reçu mon reçu de paiement ...\"",
            request.id
        )
    );
    assert_eq!(
        harness.mailer.sent().len(),
        2,
        "threads never send email, only the submission did"
    );
}

#[tokio::test]
async fn staff_replies_notify_the_student_and_close_the_prompt() {
    let harness = harness();
    let request = submitted(&harness).await;
    harness
        .service
        .send_message(&harness.cast.student.id, &request.id, text("Question"))
        .await
        .expect("student message");

    let prompt = harness
        .store
        .notifications_for(&harness.cast.chef_dl.id)
        .expect("inbox")
        .remove(0);
    let reply = harness
        .service
        .send_message(
            &harness.cast.chef_dl.id,
            &request.id,
            NewMessage {
                content: "Oui, tout est en ordre.".to_string(),
                in_reply_to: Some(prompt.id.clone()),
            },
        )
        .await
        .expect("reply posted");

    assert!(reply.value.is_admin);
    let answered = harness
        .store
        .notification(&prompt.id)
        .expect("read")
        .expect("still stored");
    assert!(answered.read);

    let student_inbox = harness
        .store
        .notifications_for(&harness.cast.student.id)
        .expect("inbox");
    assert!(student_inbox[0].message.starts_with("Nouveau message de Ibrahima Kaba"));

    let thread = harness
        .service
        .thread(&harness.cast.student.id, &request.id)
        .expect("thread");
    let contents: Vec<_> = thread.iter().map(|message| message.content.as_str()).collect();
    assert_eq!(contents, vec!["Question", "Oui, tout est en ordre."]);
}

#[tokio::test]
async fn replies_cannot_close_someone_elses_notification() {
    let harness = harness();
    let request = submitted(&harness).await;
    let foreign = harness
        .store
        .notifications_for(&harness.cast.student.id)
        .expect("inbox")
        .remove(0);

    let err = harness
        .service
        .send_message(
            &harness.cast.chef_dl.id,
            &request.id,
            NewMessage {
                content: "Réponse".to_string(),
                in_reply_to: Some(foreign.id),
            },
        )
        .await
        .expect_err("not the recipient");
    assert!(matches!(err, WorkflowError::Forbidden(_)));
}

#[tokio::test]
async fn blank_messages_and_outsiders_are_refused() {
    let harness = harness();
    let request = submitted(&harness).await;

    let err = harness
        .service
        .send_message(&harness.cast.student.id, &request.id, text("   "))
        .await
        .expect_err("empty");
    assert!(matches!(err, WorkflowError::Validation(_)));

    let err = harness
        .service
        .send_message(&harness.cast.chef_ntic.id, &request.id, text("Bonjour"))
        .await
        .expect_err("other department");
    assert!(matches!(err, WorkflowError::Forbidden(_)));

    assert!(matches!(
        harness.service.thread(&harness.cast.ntic_student.id, &request.id),
        Err(WorkflowError::Forbidden(_))
    ));
}

#[tokio::test]
async fn subscribers_receive_posted_messages() {
    let harness = harness();
    let request = submitted(&harness).await;
    let mut thread = harness
        .service
        .events()
        .subscribe(Topic::Request(request.id.clone()));
    let mut inbox = harness
        .service
        .events()
        .subscribe(Topic::Inbox(harness.cast.student.id.clone()));

    harness
        .service
        .send_message(&harness.cast.dg.id, &request.id, text("Merci de patienter."))
        .await
        .expect("dg may write");

    match thread.recv().await.expect("thread event") {
        PortalEvent::MessagePosted(message) => {
            assert_eq!(message.content, "Merci de patienter.");
            assert!(message.is_admin);
        }
        other => panic!("unexpected event {other:?}"),
    }
    match inbox.recv().await.expect("inbox event") {
        PortalEvent::NotificationCreated(row) => {
            assert_eq!(row.recipient, harness.cast.student.id);
        }
        other => panic!("unexpected event {other:?}"),
    }
}
