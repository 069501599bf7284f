use crate::infra::Portal;
use async_trait::async_trait;
use clap::Args;
use gopac::error::AppError;
use gopac::mail::{EmailMessage, MailError, Mailer};
use gopac::workflows::accounts::Registration;
use gopac::workflows::requests::{
    request_types, DeliveryMethod, DocumentUpload, InMemoryDocumentStore, LicenseLevel,
    NewRequest, RequestKind, Role, UploadPolicy, UserProfile, WorkflowWarning,
};
use std::sync::Arc;

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Have the director general reject the request instead of signing it.
    #[arg(long)]
    pub(crate) reject: bool,
    /// Rejection motif (defaults to "Non spécifié").
    #[arg(long)]
    pub(crate) motif: Option<String>,
    /// Ask for the signed document to be collected in person.
    #[arg(long)]
    pub(crate) in_person: bool,
    /// Print the audit trail as CSV at the end.
    #[arg(long)]
    pub(crate) audit: bool,
}

/// Prints emails instead of sending them.
struct ConsoleMailer;

#[async_trait]
impl Mailer for ConsoleMailer {
    async fn send(&self, message: EmailMessage) -> Result<(), MailError> {
        println!("    email -> {} | {}", message.to, message.subject);
        Ok(())
    }
}

pub(crate) fn print_catalog() {
    println!("Request types");
    for spec in request_types() {
        let justification = if spec.requires_justification {
            " (justification required)"
        } else {
            ""
        };
        let fee = spec
            .payment_amount
            .map(|amount| format!(" | fee {amount}"))
            .unwrap_or_default();
        println!(
            "- {:?}: {} -> {}{}{}",
            spec.kind, spec.label, spec.authority, fee, justification
        );
    }
}

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        reject,
        motif,
        in_person,
        audit,
    } = args;

    let portal = Portal::in_memory(
        Arc::new(InMemoryDocumentStore::default()),
        Arc::new(ConsoleMailer),
        UploadPolicy::default(),
        5,
    );

    println!("Administrative request demo");
    let student = register(&portal, "Awa Camara", "awa.camara@univ.gn", Role::Etudiant, Some("DL")).await?;
    let head = register(&portal, "Ibrahima Kaba", "kaba@univ.gn", Role::ChefDept, Some("DL")).await?;
    let dg = register(&portal, "Mariam Sow", "dg@univ.gn", Role::Dg, None).await?;
    println!(
        "- Accounts: {} ({}), {} ({}), {} ({})",
        student.name, student.role, head.name, head.role, dg.name, dg.role
    );

    println!("\nSubmission");
    let submitted = portal
        .requests
        .submit(
            &student.id,
            NewRequest {
                kind: RequestKind::Releve,
                title: None,
                description: String::new(),
                license_level: LicenseLevel::L2,
                delivery_method: if in_person {
                    DeliveryMethod::InPerson
                } else {
                    DeliveryMethod::Email
                },
                urgency: Default::default(),
                documents: vec![DocumentUpload::from_bytes(
                    "recu_paiement.png",
                    Some("image/png"),
                    b"\x89PNG demo receipt",
                )],
            },
        )
        .await?;
    print_warnings(&submitted.warnings);
    let request = submitted.value.request;
    println!("- {} {} -> {}", request.id, request.title, request.status);

    println!("\nProcessing by the department head");
    let processed = portal
        .requests
        .process(&head.id, &request.id, pdf("releve_traite.pdf"))
        .await?;
    print_warnings(&processed.warnings);
    println!("- status -> {}", processed.value.status);

    println!("\nFinal validation");
    let decided = if reject {
        portal.requests.reject(&dg.id, &request.id, motif).await?
    } else {
        portal
            .requests
            .approve(&dg.id, &request.id, pdf("releve_signe.pdf"))
            .await?
    };
    print_warnings(&decided.warnings);
    println!("- status -> {}", decided.value.status);

    let detail = portal.requests.detail(&student.id, &request.id)?;
    if let Some(signed) = detail.signed_document() {
        println!("- signed document: {}", signed.url);
    }
    if let Some(motif) = detail.validations.iter().find_map(|row| row.motif.as_deref()) {
        println!("- motif: {motif}");
    }

    println!("\nHistory");
    for entry in &detail.history {
        println!("- [{}] {}", entry.state.label(), entry.message);
    }

    let inbox = portal.requests.inbox(&student.id)?;
    println!("\nStudent inbox ({} unread)", inbox.unread);
    for notification in &inbox.notifications {
        println!("- {}", notification.message);
    }

    if audit {
        println!("\nAudit trail");
        print!("{}", portal.requests.export_audit(&dg.id)?);
    }

    Ok(())
}

async fn register(
    portal: &Portal,
    name: &str,
    email: &str,
    role: Role,
    department: Option<&str>,
) -> Result<UserProfile, AppError> {
    Ok(portal
        .accounts
        .register(Registration {
            name: name.to_string(),
            email: email.to_string(),
            password: "demo-password".to_string(),
            role,
            department: department.map(str::to_string),
        })
        .await?)
}

fn pdf(name: &str) -> DocumentUpload {
    DocumentUpload::from_bytes(name, Some("application/pdf"), b"%PDF-1.7 demo")
}

fn print_warnings(warnings: &[WorkflowWarning]) {
    for warning in warnings {
        println!("    warning: {warning}");
    }
}
