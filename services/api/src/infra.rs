use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use gopac::config::AppConfig;
use gopac::mail::Mailer;
use gopac::workflows::accounts::AccountService;
use gopac::workflows::requests::{
    DocumentStore, EventHub, InMemoryPortalStore, RequestWorkflowService, UploadPolicy,
};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Services sharing one in-memory store.
pub(crate) struct Portal {
    pub(crate) requests: Arc<RequestWorkflowService<InMemoryPortalStore>>,
    pub(crate) accounts: Arc<AccountService<InMemoryPortalStore>>,
}

impl Portal {
    pub(crate) fn in_memory(
        documents: Arc<dyn DocumentStore>,
        mailer: Arc<dyn Mailer>,
        policy: UploadPolicy,
        email_budget: usize,
    ) -> Self {
        let store = Arc::new(InMemoryPortalStore::new());
        let requests = RequestWorkflowService::new(
            store.clone(),
            documents,
            mailer,
            Arc::new(EventHub::default()),
        )
        .with_upload_policy(policy)
        .with_email_budget(email_budget);
        Self {
            accounts: Arc::new(AccountService::new(store)),
            requests: Arc::new(requests),
        }
    }

    pub(crate) fn from_config(
        config: &AppConfig,
        documents: Arc<dyn DocumentStore>,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        Self::in_memory(
            documents,
            mailer,
            UploadPolicy::new(config.storage.max_upload_bytes),
            config.email.budget_per_load,
        )
    }
}
