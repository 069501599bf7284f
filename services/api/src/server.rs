use crate::cli::ServeArgs;
use crate::infra::{AppState, Portal};
use crate::routes::with_portal_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use gopac::config::AppConfig;
use gopac::error::AppError;
use gopac::mail::mailer_from_config;
use gopac::telemetry;
use gopac::workflows::requests::LocalDocumentStore;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{info, warn};

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    tokio::fs::create_dir_all(&config.storage.documents_dir).await?;
    let documents = Arc::new(LocalDocumentStore::new(
        config.storage.documents_dir.clone(),
        config.storage.public_url.clone(),
    ));
    if config.email.api_key.is_none() {
        warn!("GOPAC_EMAIL_API_KEY is not set; emails will only be logged");
    }
    let mailer = mailer_from_config(&config.email);
    let portal = Portal::from_config(&config, documents, mailer);

    let app = with_portal_routes(&portal)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        documents = %config.storage.documents_dir.display(),
        "administrative request portal ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
