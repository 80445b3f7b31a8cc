//! HTTP server
//!
//! Routes:
//! - `POST /mutate` - mutating admission webhook for Pods
//! - `POST /sync-pod` - callback from the injected init container
//! - `GET /health`, `GET /ready` - liveness and readiness

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Query, State},
    response::Json,
    routing::{get, post},
    Router,
};
use axum_server::tls_rustls::RustlsConfig;
use kube::api::DynamicObject;
use kube::core::admission::AdmissionReview;
use serde_json::{json, Value};
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::{
    timeout::TimeoutLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{info, warn, Level};

use crate::admission::review_pod_admission;
use crate::config::WebhookConfig;
use crate::error::{Error, Result};
use crate::mutation::{init_container::SYNC_POD_PATH, InjectionSettings};
use crate::sync::{sync_pod, ClusterOps, SyncPodRequest, SyncPodResponse};

/// Path the API server sends Pod admission reviews to.
pub const MUTATE_PATH: &str = "/mutate";

const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Shared state for handlers
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<InjectionSettings>,
    pub cluster: Arc<dyn ClusterOps>,
}

impl AppState {
    pub fn new(settings: InjectionSettings, cluster: Arc<dyn ClusterOps>) -> Self {
        Self {
            settings: Arc::new(settings),
            cluster,
        }
    }
}

/// Build the router with all webhook routes
pub fn router(state: AppState, request_timeout: Duration) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route(MUTATE_PATH, post(mutate_handler))
        .route(SYNC_POD_PATH, post(sync_pod_handler))
        .layer(
            ServiceBuilder::new()
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                        .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                        .on_response(DefaultOnResponse::new().level(Level::INFO)),
                )
                .layer(TimeoutLayer::new(request_timeout)),
        )
        .with_state(state)
}

async fn health_check() -> Json<Value> {
    status_body("healthy")
}

async fn readiness_check() -> Json<Value> {
    status_body("ready")
}

fn status_body(status: &str) -> Json<Value> {
    Json(json!({
        "status": status,
        "service": "node-labels-webhook",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn mutate_handler(
    State(state): State<AppState>,
    Json(review): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    Json(review_pod_admission(review, &state.settings))
}

async fn sync_pod_handler(
    State(state): State<AppState>,
    Query(request): Query<SyncPodRequest>,
) -> Result<Json<SyncPodResponse>> {
    let response = sync_pod(state.cluster.as_ref(), &request).await?;
    Ok(Json(response))
}

/// Serve until Ctrl+C or SIGTERM.
///
/// Uses TLS when the configuration names a certificate and key.
pub async fn serve(config: &WebhookConfig, state: AppState) -> Result<()> {
    let addr = config.socket_addr()?;
    let app = router(state, Duration::from_secs(config.request_timeout_seconds));

    if let Some(tls) = &config.tls {
        let tls_config = RustlsConfig::from_pem_file(&tls.cert_path, &tls.key_path)
            .await
            .map_err(|e| Error::Config(format!("TLS config error: {e}")))?;

        let handle = axum_server::Handle::new();
        let shutdown_handle = handle.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            shutdown_handle.graceful_shutdown(Some(SHUTDOWN_GRACE_PERIOD));
        });

        info!(addr = %addr, "Webhook HTTPS server listening");
        axum_server::bind_rustls(addr, tls_config)
            .handle(handle)
            .serve(app.into_make_service())
            .await?;
    } else {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!(addr = %addr, "Webhook HTTP server listening (TLS disabled)");
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
    }

    info!("Webhook server stopped");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM. A handler that cannot be installed is
/// logged and never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let received = tokio::select! {
        () = ctrl_c => "Ctrl+C",
        () = terminate => "SIGTERM",
    };
    info!(signal = received, "Shutting down webhook server");
}
