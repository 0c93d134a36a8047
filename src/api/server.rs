//! API server assembly and lifecycle

use super::{
    middleware::{create_cors_layer, request_id_middleware, track_metrics_middleware},
    monitoring::MetricsRegistry,
    routes::create_router,
};
use crate::accounts::AccountService;
use crate::catalog::CatalogService;
use crate::config::ServerConfig;
use crate::payments::PaymentService;
use crate::plays::PlayCreditTracker;
use crate::prizes::PrizeClaimWorkflow;
use crate::purchases::PurchaseLedger;
use crate::sessions::SessionAuthority;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::signal;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::info;

/// Shared application state: one handle per core service.
pub struct AppState {
    pub sessions: Arc<SessionAuthority>,
    pub accounts: Arc<AccountService>,
    pub catalog: Arc<CatalogService>,
    pub purchases: Arc<PurchaseLedger>,
    pub plays: Arc<PlayCreditTracker>,
    pub prizes: Arc<PrizeClaimWorkflow>,
    pub payments: Arc<PaymentService>,
    pub metrics: Arc<MetricsRegistry>,
    pub version: String,
}

pub struct ApiServer {
    config: ServerConfig,
    state: Arc<AppState>,
}

impl ApiServer {
    pub fn new(config: ServerConfig, state: Arc<AppState>) -> Self {
        Self { config, state }
    }

    /// Serve until SIGINT/SIGTERM, then drain gracefully.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        let app = self.create_app();
        let addr = SocketAddr::from((
            self.config.host.parse::<std::net::IpAddr>()?,
            self.config.port,
        ));

        info!("starting raspa API server");
        info!("   listen: http://{addr}");
        info!("   cors: {:?}", self.config.allowed_origins);
        info!("   request timeout: {}s", self.config.request_timeout_secs);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("API server stopped gracefully");
        Ok(())
    }

    fn create_app(&self) -> axum::Router {
        create_router(self.state.clone())
            // Request id first so every later layer sees it
            .layer(axum::middleware::from_fn(request_id_middleware))
            .layer(axum::middleware::from_fn_with_state(
                self.state.clone(),
                track_metrics_middleware,
            ))
            // CORS before timeout so preflights are always answered
            .layer(create_cors_layer(self.config.allowed_origins.clone()))
            .layer(TimeoutLayer::new(Duration::from_secs(
                self.config.request_timeout_secs,
            )))
            .layer(TraceLayer::new_for_http())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C"),
        _ = terminate => info!("received terminate signal"),
    }
}
