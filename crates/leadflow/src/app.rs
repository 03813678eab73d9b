use axum::{
    http::StatusCode,
    routing::{delete, get, post},
    Router,
};
use chrono::Utc;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
use crate::db;
use crate::distribution::{self, DistributionError, SweepScope};
use crate::events::EventBus;
use crate::handlers;
use crate::notifier;
use crate::storage::StorageBackend;
use leadflow_models::SweepReport;

#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn StorageBackend>,
    pub events: EventBus,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(storage: Arc<dyn StorageBackend>, config: ServerConfig) -> Self {
        Self {
            storage,
            events: EventBus::default(),
            config: Arc::new(config),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let org = Router::new()
        .route(
            "/",
            get(handlers::orgs::get_organization).patch(handlers::orgs::update_organization),
        )
        // Directory
        .route(
            "/users",
            get(handlers::directory::list_users).post(handlers::directory::create_user),
        )
        .route(
            "/users/:id",
            axum::routing::patch(handlers::directory::update_user),
        )
        .route(
            "/teams",
            get(handlers::directory::list_teams).post(handlers::directory::create_team),
        )
        .route(
            "/teams/:id/members",
            post(handlers::directory::add_team_member),
        )
        .route(
            "/teams/:id/members/:user_id",
            delete(handlers::directory::remove_team_member),
        )
        // Pipelines
        .route(
            "/pipelines",
            get(handlers::pipelines::list_pipelines).post(handlers::pipelines::create_pipeline),
        )
        .route("/pipelines/:id", get(handlers::pipelines::get_pipeline))
        .route(
            "/pipelines/:id/default",
            post(handlers::pipelines::set_default_pipeline),
        )
        .route(
            "/pipelines/:id/pool",
            get(handlers::pipelines::get_pool_settings)
                .put(handlers::pipelines::update_pool_settings),
        )
        .route(
            "/pipelines/:id/fallback-queue",
            axum::routing::put(handlers::pipelines::set_fallback_queue),
        )
        // Queues
        .route(
            "/queues",
            get(handlers::queues::list_queues).post(handlers::queues::create_queue),
        )
        .route(
            "/queues/:id",
            get(handlers::queues::get_queue)
                .patch(handlers::queues::update_queue)
                .delete(handlers::queues::delete_queue),
        )
        .route("/queues/:id/members", post(handlers::queues::add_member))
        .route(
            "/queues/:id/members/:member_id",
            delete(handlers::queues::remove_member),
        )
        // Rules
        .route(
            "/rules",
            get(handlers::rules::list_rules).post(handlers::rules::create_rule),
        )
        .route("/rules/reorder", post(handlers::rules::reorder_rules))
        .route(
            "/rules/:id",
            get(handlers::rules::get_rule)
                .patch(handlers::rules::update_rule)
                .delete(handlers::rules::delete_rule),
        )
        // Lead intake
        .route(
            "/leads",
            get(handlers::leads::list_leads).post(handlers::intake::create_lead),
        )
        .route("/leads/import", post(handlers::intake::import_leads))
        .route(
            "/webhooks/:integration",
            post(handlers::intake::receive_webhook),
        )
        // Leads
        .route("/leads/:id", get(handlers::leads::get_lead))
        .route("/leads/:id/assign", post(handlers::leads::assign_lead))
        .route("/leads/:id/touch", post(handlers::leads::touch_lead))
        .route("/leads/:id/reassign", post(handlers::leads::reassign_lead))
        // Pool
        .route("/pool/leads", get(handlers::pool::list_pool_leads))
        .route("/pool/history", get(handlers::pool::list_history))
        .route("/pool/sweep", post(handlers::pool::trigger_sweep));

    let api = Router::new()
        .route("/health", get(handlers::health))
        .route("/api/orgs", post(handlers::orgs::create_organization))
        .nest("/api/orgs/:org_id", org);

    api.fallback(|| async { (StatusCode::NOT_FOUND, "Not found") })
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

/// Runs one sweep under the lease, off the async runtime and bounded by the
/// configured timeout. `org` limits it to one organization.
pub async fn run_sweep(
    state: &AppState,
    org: Option<String>,
) -> Result<SweepReport, DistributionError> {
    let storage = state.storage.clone();
    let events = state.events.clone();
    let batch_limit = state.config.sweep_batch_limit;
    let lease_secs = state.config.sweep_lease_secs;
    let timeout = state.config.sweep_timeout;

    let task = tokio::task::spawn_blocking(move || {
        let scope = match org.as_deref() {
            Some(org) => SweepScope::Organization(org),
            None => SweepScope::All,
        };
        distribution::run_exclusive_sweep(
            storage.as_ref(),
            &events,
            scope,
            Utc::now(),
            batch_limit,
            lease_secs,
        )
    });

    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => Err(DistributionError::SweepAborted(join_err.to_string())),
        Err(_) => Err(DistributionError::SweepTimedOut(timeout)),
    }
}

/// Scheduled sweeps: wait out the startup grace period, then sweep every
/// organization on a fixed interval.
pub fn spawn_sweeper(state: AppState) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(state.config.sweep_grace).await;
        let mut interval = tokio::time::interval(state.config.sweep_interval);
        loop {
            interval.tick().await;
            match run_sweep(&state, None).await {
                Ok(report) => {
                    if report.redistributed > 0 {
                        tracing::info!(
                            redistributed = report.redistributed,
                            skipped = report.skipped,
                            "[sweeper] scheduled sweep"
                        );
                    }
                }
                Err(DistributionError::SweepInProgress) => {
                    tracing::debug!("[sweeper] sweep already running, skipping tick");
                }
                Err(e) => tracing::error!(error = %e, "[sweeper] scheduled sweep failed"),
            }
        }
    })
}

#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error("database: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub async fn run_server(config: ServerConfig) -> Result<(), ServeError> {
    let conn = db::init_db(&config.db_path)?;
    let conn = Arc::new(std::sync::Mutex::new(conn));
    let storage: Arc<dyn StorageBackend> = Arc::new(
        crate::storage::sqlite::SqliteBackend::new(conn.clone()),
    );
    let port = config.port;
    let state = AppState::new(storage.clone(), config);

    notifier::spawn(storage, &state.events);
    spawn_sweeper(state.clone());

    // Checkpoint WAL on SIGTERM/SIGINT
    let shutdown_signal = async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => tracing::info!("[shutdown] received SIGINT"),
                        _ = sigterm.recv() => tracing::info!("[shutdown] received SIGTERM"),
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "[shutdown] no SIGTERM handler, waiting for SIGINT");
                    let _ = ctrl_c.await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }
        let conn = conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);") {
            Ok(()) => tracing::info!("[shutdown] WAL checkpointed, shutting down gracefully"),
            Err(e) => tracing::warn!(error = %e, "[shutdown] WAL checkpoint failed"),
        }
    };

    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}")).await?;
    tracing::info!("leadflow listening on http://0.0.0.0:{port}");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal)
        .await?;
    Ok(())
}
