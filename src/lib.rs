pub mod config;
pub mod error;
pub mod guard;
pub mod handlers;
pub mod identity;
pub mod rate_limit;
pub mod sanitize;

use crate::config::{AdmissionConfig, HEALTH_PATH};
use crate::error::{AdmissionError, Result};
use crate::guard::{guard_middleware, GuardState, RequestGuard};
use crate::identity::ClientIdentifier;
use crate::rate_limit::{MemoryStore, RateLimiter, SystemClock};
use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Build the shared request guard described by the configuration
pub fn build_guard(config: &AdmissionConfig) -> Result<Arc<RequestGuard>> {
    let limiter = RateLimiter::new(
        Arc::new(MemoryStore::new()),
        Arc::new(SystemClock),
        config.limits.sweep_interval(),
    );

    let guard = RequestGuard::new(Arc::new(limiter))
        .with_identifier(ClientIdentifier::new(&config.identity)?)
        .with_default_policy(config.default_policy()?)
        .with_default_max_body_bytes(config.limits.max_body_bytes);

    Ok(Arc::new(guard))
}

/// Build the Axum app: every configured route sits behind the guard
pub fn build_app(config: &AdmissionConfig, guard: Arc<RequestGuard>) -> Result<Router> {
    let mut app = Router::new().route(HEALTH_PATH, get(handlers::health));

    for route in &config.routes {
        let guard_config = config.guard_config(route)?;
        info!(
            path = %route.path,
            bucket = %guard_config.bucket,
            policy = ?guard_config.policy,
            "Guarding route"
        );

        let state = GuardState::new(guard.clone(), guard_config);
        let guarded = Router::new()
            .route(&route.path, post(handlers::sanitize_echo))
            .layer(from_fn_with_state(state, guard_middleware));
        app = app.merge(guarded);
    }

    Ok(app.layer(TraceLayer::new_for_http()))
}

/// Initialize the admission server
pub async fn init_admission_server(config: AdmissionConfig) -> Result<()> {
    // Validate configuration
    config.validate()?;

    info!("Starting admission server");
    info!(
        "Server listening on {}:{}",
        config.server.host, config.server.port
    );

    let guard = build_guard(&config)?;
    let app = build_app(&config, guard.clone())?;
    info!("Loaded {} guarded routes", config.routes.len());

    // Bind and serve
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(AdmissionError::Io)?;

    info!("Admission server ready to accept connections");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| AdmissionError::Internal(format!("Server error: {}", e)));

    guard.limiter().shutdown();
    info!("Admission server stopped");

    served
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Initialize tracing/logging
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "admission=debug,tower_http=debug".into()),
        )
        .with_target(false)
        .compact()
        .init();
}
