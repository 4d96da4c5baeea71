use identity_service::{
    build_router,
    config::IdentityConfig,
    db,
    services::{
        audit::alert::TracingAlertSink, blacklist::spawn_sweeper,
        mfa::delivery::GatewayCodeSender, Database, InMemoryBlacklist, RedisService,
        TokenBlacklist,
    },
    AppState,
};
use service_core::error::AppError;
use service_core::observability::logging::init_tracing;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Load configuration - fail fast if invalid
    let config = IdentityConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );
    identity_service::services::metrics::init_metrics();

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting identity service"
    );

    let pool = db::create_pool(&config.database)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
    db::run_migrations(&pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
    let database = Database::new(pool);

    let shutdown = CancellationToken::new();

    let blacklist: Arc<dyn TokenBlacklist> = match &config.redis {
        Some(redis_config) => {
            let redis = RedisService::new(redis_config)
                .await
                .map_err(AppError::ServiceUnavailable)?;
            tracing::info!("Redis blacklist initialized");
            Arc::new(redis)
        }
        None => {
            tracing::warn!("REDIS_URL not set; using the in-process blacklist");
            let blacklist: Arc<dyn TokenBlacklist> = Arc::new(InMemoryBlacklist::new());
            spawn_sweeper(
                blacklist.clone(),
                config.tokens.blacklist_sweep_seconds,
                shutdown.clone(),
            );
            blacklist
        }
    };

    let sender = GatewayCodeSender::new(config.smtp.as_ref(), config.sms.as_ref())
        .map_err(AppError::ConfigError)?;

    let mut state = AppState::new(
        config.clone(),
        Arc::new(database.clone()),
        blacklist,
        Arc::new(sender),
        Arc::new(TracingAlertSink),
    )?;
    state.database = Some(database);

    state.rbac.seed_system_roles().await.map_err(AppError::from)?;

    let flusher = state.audit.spawn_flusher(shutdown.clone());
    let purger = state.audit.spawn_purger(shutdown.clone());
    let cache_sweeper = state.rbac.spawn_cache_sweeper(shutdown.clone());
    let audit = state.audit.clone();

    let app = build_router(state);

    let addr = config.common.socket_addr();

    let service_span = tracing::info_span!(
        "service",
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
    );
    let _guard = service_span.enter();

    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    service_core::axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    shutdown.cancel();
    let _ = tokio::join!(flusher, purger, cache_sweeper);
    audit.shutdown().await;

    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
