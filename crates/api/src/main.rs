//! Pushgate API server binary entrypoint.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use pushgate_common::config::AppConfig;
use pushgate_common::db::{create_pool, run_migrations};
use pushgate_engine::dispatcher::PushDispatcher;
use pushgate_engine::records::PgRecordStore;
use pushgate_engine::resolver::PgRecipientResolver;
use pushgate_engine::sweeper::ReceiptSweeper;
use pushgate_notifier::{ExpoTransport, PushGatewayClient};

use pushgate_api::routes::create_router;
use pushgate_api::state::AppState;

/// Largest accepted request body.
const MAX_BODY_BYTES: usize = 1024 * 1024;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(
            "pushgate_api=debug,pushgate_engine=debug,pushgate_notifier=info,tower_http=debug",
        )
    });

    if std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        return;
    }
    tracing::info!("Shutdown signal received, draining connections");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    tracing::info!("Starting Pushgate API server...");

    // Load configuration
    let config = AppConfig::from_env()?;

    // Create database connection pool
    let pool = create_pool(&config.database_url, config.db_max_connections).await?;
    run_migrations(&pool).await?;
    tracing::info!("Database pool created");

    // Push gateway
    let transport = ExpoTransport::new(
        config.expo_api_url.clone(),
        config.expo_access_token.clone(),
        Duration::from_secs(config.gateway_timeout_secs),
    )?;
    let gateway = PushGatewayClient::new(Arc::new(transport));
    tracing::info!(url = %config.expo_api_url, "Push gateway client ready");

    let records = Arc::new(PgRecordStore::new(pool.clone()));
    let dispatcher = Arc::new(PushDispatcher::new(
        Arc::new(PgRecipientResolver::new(pool.clone())),
        records.clone(),
        gateway,
        Duration::from_secs(config.receipt_check_delay_secs),
    ));

    if config.receipt_sweep_interval_secs > 0 {
        let sweeper = ReceiptSweeper::new(
            dispatcher.reconciler().clone(),
            records,
            Duration::from_secs(config.receipt_sweep_interval_secs),
            config.receipt_sweep_min_age_secs,
            config.receipt_sweep_max_age_secs,
        );
        tokio::spawn(sweeper.run());
    }

    let addr: SocketAddr = config.bind_addr.parse()?;

    // Build application state
    let state = AppState::new(config, dispatcher);

    // Build router
    let app = create_router(state)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start server
    tracing::info!("API server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}
