use axum::Router;
use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use std::sync::Arc;
use std::time::Duration;

use bravos::config::Config;
use bravos::db::{create_pool, init_db, AppState};
use bravos::email::EmailService;
use bravos::handlers;
use bravos::notifier::StatusNotifier;

#[derive(Parser, Debug)]
#[command(name = "bravos")]
#[command(about = "Storefront order backend: checkout, Mercado Pago webhooks, Montink fulfillment")]
struct Cli {
    /// Delete the database on exit (dev mode only, useful for fresh starts)
    #[arg(long)]
    ephemeral: bool,
}

#[tokio::main]
async fn main() {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bravos=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env();

    if config.dev_mode {
        tracing::info!("Running in DEVELOPMENT mode");
    }
    if config.mp_webhook_secret.is_none() {
        tracing::warn!("MP_WEBHOOK_SECRET not set: all webhook deliveries will be rejected");
    }
    if config.admin_token.is_none() {
        tracing::warn!("ADMIN_TOKEN not set: admin endpoints will reject every request");
    }
    if config.montink_api_key.is_none() {
        tracing::warn!("MONTINK_API_KEY not set: fulfillment dispatch is disabled");
    }

    // Create the database connection pool and initialize the schema
    let db_pool = create_pool(&config.database_path).expect("Failed to create database pool");
    {
        let conn = db_pool.get().expect("Failed to get connection");
        init_db(&conn).expect("Failed to initialize database");
    }

    // Shared HTTP client; individual calls set tighter per-request timeouts
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .expect("Failed to build HTTP client");

    let state = AppState {
        db: db_pool,
        config: Arc::new(config.clone()),
        http,
        notifier: StatusNotifier::new(),
        email: Arc::new(EmailService::new(
            config.resend_api_key.clone(),
            config.email_from.clone(),
        )),
    };

    // Build the application router
    let app = Router::new()
        // Public endpoints (no auth)
        .merge(handlers::public::router(config.rate_limit))
        // Webhook endpoints (signature auth)
        .merge(handlers::webhooks::router())
        // Admin endpoints (shared token auth)
        .merge(handlers::admin::router(state.clone(), config.rate_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start the server
    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    // Track if we should clean up on exit
    let cleanup_on_exit = cli.ephemeral && config.dev_mode;
    let db_path = config.database_path.clone();

    if cleanup_on_exit {
        tracing::info!("EPHEMERAL MODE: database will be deleted on exit");
    }

    tracing::info!("Bravos server listening on {}", addr);

    // Run server with graceful shutdown
    // Use into_make_service_with_connect_info to enable IP-based rate limiting
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .expect("Failed to start server");

    // Cleanup on exit if ephemeral mode
    if cleanup_on_exit {
        tracing::info!("Cleaning up ephemeral database...");
        if let Err(e) = std::fs::remove_file(&db_path) {
            tracing::warn!("Failed to remove {}: {}", db_path, e);
        } else {
            tracing::info!("Removed {}", db_path);
        }
        // Also remove WAL and SHM files if they exist
        let _ = std::fs::remove_file(format!("{}-wal", db_path));
        let _ = std::fs::remove_file(format!("{}-shm", db_path));
        tracing::info!("Ephemeral cleanup complete");
    }
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    tracing::info!("Shutdown signal received, stopping server...");
}
