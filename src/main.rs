use anyhow::Context;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use show_booking::{
    app,
    config::{Config, LogFormat},
    services::reconcile::ReconcileService,
    AppState,
};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env().context("invalid configuration")?;

    let registry = tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&config.app.rust_log));
    match config.app.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }

    info!(
        "Starting show booking API ({} environment)",
        config.app.environment
    );

    let app_state = AppState::from_config(&config).await?;

    // --- Start background tasks ---

    // Сверка зависших PENDING броней
    let reconciler = ReconcileService::new(
        app_state.bookings.clone(),
        app_state.ledger.clone(),
        &config.reconcile,
    );
    tokio::spawn(reconciler.run(Duration::from_secs(config.reconcile.interval_seconds)));

    // --- Start the web server ---

    let addr: SocketAddr = format!("{}:{}", config.app.host, config.app.port)
        .parse()
        .context("HOST/PORT do not form a socket address")?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app(app_state).into_make_service()).await?;

    Ok(())
}
