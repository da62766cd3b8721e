//! MajooCare Chat Relay server

use std::sync::Arc;

use anyhow::Context;
use chatrelay_api::{config::LogFormat, create_router, AppState, Bridges, Config};
use chatrelay_shared::{create_pool, run_migrations, MemoryStore, PgSessionStore, SessionStore};
use tokio::net::TcpListener;
use tokio::signal;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine
    dotenvy::dotenv().ok();

    let config = Config::from_env().context("invalid configuration")?;
    init_tracing(config.log_format);

    let store: Arc<dyn SessionStore> = match &config.database_url {
        Some(url) => {
            let pool = create_pool(url, config.database_max_connections)
                .await
                .context("failed to connect to database")?;
            run_migrations(&pool)
                .await
                .context("failed to run database migrations")?;
            Arc::new(PgSessionStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, sessions are kept in memory only");
            Arc::new(MemoryStore::new())
        }
    };

    let bridges = Bridges::from_config(&config).context("failed to build bridge clients")?;
    if config.bot_api_url.is_none() {
        tracing::warn!("BOT_API_URL not set, every bot turn hands off to an admin");
    }
    if !config.ticketing.is_enabled() {
        tracing::info!("Ticketing disabled, escalations will not open tickets");
    }

    let bind_address = config.bind_address.clone();
    let state = AppState::new(config, store, bridges);
    let router = state.router.clone();
    let app = create_router(state);

    let listener = TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("failed to bind {bind_address}"))?;
    tracing::info!(address = %bind_address, "Chat relay listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    router.clear().await;
    tracing::info!("Chat relay stopped");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,chatrelay_api=debug"));

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
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

    tracing::info!("Shutdown signal received, draining connections");
}
