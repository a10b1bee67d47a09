//! Signalling hub binary.
//!
//! # Environment Variables
//!
//! - `HOST` / `PORT`: bind address (default `0.0.0.0:3000`)
//! - `STATIC_DIR`: directory served at `/` (default `public`)
//! - `ICE_SERVERS`: comma separated STUN/TURN URLs advertised to clients
//! - `RUST_LOG`: tracing filter; `LOG_LEVEL` is used when it is unset

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use wolfconf::{build_router, AppState, Config};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = Config::from_env();
    let addr = config.bind_addr()?;
    tracing::info!(
        static_dir = %config.static_dir,
        ice_servers = config.ice_servers.len(),
        "Configuration loaded"
    );

    let app = build_router(AppState::new(config));

    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Signalling hub listening on http://{}", addr);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Signalling hub stopped");
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| {
            let level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
            EnvFilter::try_new(level.to_lowercase())
        })
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for SIGTERM or Ctrl+C
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!("Failed to install Ctrl+C handler: {}", e);
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
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
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
    tracing::info!("Shutdown signal received");
}
