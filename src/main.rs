// =============================================================================
// Trade Console — Main Entry Point
// =============================================================================
//
// Startup order: config, session, REST seed, channels, API. On Ctrl+C the
// session is logged out (channels closed intentionally, store disposed) and
// the config is written back.
// =============================================================================

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use trade_console::api;
use trade_console::app_state::ConsoleSession;
use trade_console::runtime_config::RuntimeConfig;

const CONFIG_PATH: &str = "console_config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Trade Console starting up");

    let mut config = RuntimeConfig::load(CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        RuntimeConfig::default()
    });
    config.apply_env_overrides();

    let bind_addr = config.bind_addr.clone();
    info!(
        api_base_url = %config.api_base_url,
        ws_host = %config.ws_host,
        bind_addr = %bind_addr,
        "configuration loaded"
    );

    // ── 2. Session: seed collections, open channels ──────────────────────
    let session = ConsoleSession::new(config)?;
    let report = session.start().await;
    if report.errors.is_empty() {
        info!(
            positions = report.positions.unwrap_or(0),
            watchlist = report.watchlist.unwrap_or(0),
            "initial snapshots loaded"
        );
    } else {
        warn!(errors = ?report.errors, "initial snapshots incomplete; live updates continue");
    }

    // ── 3. Downstream API ────────────────────────────────────────────────
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind API server on {bind_addr}"))?;
    info!(addr = %bind_addr, "API server listening");

    let app = api::rest::router(session.clone());
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "API server failed");
        }
    });

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 4. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received, logging out");

    session.logout().await;

    if let Err(e) = session.runtime_config.read().save(CONFIG_PATH) {
        error!(error = %e, "Failed to save runtime config on shutdown");
    }

    info!("Trade Console shut down complete.");
    Ok(())
}
