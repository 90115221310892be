/**
 * SENTINEL KERNEL - Server entry point
 *
 * ROLE: Loads config, bootstraps the shared state, starts the realtime tick
 * and the optional staleness sweep, then serves HTTP until Ctrl-C.
 */

use anyhow::Context;
use sentinel_kernel::config::load_config;
use sentinel_kernel::http::{self, AppState};
use sentinel_kernel::registry::{FleetRegistry, Staleness};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env is optional
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sentinel_kernel=info")),
        )
        .init();

    let cfg = load_config().await;
    let app_state = AppState::bootstrap(cfg.clone()).await?;
    info!(
        "[kernel] {} nodes, {} logs loaded from {:?}",
        app_state.registry.len().await,
        app_state.logs.len(),
        cfg.data_dir
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let ticker = app_state.ticker().spawn(cfg.tick_interval(), shutdown_rx.clone());

    let sweep = if cfg.staleness.enabled {
        let staleness = Staleness {
            warning_after: Duration::from_secs(cfg.staleness.warning_after_secs),
            offline_after: Duration::from_secs(cfg.staleness.offline_after_secs),
        };
        Some(FleetRegistry::start_staleness_sweep(
            app_state.registry.clone(),
            staleness,
            Duration::from_secs(cfg.staleness.sweep_secs.max(1)),
            shutdown_rx.clone(),
        ))
    } else {
        info!("[kernel] staleness sweep disabled, node status only moves on explicit writes");
        None
    };

    let app = http::build_router(app_state);
    let listener = TcpListener::bind(&cfg.bind)
        .await
        .with_context(|| format!("failed to bind {}", cfg.bind))?;
    info!("[kernel] listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("[kernel] shutdown requested");
            let _ = shutdown_tx.send(true);
        })
        .await
        .context("server error")?;

    ticker.await.ok();
    if let Some(sweep) = sweep {
        sweep.await.ok();
    }
    info!("[kernel] stopped");
    Ok(())
}
