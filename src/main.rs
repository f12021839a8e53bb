use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use hostbook::config::Config;
use hostbook::engine::{Engine, EngineOptions};
use hostbook::notify::NotifyHub;
use hostbook::sweeper;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    hostbook::observability::init(config.metrics_port);

    std::fs::create_dir_all(&config.data_dir)?;

    let options = EngineOptions {
        lock_timeout: config.lock_timeout,
        ..EngineOptions::default()
    };
    let engine = Arc::new(Engine::new(
        config.wal_path(),
        Arc::new(NotifyHub::new()),
        options,
    )?);
    info!("replayed {} hosts from {}", engine.host_count(), config.wal_path().display());

    tokio::spawn(sweeper::run_sweeper(engine.clone(), config.sweep_interval));
    tokio::spawn(sweeper::run_compactor(engine.clone(), config.compact_threshold));

    let addr = config.addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("hostbook listening on {addr}");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  lock_timeout: {:?}", config.lock_timeout);
    info!("  sweep_interval: {:?}", config.sweep_interval);
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    axum::serve(listener, hostbook::http::router(engine))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("hostbook stopped");
    Ok(())
}

/// Resolve on ctrl-c or SIGTERM. In-flight requests drain before `serve` returns.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!("failed to register SIGTERM handler: {e}");
                ctrl_c.await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
    info!("shutdown signal received");
}
