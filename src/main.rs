use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use bookd::clock::SystemClock;
use bookd::engine::Engine;
use bookd::notify::NotifyHub;
use bookd::sweep;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let metrics_port: Option<u16> = std::env::var("BOOKD_METRICS_PORT")
        .ok()
        .and_then(|s| s.parse().ok());
    bookd::observability::init(metrics_port);

    let data_dir = std::env::var("BOOKD_DATA_DIR").unwrap_or_else(|_| "./data".into());
    let sweep_interval_secs: u64 = std::env::var("BOOKD_SWEEP_INTERVAL_SECS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(30);
    let compact_threshold: u64 = std::env::var("BOOKD_COMPACT_THRESHOLD")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1000);

    std::fs::create_dir_all(&data_dir)?;
    let wal_path = PathBuf::from(&data_dir).join("bookings.wal");

    let notify = Arc::new(NotifyHub::new());
    let engine = Arc::new(Engine::new(wal_path, notify, Arc::new(SystemClock))?);

    info!("bookd started");
    info!("  data_dir: {data_dir}");
    info!("  sweep_interval: {sweep_interval_secs}s");
    info!("  compact_threshold: {compact_threshold}");
    info!(
        "  metrics: {}",
        metrics_port.map_or("disabled".to_string(), |p| format!(
            "http://0.0.0.0:{p}/metrics"
        ))
    );

    let sweep_engine = engine.clone();
    tokio::spawn(async move {
        sweep::run_sweep(sweep_engine, Duration::from_secs(sweep_interval_secs)).await;
    });
    let compactor_engine = engine.clone();
    tokio::spawn(async move {
        sweep::run_compactor(compactor_engine, compact_threshold).await;
    });

    // Run until SIGTERM/ctrl-c
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to register SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
        }
    };
    shutdown.await;

    info!("shutdown signal received");
    // A final compaction keeps the next startup replay short. Best effort —
    // the WAL is already durable without it.
    if let Err(e) = engine.compact_wal().await {
        tracing::warn!("final compaction failed: {e}");
    }
    info!("bookd stopped");
    Ok(())
}
