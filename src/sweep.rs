use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::{Engine, EngineError};

/// One pass of the completion sweep: mark approved bookings whose end has
/// passed as completed. Each completion is an independent atomic operation;
/// a booking cancelled between collection and completion is skipped, not an
/// error.
pub async fn sweep_once(engine: &Engine) -> usize {
    let now = engine.now_ms();
    let mut completed = 0usize;
    for (booking_id, _resource_id) in engine.collect_elapsed(now) {
        match engine.complete_booking(booking_id).await {
            Ok(_) => {
                metrics::counter!(crate::observability::SWEEP_COMPLETED_TOTAL).increment(1);
                completed += 1;
            }
            Err(EngineError::InvalidTransition { .. }) | Err(EngineError::NotFound(_)) => {
                debug!("sweep skip {booking_id}: state changed underneath");
            }
            Err(e) => {
                warn!("sweep failed to complete {booking_id}: {e}");
            }
        }
    }
    completed
}

/// Background task driving `sweep_once` on a fixed interval. The engine
/// itself never schedules anything — that is this daemon's job.
pub async fn run_sweep(engine: Arc<Engine>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        let completed = sweep_once(&engine).await;
        if completed > 0 {
            info!("sweep completed {completed} elapsed booking(s)");
        }
    }
}

/// Background task that compacts the WAL once enough appends accumulate.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        if engine.wal_appends_since_compact().await >= threshold {
            match engine.compact_wal().await {
                Ok(()) => info!("WAL compacted"),
                Err(e) => warn!("WAL compaction failed: {e}"),
            }
        }
    }
}
