use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::{now_ms, Engine};
use crate::model::Ms;

/// Background task that removes pending bookings whose TTL ran out.
pub async fn run_reaper(engine: Arc<Engine>, every: Duration) {
    if engine.settings().pending_ttl.is_none() {
        return;
    }
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        sweep_abandoned(&engine, now_ms()).await;
    }
}

/// One sweep as of `now`. Returns how many bookings were removed.
pub async fn sweep_abandoned(engine: &Engine, now: Ms) -> usize {
    let mut reaped = 0;
    for booking_id in engine.collect_abandoned(now) {
        match engine.abandon_booking(booking_id, now).await {
            Ok(true) => {
                info!("reaped abandoned booking {booking_id}");
                reaped += 1;
            }
            // Paid or cancelled since it was collected.
            Ok(false) => {}
            Err(e) => tracing::warn!("reaper skip {booking_id}: {e}"),
        }
    }
    if reaped > 0 {
        metrics::counter!(crate::observability::PENDING_BOOKINGS_REAPED_TOTAL)
            .increment(reaped as u64);
    }
    reaped
}

/// Background task that rewrites the WAL once enough events piled up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        compact_if_due(&engine, threshold).await;
    }
}

pub async fn compact_if_due(engine: &Engine, threshold: u64) -> bool {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        return false;
    }
    match engine.compact_wal().await {
        Ok(()) => {
            info!("compacted WAL after {appends} appends");
            true
        }
        Err(e) => {
            tracing::error!("WAL compaction failed: {e}");
            false
        }
    }
}
