//! Background sync scheduler
//!
//! Drives the sync engine on a fixed interval. Each cycle selects stale
//! and recalibration-due accounts itself; this task only supplies the
//! heartbeat. Designed for a single active scheduler instance.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tracing::info;

use brim_core::SyncEngine;

/// Start the sync scheduler as a background task
///
/// Spawns a tokio task that runs indefinitely, kicking off one engine
/// cycle per interval. The first tick fires after a full interval so a
/// freshly started server does not immediately hammer the feed.
pub fn start_sync_scheduler(engine: Arc<SyncEngine>, interval_secs: u64) {
    info!(interval_secs, "starting sync scheduler");

    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(interval_secs.max(1)));

        // Skip the immediate first tick
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let report = engine.run_cycle().await;
            if report.selected > 0 {
                info!(
                    selected = report.selected,
                    completed = report.completed,
                    failed = report.failed,
                    needs_reauth = report.needs_reauth,
                    "scheduled sync cycle done"
                );
            }
        }
    });
}
