use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use ripple_db::Database;

/// How often the sweeper runs.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Age beyond which persisted messages are purged.
pub fn default_retention_window() -> chrono::Duration {
    chrono::Duration::hours(1)
}

/// Background task that trims the message log on a fixed interval.
///
/// Purely time-based: messages older than the retention window are deleted
/// regardless of which channels are currently active. A failed sweep rolls
/// back wholesale and the next tick retries naturally.
pub async fn run_retention_loop(
    db: Arc<Database>,
    interval: Duration,
    retention_window: chrono::Duration,
) {
    let mut ticker = tokio::time::interval(interval);

    loop {
        ticker.tick().await;

        match db.delete_older_than(Utc::now() - retention_window) {
            Ok(0) => {}
            Ok(n) => info!("Retention sweep removed {} messages", n),
            Err(e) => warn!("Retention sweep failed: {:#}", e),
        }
    }
}
