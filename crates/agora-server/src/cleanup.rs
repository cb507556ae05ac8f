use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};

use agora_db::Database;

/// Background task that prunes expired rate-limit counters.
pub async fn run_counter_prune_loop(db: Arc<Database>, interval_secs: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));

    loop {
        interval.tick().await;

        let db = db.clone();
        match tokio::task::spawn_blocking(move || db.prune_counters(Utc::now())).await {
            Ok(Ok(count)) => {
                if count > 0 {
                    debug!("Pruned {} expired rate counters", count);
                }
            }
            Ok(Err(e)) => warn!("Counter prune error: {}", e),
            Err(e) => warn!("Counter prune task failed: {}", e),
        }
    }
}
