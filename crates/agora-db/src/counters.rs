use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::Database;
use crate::models::to_micros;

/// Fixed-window counters shared by every server instance pointed at the
/// same database. Rows carry an expiry and are pruned in the background.
impl Database {
    /// Increment the counter for `key` in the window starting at
    /// `window_start` and return the new count.
    pub fn hit_counter(
        &self,
        key: &str,
        window_start: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<u64> {
        self.with_conn_mut(|conn| {
            let count: i64 = conn.query_row(
                "INSERT INTO rate_counters (key, window_start, count, expires_at)
                 VALUES (?1, ?2, 1, ?3)
                 ON CONFLICT(key, window_start) DO UPDATE SET count = count + 1
                 RETURNING count",
                rusqlite::params![key, to_micros(window_start), to_micros(expires_at)],
                |r| r.get(0),
            )?;
            Ok(count as u64)
        })
    }

    pub fn prune_counters(&self, now: DateTime<Utc>) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let pruned = conn.execute(
                "DELETE FROM rate_counters WHERE expires_at <= ?1",
                [to_micros(now)],
            )?;
            Ok(pruned)
        })
    }
}
