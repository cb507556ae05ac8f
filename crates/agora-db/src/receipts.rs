use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use uuid::Uuid;

use agora_types::models::ReadReceipt;

use crate::models::{RECEIPT_COLUMNS, receipt_from_row, to_micros};
use crate::{Database, OptionalExt, StoreTx};

impl Database {
    /// Monotonic upsert keyed by (user, room). The write only lands when
    /// `read_at` is strictly newer than the stored marker, or when there is
    /// no marker yet. Returns whether it was applied.
    pub fn upsert_receipt(
        &self,
        user_id: Uuid,
        room_id: Uuid,
        message_id: Option<Uuid>,
        read_at: DateTime<Utc>,
    ) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let applied = conn.execute(
                "INSERT INTO read_receipts
                     (user_id, room_id, last_read_message_id, last_read_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)
                 ON CONFLICT(user_id, room_id) DO UPDATE SET
                     last_read_message_id = excluded.last_read_message_id,
                     last_read_at = excluded.last_read_at,
                     updated_at = excluded.updated_at
                 WHERE excluded.last_read_at > read_receipts.last_read_at",
                rusqlite::params![
                    user_id.to_string(),
                    room_id.to_string(),
                    message_id.map(|id| id.to_string()),
                    to_micros(read_at),
                ],
            )?;
            Ok(applied == 1)
        })
    }

    pub fn get_receipt(&self, user_id: Uuid, room_id: Uuid) -> Result<Option<ReadReceipt>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM read_receipts WHERE user_id = ?1 AND room_id = ?2",
                RECEIPT_COLUMNS
            );
            conn.query_row(&sql, [user_id.to_string(), room_id.to_string()], receipt_from_row)
                .optional()
        })
    }

    /// The user's receipts for the `limit` most recently updated rooms.
    pub fn list_receipts(&self, user_id: Uuid, limit: u32) -> Result<Vec<ReadReceipt>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM read_receipts WHERE user_id = ?1
                 ORDER BY updated_at DESC LIMIT ?2",
                RECEIPT_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params![user_id.to_string(), limit], receipt_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Null out read markers that point at a removed message. Returns the
    /// number of receipts touched.
    pub fn clear_receipt_pointers(&self, message_id: Uuid) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let cleared = conn.execute(
                "UPDATE read_receipts SET last_read_message_id = NULL
                 WHERE last_read_message_id = ?1",
                [message_id.to_string()],
            )?;
            Ok(cleared)
        })
    }
}

impl StoreTx<'_> {
    pub fn receipts_in_room(&self, room_id: Uuid) -> Result<Vec<ReadReceipt>> {
        receipts_in_room(self, room_id)
    }
}

fn receipts_in_room(conn: &Connection, room_id: Uuid) -> Result<Vec<ReadReceipt>> {
    let sql = format!("SELECT {} FROM read_receipts WHERE room_id = ?1", RECEIPT_COLUMNS);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([room_id.to_string()], receipt_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}
