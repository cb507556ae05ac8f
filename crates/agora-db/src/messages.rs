use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use rusqlite::types::ToSql;
use uuid::Uuid;

use agora_types::models::Message;

use crate::capability::{ServiceIdentity, ServiceScope};
use crate::models::{MessageRow, to_micros, uuid_col};
use crate::{Database, OptionalExt, StoreTx, placeholders};

/// Excludes messages hidden for the viewer bound at `?1`.
const NOT_HIDDEN_FOR_VIEWER: &str =
    "NOT EXISTS (SELECT 1 FROM message_hidden h WHERE h.message_id = m.id AND h.user_id = ?1)";

impl Database {
    pub fn insert_message(&self, message: &Message) -> Result<()> {
        self.with_conn_mut(|conn| insert_message(conn, message))
    }

    /// Fetch a message as seen by `viewer`: `None` if absent or hidden for them.
    pub fn get_message_for(&self, viewer: Uuid, message_id: Uuid) -> Result<Option<Message>> {
        self.with_conn(|conn| {
            let message = load_message(conn, message_id)?;
            Ok(message.filter(|m| !m.is_hidden_for(viewer)))
        })
    }

    /// Messages of a room in creation order, skipping those hidden for the viewer.
    pub fn visible_messages(
        &self,
        room_id: Uuid,
        viewer: Uuid,
        offset: u64,
        limit: u32,
    ) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM messages m
                 WHERE {} AND m.room_id = ?2
                 ORDER BY m.created_at ASC, m.rowid ASC
                 LIMIT ?3 OFFSET ?4",
                MessageRow::COLUMNS,
                NOT_HIDDEN_FOR_VIEWER
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(
                    rusqlite::params![viewer.to_string(), room_id.to_string(), limit, offset as i64],
                    MessageRow::from_row,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            attach_hidden(conn, rows)
        })
    }

    pub fn count_visible_messages(&self, room_id: Uuid, viewer: Uuid) -> Result<u64> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT COUNT(*) FROM messages m WHERE {} AND m.room_id = ?2",
                NOT_HIDDEN_FOR_VIEWER
            );
            let count: i64 = conn.query_row(
                &sql,
                rusqlite::params![viewer.to_string(), room_id.to_string()],
                |r| r.get(0),
            )?;
            Ok(count as u64)
        })
    }

    /// The most recent message of a room, regardless of visibility.
    pub fn latest_message_id(&self, room_id: Uuid) -> Result<Option<Uuid>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id FROM messages WHERE room_id = ?1
                 ORDER BY created_at DESC, rowid DESC LIMIT 1",
                [room_id.to_string()],
                |row| uuid_col(row, 0),
            )
            .optional()
        })
    }

    /// Room a message belongs to, or `None` once it no longer exists.
    pub fn message_room(&self, message_id: Uuid) -> Result<Option<Uuid>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT room_id FROM messages WHERE id = ?1",
                [message_id.to_string()],
                |row| uuid_col(row, 0),
            )
            .optional()
        })
    }

    /// Latest message per room visible to the viewer, batched for room lists.
    pub fn last_visible_messages(
        &self,
        viewer: Uuid,
        room_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, Message>> {
        if room_ids.is_empty() {
            return Ok(HashMap::new());
        }

        self.with_conn(|conn| {
            let sql = format!(
                "SELECT id, room_id, sender_id, content, kind, file_key, file_name, created_at
                 FROM (
                     SELECT {}, ROW_NUMBER() OVER (
                         PARTITION BY m.room_id ORDER BY m.created_at DESC, m.rowid DESC
                     ) AS rn
                     FROM messages m
                     WHERE {} AND m.room_id IN ({})
                 )
                 WHERE rn = 1",
                MessageRow::COLUMNS,
                NOT_HIDDEN_FOR_VIEWER,
                placeholders(1, room_ids.len())
            );

            let mut params: Vec<String> = Vec::with_capacity(room_ids.len() + 1);
            params.push(viewer.to_string());
            params.extend(room_ids.iter().map(Uuid::to_string));
            let params: Vec<&dyn ToSql> = params.iter().map(|p| p as &dyn ToSql).collect();

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params.as_slice(), MessageRow::from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(attach_hidden(conn, rows)?
                .into_iter()
                .map(|m| (m.room_id, m))
                .collect())
        })
    }

    /// Unread count per room: messages created after the user's read marker
    /// (all messages when there is no receipt), minus those hidden for the user.
    /// Rooms with nothing unread are present with a zero count.
    pub fn unread_counts(&self, user_id: Uuid, room_ids: &[Uuid]) -> Result<HashMap<Uuid, u64>> {
        let mut counts: HashMap<Uuid, u64> = room_ids.iter().map(|id| (*id, 0)).collect();
        if room_ids.is_empty() {
            return Ok(counts);
        }

        self.with_conn(|conn| {
            let sql = format!(
                "SELECT m.room_id, COUNT(*)
                 FROM messages m
                 LEFT JOIN read_receipts r
                     ON r.room_id = m.room_id AND r.user_id = ?1
                 WHERE {}
                   AND m.room_id IN ({})
                   AND (r.last_read_at IS NULL OR m.created_at > r.last_read_at)
                 GROUP BY m.room_id",
                NOT_HIDDEN_FOR_VIEWER,
                placeholders(1, room_ids.len())
            );

            let mut params: Vec<String> = Vec::with_capacity(room_ids.len() + 1);
            params.push(user_id.to_string());
            params.extend(room_ids.iter().map(Uuid::to_string));
            let params: Vec<&dyn ToSql> = params.iter().map(|p| p as &dyn ToSql).collect();

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params.as_slice(), |row| Ok((uuid_col(row, 0)?, row.get::<_, i64>(1)?)))?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            for (room_id, count) in rows {
                counts.insert(room_id, count as u64);
            }
            Ok(counts)
        })
    }
}

impl StoreTx<'_> {
    /// Load a message including rows hidden for the caller.
    pub fn load_message(
        &self,
        identity: &ServiceIdentity,
        message_id: Uuid,
    ) -> Result<Option<Message>> {
        identity.require(ServiceScope::DeletionMutation)?;
        load_message(self, message_id)
    }

    /// Add `user_id` to the message's hidden set. Returns `false` if it was
    /// already there.
    pub fn hide_message(
        &self,
        identity: &ServiceIdentity,
        message_id: Uuid,
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        identity.require(ServiceScope::DeletionMutation)?;
        let inserted = self.execute(
            "INSERT OR IGNORE INTO message_hidden (message_id, user_id, hidden_at)
             VALUES (?1, ?2, ?3)",
            rusqlite::params![message_id.to_string(), user_id.to_string(), to_micros(at)],
        )?;
        Ok(inserted == 1)
    }

    /// Physically remove a message row. Hidden markers cascade.
    pub fn delete_message(&self, identity: &ServiceIdentity, message_id: Uuid) -> Result<bool> {
        identity.require(ServiceScope::DeletionMutation)?;
        let deleted = self.execute("DELETE FROM messages WHERE id = ?1", [message_id.to_string()])?;
        Ok(deleted == 1)
    }
}

fn insert_message(conn: &Connection, message: &Message) -> Result<()> {
    let (file_key, file_name) = match &message.file {
        Some(file) => (Some(file.object_key.as_str()), Some(file.file_name.as_str())),
        None => (None, None),
    };

    conn.execute(
        "INSERT INTO messages (id, room_id, sender_id, content, kind, file_key, file_name, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        rusqlite::params![
            message.id.to_string(),
            message.room_id.to_string(),
            message.sender_id.to_string(),
            message.content,
            message.kind.as_str(),
            file_key,
            file_name,
            to_micros(message.created_at),
        ],
    )?;
    Ok(())
}

fn load_message(conn: &Connection, message_id: Uuid) -> Result<Option<Message>> {
    let sql = format!("SELECT {} FROM messages m WHERE m.id = ?1", MessageRow::COLUMNS);
    let row = conn
        .query_row(&sql, [message_id.to_string()], MessageRow::from_row)
        .optional()?;

    match row {
        Some(row) => {
            let hidden = hidden_for(conn, &[row.id])?.remove(&row.id).unwrap_or_default();
            Ok(Some(row.into_message(hidden)))
        }
        None => Ok(None),
    }
}

/// Batch-fetch hidden sets for a set of message ids.
fn hidden_for(conn: &Connection, message_ids: &[Uuid]) -> Result<HashMap<Uuid, Vec<Uuid>>> {
    if message_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let sql = format!(
        "SELECT message_id, user_id FROM message_hidden
         WHERE message_id IN ({}) ORDER BY hidden_at",
        placeholders(0, message_ids.len())
    );
    let ids: Vec<String> = message_ids.iter().map(Uuid::to_string).collect();
    let params: Vec<&dyn ToSql> = ids.iter().map(|id| id as &dyn ToSql).collect();

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params.as_slice(), |row| Ok((uuid_col(row, 0)?, uuid_col(row, 1)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut map: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    for (message_id, user_id) in rows {
        map.entry(message_id).or_default().push(user_id);
    }
    Ok(map)
}

fn attach_hidden(conn: &Connection, rows: Vec<MessageRow>) -> Result<Vec<Message>> {
    let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
    let mut hidden = hidden_for(conn, &ids)?;

    Ok(rows
        .into_iter()
        .map(|row| {
            let set = hidden.remove(&row.id).unwrap_or_default();
            row.into_message(set)
        })
        .collect())
}
