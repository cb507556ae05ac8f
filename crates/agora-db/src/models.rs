/// Row mapping between SQLite and the agora-types domain models.
/// Ids are stored as hyphenated TEXT and timestamps as microseconds.
use chrono::{DateTime, Utc};
use rusqlite::Row;
use rusqlite::types::Type;
use uuid::Uuid;

use agora_types::models::{FileRef, Message, MessageKind, Participant, ReadReceipt, Room, RoomKind};

pub fn to_micros(at: DateTime<Utc>) -> i64 {
    at.timestamp_micros()
}

pub fn from_micros(micros: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(micros).unwrap_or_default()
}

pub(crate) fn uuid_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn opt_uuid_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))),
        None => Ok(None),
    }
}

fn time_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    Ok(from_micros(row.get(idx)?))
}

/// A `messages` row before its `hidden_for` set has been attached.
#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: Uuid,
    pub room_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub kind: MessageKind,
    pub file: Option<FileRef>,
    pub created_at: DateTime<Utc>,
}

impl MessageRow {
    pub const COLUMNS: &'static str =
        "m.id, m.room_id, m.sender_id, m.content, m.kind, m.file_key, m.file_name, m.created_at";

    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let kind: String = row.get(4)?;
        let kind = kind
            .parse::<MessageKind>()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?;

        let file = match (row.get::<_, Option<String>>(5)?, row.get::<_, Option<String>>(6)?) {
            (Some(object_key), Some(file_name)) => Some(FileRef {
                object_key,
                file_name,
            }),
            _ => None,
        };

        Ok(Self {
            id: uuid_col(row, 0)?,
            room_id: uuid_col(row, 1)?,
            sender_id: uuid_col(row, 2)?,
            content: row.get(3)?,
            kind,
            file,
            created_at: time_col(row, 7)?,
        })
    }

    pub fn into_message(self, hidden_for: Vec<Uuid>) -> Message {
        Message {
            id: self.id,
            room_id: self.room_id,
            sender_id: self.sender_id,
            content: self.content,
            kind: self.kind,
            created_at: self.created_at,
            file: self.file,
            hidden_for,
        }
    }
}

pub(crate) const ROOM_COLUMNS: &str = "r.id, r.kind, r.name, r.created_at";

pub(crate) fn room_from_row(row: &Row<'_>) -> rusqlite::Result<Room> {
    let kind: String = row.get(1)?;
    let kind = kind
        .parse::<RoomKind>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e)))?;

    Ok(Room {
        id: uuid_col(row, 0)?,
        kind,
        name: row.get(2)?,
        created_at: time_col(row, 3)?,
    })
}

pub(crate) const PARTICIPANT_COLUMNS: &str = "p.room_id, p.user_id, p.joined_at, p.is_admin";

pub(crate) fn participant_from_row(row: &Row<'_>) -> rusqlite::Result<Participant> {
    Ok(Participant {
        room_id: uuid_col(row, 0)?,
        user_id: uuid_col(row, 1)?,
        joined_at: time_col(row, 2)?,
        is_admin: row.get(3)?,
    })
}

pub(crate) const RECEIPT_COLUMNS: &str = "user_id, room_id, last_read_message_id, last_read_at";

pub(crate) fn receipt_from_row(row: &Row<'_>) -> rusqlite::Result<ReadReceipt> {
    Ok(ReadReceipt {
        user_id: uuid_col(row, 0)?,
        room_id: uuid_col(row, 1)?,
        last_read_message_id: opt_uuid_col(row, 2)?,
        last_read_at: time_col(row, 3)?,
    })
}
