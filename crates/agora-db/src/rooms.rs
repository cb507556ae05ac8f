use std::collections::HashMap;

use anyhow::Result;
use rusqlite::Connection;
use rusqlite::types::ToSql;
use uuid::Uuid;

use agora_types::models::{Participant, Room};

use crate::capability::{ServiceIdentity, ServiceScope};
use crate::models::{
    PARTICIPANT_COLUMNS, ROOM_COLUMNS, participant_from_row, room_from_row, to_micros,
};
use crate::{Database, OptionalExt, StoreTx, placeholders};

impl Database {
    pub fn get_room(&self, room_id: Uuid) -> Result<Option<Room>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM rooms r WHERE r.id = ?1", ROOM_COLUMNS);
            conn.query_row(&sql, [room_id.to_string()], room_from_row)
                .optional()
        })
    }

    pub fn participants(&self, room_id: Uuid) -> Result<Vec<Participant>> {
        self.with_conn(|conn| participants(conn, room_id))
    }

    /// Batch-fetch participants for a set of rooms. Every requested room has
    /// an entry, possibly empty.
    pub fn participants_for_rooms(&self, room_ids: &[Uuid]) -> Result<HashMap<Uuid, Vec<Participant>>> {
        let mut map: HashMap<Uuid, Vec<Participant>> =
            room_ids.iter().map(|id| (*id, Vec::new())).collect();
        if room_ids.is_empty() {
            return Ok(map);
        }

        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM participants p
                 WHERE p.room_id IN ({}) ORDER BY p.joined_at, p.user_id",
                PARTICIPANT_COLUMNS,
                placeholders(0, room_ids.len())
            );
            let ids: Vec<String> = room_ids.iter().map(Uuid::to_string).collect();
            let params: Vec<&dyn ToSql> = ids.iter().map(|id| id as &dyn ToSql).collect();

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params.as_slice(), participant_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            for participant in rows {
                map.entry(participant.room_id).or_default().push(participant);
            }
            Ok(map)
        })
    }

    pub fn is_participant(&self, room_id: Uuid, user_id: Uuid) -> Result<bool> {
        self.with_conn(|conn| is_participant(conn, room_id, user_id))
    }

    /// Rooms the user belongs to, most recently active first. Activity is the
    /// newest message time, or the room's creation time when it is empty.
    pub fn rooms_for_user(&self, user_id: Uuid, offset: u64, limit: u32) -> Result<Vec<Room>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM rooms r
                 JOIN participants p ON p.room_id = r.id AND p.user_id = ?1
                 ORDER BY COALESCE(
                     (SELECT MAX(m.created_at) FROM messages m WHERE m.room_id = r.id),
                     r.created_at
                 ) DESC, r.id
                 LIMIT ?2 OFFSET ?3",
                ROOM_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rooms = stmt
                .query_map(
                    rusqlite::params![user_id.to_string(), limit, offset as i64],
                    room_from_row,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rooms)
        })
    }
}

impl StoreTx<'_> {
    /// Look up a direct/self room by its dedup key without the caller's
    /// participant filter, so a room inserted by a concurrent request is seen.
    pub fn find_room_by_dedup_key(
        &self,
        identity: &ServiceIdentity,
        dedup_key: &str,
    ) -> Result<Option<Room>> {
        identity.require(ServiceScope::RoomDedup)?;
        let sql = format!("SELECT {} FROM rooms r WHERE r.dedup_key = ?1", ROOM_COLUMNS);
        self.query_row(&sql, [dedup_key], room_from_row).optional()
    }

    /// Insert a room guarded by the dedup key's unique constraint. Returns
    /// `false` when another room already holds the key.
    pub fn insert_room(&self, room: &Room, dedup_key: Option<&str>) -> Result<bool> {
        let inserted = self.execute(
            "INSERT INTO rooms (id, kind, name, dedup_key, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(dedup_key) DO NOTHING",
            rusqlite::params![
                room.id.to_string(),
                room.kind.as_str(),
                room.name,
                dedup_key,
                to_micros(room.created_at),
            ],
        )?;
        Ok(inserted == 1)
    }

    pub fn insert_participants(&self, participants: &[Participant]) -> Result<()> {
        let mut stmt = self.prepare(
            "INSERT INTO participants (room_id, user_id, joined_at, is_admin)
             VALUES (?1, ?2, ?3, ?4)",
        )?;
        for p in participants {
            stmt.execute(rusqlite::params![
                p.room_id.to_string(),
                p.user_id.to_string(),
                to_micros(p.joined_at),
                p.is_admin,
            ])?;
        }
        Ok(())
    }

    pub fn delete_room(&self, room_id: Uuid) -> Result<bool> {
        let deleted = self.execute("DELETE FROM rooms WHERE id = ?1", [room_id.to_string()])?;
        Ok(deleted == 1)
    }

    pub fn participants(&self, room_id: Uuid) -> Result<Vec<Participant>> {
        participants(self, room_id)
    }

    pub fn is_participant(&self, room_id: Uuid, user_id: Uuid) -> Result<bool> {
        is_participant(self, room_id, user_id)
    }
}

fn participants(conn: &Connection, room_id: Uuid) -> Result<Vec<Participant>> {
    let sql = format!(
        "SELECT {} FROM participants p WHERE p.room_id = ?1 ORDER BY p.joined_at, p.user_id",
        PARTICIPANT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([room_id.to_string()], participant_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn is_participant(conn: &Connection, room_id: Uuid, user_id: Uuid) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM participants WHERE room_id = ?1 AND user_id = ?2",
            [room_id.to_string(), user_id.to_string()],
            |r| r.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::tests::{seed_message, seed_room};
    use crate::models::from_micros;
    use agora_types::models::RoomKind;

    fn direct_room(at: i64) -> Room {
        Room {
            id: Uuid::new_v4(),
            kind: RoomKind::Direct,
            name: None,
            created_at: from_micros(at),
        }
    }

    #[test]
    fn dedup_key_rejects_second_insert() {
        let db = Database::open_in_memory().unwrap();
        let identity = ServiceIdentity::scoped(ServiceScope::RoomDedup);
        let first = direct_room(1);
        let second = direct_room(2);

        let (a, b, found) = db
            .with_tx::<_, _, anyhow::Error>(|tx| {
                let a = tx.insert_room(&first, Some("direct:x:y"))?;
                let b = tx.insert_room(&second, Some("direct:x:y"))?;
                let found = tx.find_room_by_dedup_key(&identity, "direct:x:y")?;
                Ok((a, b, found))
            })
            .unwrap();

        assert!(a);
        assert!(!b);
        assert_eq!(found.map(|r| r.id), Some(first.id));
    }

    #[test]
    fn rooms_without_dedup_key_never_collide() {
        let db = Database::open_in_memory().unwrap();
        let inserted = db
            .with_tx::<_, _, anyhow::Error>(|tx| {
                Ok(tx.insert_room(&direct_room(1), None)? && tx.insert_room(&direct_room(2), None)?)
            })
            .unwrap();
        assert!(inserted);
    }

    #[test]
    fn rooms_for_user_orders_by_latest_activity() {
        let db = Database::open_in_memory().unwrap();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let quiet = seed_room(&db, &[alice, bob]);
        let busy = seed_room(&db, &[alice]);
        let other = seed_room(&db, &[bob]);
        seed_message(&db, busy, alice, 50);

        let rooms = db.rooms_for_user(alice, 0, 10).unwrap();
        assert_eq!(rooms.iter().map(|r| r.id).collect::<Vec<_>>(), vec![busy, quiet]);
        assert!(!rooms.iter().any(|r| r.id == other));

        let paged = db.rooms_for_user(alice, 1, 10).unwrap();
        assert_eq!(paged.len(), 1);
    }

    #[test]
    fn participants_are_always_a_list() {
        let db = Database::open_in_memory().unwrap();
        let alice = Uuid::new_v4();
        let solo = seed_room(&db, &[alice]);
        let missing = Uuid::new_v4();

        let map = db.participants_for_rooms(&[solo, missing]).unwrap();
        assert_eq!(map[&solo].len(), 1);
        assert!(map[&missing].is_empty());
        assert!(db.is_participant(solo, alice).unwrap());
        assert!(!db.is_participant(solo, Uuid::new_v4()).unwrap());
    }
}
