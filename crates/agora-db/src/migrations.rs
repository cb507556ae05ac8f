use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

/// All timestamps are integer microseconds since the Unix epoch so that
/// read/creation comparisons are exact.
pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (rooms, messages, receipts)");
        conn.execute_batch(
            "
            CREATE TABLE rooms (
                id          TEXT PRIMARY KEY,
                kind        TEXT NOT NULL CHECK (kind IN ('direct', 'self', 'group')),
                name        TEXT,
                -- Set for direct/self rooms only; the uniqueness guard for dedup.
                dedup_key   TEXT UNIQUE,
                created_at  INTEGER NOT NULL
            );

            CREATE TABLE participants (
                room_id     TEXT NOT NULL REFERENCES rooms(id) ON DELETE CASCADE,
                user_id     TEXT NOT NULL,
                joined_at   INTEGER NOT NULL,
                is_admin    INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (room_id, user_id)
            );

            CREATE INDEX idx_participants_user ON participants(user_id);

            CREATE TABLE messages (
                id          TEXT PRIMARY KEY,
                room_id     TEXT NOT NULL REFERENCES rooms(id) ON DELETE CASCADE,
                sender_id   TEXT NOT NULL,
                content     TEXT NOT NULL,
                kind        TEXT NOT NULL CHECK (kind IN ('text', 'image', 'file')),
                file_key    TEXT,
                file_name   TEXT,
                created_at  INTEGER NOT NULL
            );

            CREATE INDEX idx_messages_room ON messages(room_id, created_at);

            CREATE TABLE message_hidden (
                message_id  TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
                user_id     TEXT NOT NULL,
                hidden_at   INTEGER NOT NULL,
                PRIMARY KEY (message_id, user_id)
            );

            CREATE INDEX idx_message_hidden_user ON message_hidden(user_id);

            -- No FK on last_read_message_id: hard deletes null it out afterwards.
            CREATE TABLE read_receipts (
                user_id                 TEXT NOT NULL,
                room_id                 TEXT NOT NULL REFERENCES rooms(id) ON DELETE CASCADE,
                last_read_message_id    TEXT,
                last_read_at            INTEGER NOT NULL,
                updated_at              INTEGER NOT NULL,
                PRIMARY KEY (user_id, room_id)
            );

            CREATE INDEX idx_read_receipts_message ON read_receipts(last_read_message_id);
            CREATE INDEX idx_read_receipts_updated ON read_receipts(user_id, updated_at);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    if version < 2 {
        info!("Running migration v2 (shared rate counters)");
        conn.execute_batch(
            "
            CREATE TABLE rate_counters (
                key             TEXT NOT NULL,
                window_start    INTEGER NOT NULL,
                count           INTEGER NOT NULL,
                expires_at      INTEGER NOT NULL,
                PRIMARY KEY (key, window_start)
            );

            CREATE INDEX idx_rate_counters_expiry ON rate_counters(expires_at);

            INSERT INTO schema_version (version) VALUES (2);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
