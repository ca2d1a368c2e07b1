use rusqlite::Connection;

use crate::error::Result;

/// Run all migrations on the database.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        PRAGMA journal_mode=WAL;
        PRAGMA foreign_keys=ON;

        CREATE TABLE IF NOT EXISTS credentials (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            owner           TEXT NOT NULL,
            name            TEXT NOT NULL,
            ciphertext      BLOB NOT NULL,
            wrapped_key     BLOB NOT NULL,
            key_version     INTEGER NOT NULL CHECK (key_version >= 1),
            created_at      TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at      TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(owner, name)
        );

        CREATE INDEX IF NOT EXISTS idx_credentials_key_version
            ON credentials(key_version, id);

        CREATE TABLE IF NOT EXISTS rotation_runs (
            id              TEXT PRIMARY KEY,
            from_version    INTEGER,
            to_version      INTEGER NOT NULL,
            status          TEXT NOT NULL DEFAULT 'running',
            candidates      INTEGER NOT NULL DEFAULT 0,
            processed       INTEGER NOT NULL DEFAULT 0,
            errors          INTEGER NOT NULL DEFAULT 0,
            started_at      TEXT NOT NULL DEFAULT (datetime('now')),
            completed_at    TEXT
        );
        ",
    )?;

    Ok(())
}
