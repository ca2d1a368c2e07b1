use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};
use std::path::Path;

use crate::error::{CofferError, Result};
use crate::types::{
    CredentialSummary, EncryptedSecret, KeyVersionStat, RecordFailure, RotationRunRecord,
    RotationSelection, RotationStatus, StoredCredential,
};

const CREDENTIAL_COLUMNS: &str =
    "id, owner, name, ciphertext, wrapped_key, key_version, created_at, updated_at";

/// Result of one rotation batch.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// Records selected for this batch.
    pub selected: usize,
    /// Highest record id seen; the next batch starts after it.
    pub last_id: Option<i64>,
    pub rotated: u64,
    pub failures: Vec<RecordFailure>,
}

/// Credential database: encrypted secrets plus rotation audit rows.
pub struct CredentialDb {
    conn: Connection,
}

fn row_to_credential(row: &Row<'_>) -> rusqlite::Result<StoredCredential> {
    Ok(StoredCredential {
        id: row.get(0)?,
        owner: row.get(1)?,
        name: row.get(2)?,
        secret: EncryptedSecret {
            ciphertext: row.get(3)?,
            wrapped_key: row.get(4)?,
            key_version: row.get(5)?,
        },
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

fn row_to_run(row: &Row<'_>) -> rusqlite::Result<RotationRunRecord> {
    Ok(RotationRunRecord {
        id: row.get(0)?,
        from_version: row.get(1)?,
        to_version: row.get(2)?,
        status: row.get::<_, String>(3)?.parse().map_err(|e: CofferError| {
            rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e))
        })?,
        candidates: row.get(4)?,
        processed: row.get(5)?,
        errors: row.get(6)?,
        started_at: row.get(7)?,
        completed_at: row.get(8)?,
    })
}

impl CredentialDb {
    /// Open (or create) the credential database and run migrations.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        super::schema::migrate(&conn)?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        super::schema::migrate(&conn)?;
        Ok(Self { conn })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    // ── Credentials ────────────────────────────────────────────

    pub fn insert_credential(
        &self,
        owner: &str,
        name: &str,
        secret: &EncryptedSecret,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO credentials (owner, name, ciphertext, wrapped_key, key_version) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![owner, name, secret.ciphertext, secret.wrapped_key, secret.key_version],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Replace the whole encrypted record (new DEK, new ciphertext).
    pub fn update_credential(&self, id: i64, secret: &EncryptedSecret) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE credentials SET ciphertext=?2, wrapped_key=?3, key_version=?4, updated_at=datetime('now') WHERE id=?1",
            params![id, secret.ciphertext, secret.wrapped_key, secret.key_version],
        )?;
        if changed == 0 {
            return Err(CofferError::CredentialNotFound(id.to_string()));
        }
        Ok(())
    }

    pub fn get_credential(&self, id: i64) -> Result<StoredCredential> {
        self.conn
            .query_row(
                &format!("SELECT {CREDENTIAL_COLUMNS} FROM credentials WHERE id=?1"),
                params![id],
                row_to_credential,
            )
            .optional()?
            .ok_or_else(|| CofferError::CredentialNotFound(id.to_string()))
    }

    pub fn find_credential(&self, owner: &str, name: &str) -> Result<Option<StoredCredential>> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {CREDENTIAL_COLUMNS} FROM credentials WHERE owner=?1 AND name=?2"),
                params![owner, name],
                row_to_credential,
            )
            .optional()?)
    }

    pub fn list_credentials(&self, owner: Option<&str>) -> Result<Vec<CredentialSummary>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, owner, name, key_version, updated_at FROM credentials WHERE ?1 IS NULL OR owner=?1 ORDER BY owner, name",
        )?;
        let rows = stmt.query_map(params![owner], |row| {
            Ok(CredentialSummary {
                id: row.get(0)?,
                owner: row.get(1)?,
                name: row.get(2)?,
                key_version: row.get(3)?,
                updated_at: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn delete_credential(&self, owner: &str, name: &str) -> Result<bool> {
        let changed = self.conn.execute(
            "DELETE FROM credentials WHERE owner=?1 AND name=?2",
            params![owner, name],
        )?;
        Ok(changed > 0)
    }

    /// Credential counts per master key version, ascending.
    pub fn key_version_stats(&self) -> Result<Vec<KeyVersionStat>> {
        let mut stmt = self.conn.prepare(
            "SELECT key_version, COUNT(*) FROM credentials GROUP BY key_version ORDER BY key_version",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(KeyVersionStat {
                key_version: row.get(0)?,
                credentials: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // ── Rotation ───────────────────────────────────────────────

    pub fn count_rotation_candidates(&self, selection: &RotationSelection) -> Result<u64> {
        let (predicate, version) = selection.sql_predicate();
        let count = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM credentials WHERE {predicate}"),
            params![version],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Re-wrap one batch of candidates inside a single write transaction.
    ///
    /// Selects up to `limit` matching records with `id > after_id`, hands each
    /// to `rewrap`, and persists only `wrapped_key` and `key_version` for the
    /// ones that succeed. Per-record errors (unknown version, failed
    /// authentication) are collected and do not roll back the batch. Any other
    /// error drops the transaction, rolling back every record in the batch.
    pub fn rotate_batch<F>(
        &mut self,
        selection: &RotationSelection,
        after_id: i64,
        limit: usize,
        mut rewrap: F,
    ) -> Result<BatchOutcome>
    where
        F: FnMut(&StoredCredential) -> Result<EncryptedSecret>,
    {
        // IMMEDIATE takes the write lock up front so no other writer can touch
        // the selected rows until commit.
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let (predicate, version) = selection.sql_predicate();
        let records = {
            let mut stmt = tx.prepare(&format!(
                "SELECT {CREDENTIAL_COLUMNS} FROM credentials WHERE {predicate} AND id > ?2 ORDER BY id LIMIT ?3"
            ))?;
            let rows = stmt.query_map(params![version, after_id, limit as i64], row_to_credential)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        let mut outcome = BatchOutcome {
            selected: records.len(),
            last_id: records.last().map(|r| r.id),
            ..Default::default()
        };

        for record in records {
            let result = rewrap(&record).and_then(|rewrapped| {
                let changed = tx.execute(
                    "UPDATE credentials SET wrapped_key=?2, key_version=?3 WHERE id=?1 AND key_version=?4",
                    params![
                        record.id,
                        rewrapped.wrapped_key,
                        rewrapped.key_version,
                        record.secret.key_version
                    ],
                )?;
                if changed != 1 {
                    return Err(rusqlite::Error::StatementChangedRows(changed).into());
                }
                Ok(())
            });

            match result {
                Ok(()) => outcome.rotated += 1,
                Err(e) if e.is_fatal_for_rotation() => return Err(e),
                Err(e) => outcome.failures.push(RecordFailure {
                    record_id: record.id,
                    owner: record.owner,
                    name: record.name,
                    key_version: record.secret.key_version,
                    error: e,
                }),
            }
        }

        tx.commit()?;
        Ok(outcome)
    }

    pub fn start_rotation_run(
        &self,
        id: &str,
        selection: &RotationSelection,
        candidates: u64,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO rotation_runs (id, from_version, to_version, candidates) VALUES (?1, ?2, ?3, ?4)",
            params![id, selection.from_version, selection.to_version, candidates],
        )?;
        Ok(())
    }

    pub fn finish_rotation_run(
        &self,
        id: &str,
        status: RotationStatus,
        processed: u64,
        errors: u64,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE rotation_runs SET status=?2, processed=?3, errors=?4, completed_at=datetime('now') WHERE id=?1",
            params![id, status.to_string(), processed, errors],
        )?;
        Ok(())
    }

    /// Most recent rotation runs first.
    pub fn list_rotation_runs(&self, limit: u32) -> Result<Vec<RotationRunRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, from_version, to_version, status, candidates, processed, errors, started_at, completed_at FROM rotation_runs ORDER BY started_at DESC, id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], row_to_run)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}
