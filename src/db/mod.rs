//! SQLite-backed store for events, participants, custom fields and their
//! value rows.
//!
//! The engine is an in-process library; the surrounding registration manager
//! decides where the database file lives and hands the path in. WAL mode
//! keeps concurrent readers cheap while one recompute pass writes; write
//! serialization across processes is the job of the per-event lock file, not
//! of SQLite.

use std::path::{Path, PathBuf};

use chrono::Utc;
use rusqlite::{params, Connection};

use crate::container::{CustomFieldValueCollection, CustomFieldValueContainer};
use crate::custom_field::{CustomField, CustomFieldType};
use crate::error::EngineError;
use crate::matching::PoolParticipant;

pub mod types;
pub use types::*;

pub struct EventDb {
    conn: Connection,
}

impl EventDb {
    /// Open (or create) the database at `path` and apply the schema.
    pub fn open_at(path: impl Into<PathBuf>) -> Result<Self, DbError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(DbError::CreateDir)?;
            }
        }

        let conn = Connection::open(&path)?;

        // WAL keeps pool reads unsynchronized with the write pass. The busy
        // timeout covers readers overlapping a commit; write serialization
        // itself comes from the per-event lock file.
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")?;

        crate::migrations::run_migrations(&conn).map_err(DbError::Migration)?;

        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        Ok(Self { conn })
    }

    /// Borrow the underlying connection for ad-hoc queries.
    pub fn conn_ref(&self) -> &Connection {
        &self.conn
    }

    /// Execute a closure within a SQLite transaction.
    /// Commits on Ok, rolls back on Err.
    pub fn with_transaction<F, T>(&self, f: F) -> Result<T, EngineError>
    where
        F: FnOnce(&Self) -> Result<T, EngineError>,
    {
        self.conn
            .execute_batch("BEGIN IMMEDIATE")
            .map_err(DbError::from)?;
        match f(self) {
            Ok(val) => {
                self.conn.execute_batch("COMMIT").map_err(DbError::from)?;
                Ok(val)
            }
            Err(e) => {
                let _ = self.conn.execute_batch("ROLLBACK");
                Err(e)
            }
        }
    }

    // =========================================================================
    // Events, participants, fields
    // =========================================================================

    pub fn insert_event(&self, title: &str) -> Result<i64, DbError> {
        self.conn.execute(
            "INSERT INTO events (title, updated_at) VALUES (?1, ?2)",
            params![title, Utc::now().to_rfc3339()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_event(&self, event_id: i64) -> Result<Option<DbEvent>, DbError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, title, updated_at FROM events WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![event_id], |row| {
            Ok(DbEvent {
                id: row.get(0)?,
                title: row.get(1)?,
                updated_at: row.get(2)?,
            })
        })?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    pub fn insert_participant(
        &self,
        event_id: i64,
        first_name: &str,
        last_name: &str,
    ) -> Result<i64, DbError> {
        self.conn.execute(
            "INSERT INTO participants (event_id, first_name, last_name, updated_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![event_id, first_name, last_name, Utc::now().to_rfc3339()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn insert_custom_field(
        &self,
        event_id: i64,
        title: &str,
        field_type: CustomFieldType,
    ) -> Result<i64, DbError> {
        self.conn.execute(
            "INSERT INTO custom_fields (event_id, title, field_type) VALUES (?1, ?2, ?3)",
            params![event_id, title, field_type.as_str()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// The event's participant pool as the flattened read model, in insertion
    /// (id) order. This ordering is what same-bucket ranking ties preserve.
    pub fn list_participants(&self, event_id: i64) -> Result<Vec<PoolParticipant>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, first_name, last_name FROM participants
             WHERE event_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![event_id], |row| {
            Ok(PoolParticipant {
                id: row.get(0)?,
                first_name: row.get(1)?,
                last_name: row.get(2)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    /// All custom fields of an event, ascending by id.
    pub fn list_custom_fields(&self, event_id: i64) -> Result<Vec<CustomField>, EngineError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, event_id, title, field_type FROM custom_fields
                 WHERE event_id = ?1 ORDER BY id",
            )
            .map_err(DbError::from)?;
        let rows = stmt
            .query_map(params![event_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .map_err(DbError::from)?;

        let mut fields = Vec::new();
        for row in rows {
            let (id, event_id, title, tag) = row.map_err(DbError::from)?;
            fields.push(CustomField {
                id,
                event_id,
                title,
                field_type: CustomFieldType::from_tag(&tag)?,
            });
        }
        Ok(fields)
    }

    /// The event's participant-detecting fields — the ones the engine owns.
    pub fn list_participant_detecting_fields(
        &self,
        event_id: i64,
    ) -> Result<Vec<CustomField>, EngineError> {
        Ok(self
            .list_custom_fields(event_id)?
            .into_iter()
            .filter(|f| f.field_type == CustomFieldType::ParticipantDetecting)
            .collect())
    }

    // =========================================================================
    // Value rows
    // =========================================================================

    /// Load the full value collection of one owner.
    pub fn load_collection(&self, owner: ValueOwner) -> Result<CustomFieldValueCollection, EngineError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT v.custom_field_id, f.field_type, v.comment, v.payload
                 FROM custom_field_values v
                 JOIN custom_fields f ON f.id = v.custom_field_id
                 WHERE v.owner_kind = ?1 AND v.owner_id = ?2
                 ORDER BY v.custom_field_id",
            )
            .map_err(DbError::from)?;
        let rows = stmt
            .query_map(params![owner.kind.as_str(), owner.id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .map_err(DbError::from)?;

        let mut collection = CustomFieldValueCollection::new();
        for row in rows {
            let (custom_field_id, tag, comment, payload) = row.map_err(DbError::from)?;
            let field_type = CustomFieldType::from_tag(&tag)?;
            let raw: serde_json::Value =
                serde_json::from_str(&payload).map_err(|e| EngineError::MalformedValue {
                    custom_field_id,
                    reason: format!("payload is not valid JSON: {e}"),
                })?;
            collection.attach(CustomFieldValueContainer::from_stored(
                custom_field_id,
                field_type,
                comment,
                &raw,
            )?)?;
        }
        Ok(collection)
    }

    /// Load one owner's container for one field, if stored.
    pub fn load_container(
        &self,
        owner: ValueOwner,
        field: &CustomField,
    ) -> Result<Option<CustomFieldValueContainer>, EngineError> {
        Ok(self.load_collection(owner)?.get(field.id).cloned())
    }

    /// Upsert one container row for an owner.
    pub fn save_container(
        &self,
        owner: ValueOwner,
        container: &CustomFieldValueContainer,
    ) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO custom_field_values
                (owner_kind, owner_id, custom_field_id, comment, payload, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(owner_kind, owner_id, custom_field_id) DO UPDATE SET
                comment = excluded.comment,
                payload = excluded.payload,
                updated_at = excluded.updated_at",
            params![
                owner.kind.as_str(),
                owner.id,
                container.custom_field_id(),
                container.comment,
                container.payload().to_string(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// All stored participant-detecting value rows of an event, the raw input
    /// of the staleness check and the recompute pass. Ordered by field then
    /// owner for deterministic passes.
    pub fn list_detecting_value_rows(
        &self,
        event_id: i64,
    ) -> Result<Vec<DetectingValueRow>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT v.owner_kind, v.owner_id, v.custom_field_id, v.comment, v.payload
             FROM custom_field_values v
             JOIN custom_fields f ON f.id = v.custom_field_id
             WHERE f.event_id = ?1 AND f.field_type = 'participant_detecting'
             ORDER BY v.custom_field_id, v.owner_kind, v.owner_id",
        )?;
        let rows = stmt.query_map(params![event_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (kind, owner_id, custom_field_id, comment, payload) = row?;
            out.push(DetectingValueRow {
                owner_kind: OwnerKind::from_sql(&kind)?,
                owner_id,
                custom_field_id,
                comment,
                payload,
            });
        }
        Ok(out)
    }

    /// Test-friendly constructor over a scratch file.
    pub fn open_in_dir(dir: &Path, name: &str) -> Result<Self, DbError> {
        Self::open_at(dir.join(name))
    }
}
