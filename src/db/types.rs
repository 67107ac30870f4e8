//! Shared type definitions for the storage layer.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::EngineError;

/// Errors specific to database operations.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Failed to create database directory: {0}")]
    CreateDir(std::io::Error),

    #[error("Schema migration failed: {0}")]
    Migration(String),

    #[error("Malformed row: {0}")]
    MalformedRow(String),
}

/// A row from the `events` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbEvent {
    pub id: i64,
    pub title: String,
    pub updated_at: Option<String>,
}

/// The kind of entity owning a custom field value collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnerKind {
    Participant,
    Participation,
    Employee,
}

impl OwnerKind {
    /// String label for SQL storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            OwnerKind::Participant => "participant",
            OwnerKind::Participation => "participation",
            OwnerKind::Employee => "employee",
        }
    }

    /// Parse from SQL string.
    pub fn from_sql(s: &str) -> Result<Self, DbError> {
        match s {
            "participant" => Ok(OwnerKind::Participant),
            "participation" => Ok(OwnerKind::Participation),
            "employee" => Ok(OwnerKind::Employee),
            other => Err(DbError::MalformedRow(format!("unknown owner kind: {other}"))),
        }
    }
}

/// Identifies the entity a value collection belongs to, together with its
/// event context. Employees may exist without an event assignment; asking for
/// event-scoped matching on such an owner is a contract violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValueOwner {
    pub kind: OwnerKind,
    pub id: i64,
    pub event_id: Option<i64>,
}

impl ValueOwner {
    pub fn participant(id: i64, event_id: i64) -> Self {
        Self {
            kind: OwnerKind::Participant,
            id,
            event_id: Some(event_id),
        }
    }

    pub fn participation(id: i64, event_id: i64) -> Self {
        Self {
            kind: OwnerKind::Participation,
            id,
            event_id: Some(event_id),
        }
    }

    pub fn employee(id: i64, event_id: Option<i64>) -> Self {
        Self {
            kind: OwnerKind::Employee,
            id,
            event_id,
        }
    }

    /// The owner's event, or a fail-fast contract error when it has none.
    pub fn related_event(&self) -> Result<i64, EngineError> {
        self.event_id
            .ok_or_else(|| EngineError::EntityRequiresRelatedEvent {
                owner: format!("{} {}", self.kind.as_str(), self.id),
            })
    }
}

/// One stored participant-detecting value row, joined with its field.
/// The raw shape the recompute pass iterates over.
#[derive(Debug, Clone)]
pub struct DetectingValueRow {
    pub owner_kind: OwnerKind,
    pub owner_id: i64,
    pub custom_field_id: i64,
    pub comment: Option<String>,
    pub payload: String,
}
