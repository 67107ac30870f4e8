//! Error types for the matching and proposal engine.
//!
//! Errors are classified by recoverability:
//! - Data errors (unknown type tag, malformed payload): corrupted persisted
//!   state, propagated as hard failures — manual correction expected.
//! - Lock contention: never an error at this surface; absorbed by the
//!   retry/backoff loop in the finder.
//! - Contract violations (owner without an event): fail fast.

use thiserror::Error;

use crate::db::DbError;

/// Errors surfaced by the engine to its callers.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Unknown custom field type tag: {tag}")]
    UnknownCustomFieldType { tag: String },

    #[error("Malformed stored value for custom field {custom_field_id}: {reason}")]
    MalformedValue {
        custom_field_id: i64,
        reason: String,
    },

    #[error("Value type {value_tag} does not match field type {field_tag}")]
    TypeMismatch {
        field_tag: &'static str,
        value_tag: &'static str,
    },

    #[error("Custom field of type {found} where a {required} field is required")]
    WrongFieldType {
        required: &'static str,
        found: &'static str,
    },

    #[error("Entity {owner} has no related event; event-scoped matching is not possible")]
    EntityRequiresRelatedEvent { owner: String },

    #[error("Database error: {0}")]
    Db(#[from] DbError),

    #[error("Lock file I/O error: {0}")]
    Lock(#[from] std::io::Error),
}

impl EngineError {
    /// Returns true for corrupted-persisted-state failures that no retry
    /// will fix (admin intervention expected).
    pub fn is_data_error(&self) -> bool {
        matches!(
            self,
            EngineError::UnknownCustomFieldType { .. }
                | EngineError::MalformedValue { .. }
                | EngineError::TypeMismatch { .. }
        )
    }
}
