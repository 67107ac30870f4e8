//! Per-field value containers and the per-entity collection.
//!
//! A container couples one custom field id with one value (plus an optional
//! free-text comment). A collection holds all containers of one owning
//! entity, keyed by custom field id — unique per field, iterated ascending.
//! `get_by_field` is the single access path both the form layer and the
//! matching engine use; it lazily attaches an empty container of the field's
//! type on first access.

use std::collections::BTreeMap;

use crate::custom_field::{CustomField, CustomFieldType};
use crate::error::EngineError;
use crate::value::CustomFieldValue;

/// Per-entity-per-field value storage.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomFieldValueContainer {
    custom_field_id: i64,
    field_type: CustomFieldType,
    pub comment: Option<String>,
    value: CustomFieldValue,
}

impl CustomFieldValueContainer {
    /// Build a container, enforcing that the value's tag matches the field's.
    pub fn new(field: &CustomField, value: CustomFieldValue) -> Result<Self, EngineError> {
        if value.type_tag() != field.field_type {
            return Err(EngineError::TypeMismatch {
                field_tag: field.field_type.as_str(),
                value_tag: value.type_tag().as_str(),
            });
        }
        Ok(Self {
            custom_field_id: field.id,
            field_type: field.field_type,
            comment: None,
            value,
        })
    }

    /// An empty container for a field — what first access attaches.
    pub fn empty(field: &CustomField) -> Self {
        Self {
            custom_field_id: field.id,
            field_type: field.field_type,
            comment: None,
            value: CustomFieldValue::empty(field.field_type),
        }
    }

    /// Rebuild from storage. The serialized payload's tag must agree with the
    /// stored field type — disagreement means a corrupted row.
    pub fn from_stored(
        custom_field_id: i64,
        field_type: CustomFieldType,
        comment: Option<String>,
        payload: &serde_json::Value,
    ) -> Result<Self, EngineError> {
        let value = CustomFieldValue::from_json(custom_field_id, payload)?;
        if value.type_tag() != field_type {
            return Err(EngineError::TypeMismatch {
                field_tag: field_type.as_str(),
                value_tag: value.type_tag().as_str(),
            });
        }
        Ok(Self {
            custom_field_id,
            field_type,
            comment,
            value,
        })
    }

    pub fn custom_field_id(&self) -> i64 {
        self.custom_field_id
    }

    pub fn field_type(&self) -> CustomFieldType {
        self.field_type
    }

    pub fn value(&self) -> &CustomFieldValue {
        &self.value
    }

    /// Mutable access for in-place edits of the current variant. Swapping the
    /// variant itself goes through [`Self::set_value`], which re-checks the tag.
    pub fn value_mut(&mut self) -> &mut CustomFieldValue {
        &mut self.value
    }

    /// Replace the value, keeping the tag invariant.
    pub fn set_value(&mut self, value: CustomFieldValue) -> Result<(), EngineError> {
        if value.type_tag() != self.field_type {
            return Err(EngineError::TypeMismatch {
                field_tag: self.field_type.as_str(),
                value_tag: value.type_tag().as_str(),
            });
        }
        self.value = value;
        Ok(())
    }

    /// Serialized payload for the `custom_field_values.payload` column.
    pub fn payload(&self) -> serde_json::Value {
        self.value.to_json()
    }
}

/// All containers of one owning entity, keyed by custom field id.
/// BTreeMap gives the unique-per-field invariant and ascending iteration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CustomFieldValueCollection {
    containers: BTreeMap<i64, CustomFieldValueContainer>,
}

impl CustomFieldValueCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// The single access path: return the container for `field`, attaching an
    /// empty one of the correct type if the entity has none yet.
    pub fn get_by_field(&mut self, field: &CustomField) -> &mut CustomFieldValueContainer {
        self.containers
            .entry(field.id)
            .or_insert_with(|| CustomFieldValueContainer::empty(field))
    }

    /// Read-only lookup; `None` when the entity has no value for the field.
    pub fn get(&self, custom_field_id: i64) -> Option<&CustomFieldValueContainer> {
        self.containers.get(&custom_field_id)
    }

    /// Attach a loaded container. A duplicate field id is a corrupted-state
    /// error — the storage key makes this unreachable for well-formed rows.
    pub fn attach(&mut self, container: CustomFieldValueContainer) -> Result<(), EngineError> {
        let id = container.custom_field_id();
        if self.containers.contains_key(&id) {
            return Err(EngineError::MalformedValue {
                custom_field_id: id,
                reason: "duplicate container for custom field".to_string(),
            });
        }
        self.containers.insert(id, container);
        Ok(())
    }

    /// Ascending iteration over custom field ids.
    pub fn iter(&self) -> impl Iterator<Item = &CustomFieldValueContainer> {
        self.containers.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut CustomFieldValueContainer> {
        self.containers.values_mut()
    }

    pub fn len(&self) -> usize {
        self.containers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }
}
