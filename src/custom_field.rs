//! Custom field descriptors.
//!
//! A custom field is a configurable form field attachable to participants,
//! participations or employees. The `field_type` tag decides which value
//! variant its containers carry; `participant_detecting` fields are the ones
//! the matching engine operates on.

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Closed set of custom field type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustomFieldType {
    Text,
    Number,
    Checkbox,
    Choice,
    Date,
    BankAccount,
    ParticipantDetecting,
}

impl CustomFieldType {
    /// String tag for SQL storage and the serialized value discriminator.
    pub fn as_str(&self) -> &'static str {
        match self {
            CustomFieldType::Text => "text",
            CustomFieldType::Number => "number",
            CustomFieldType::Checkbox => "checkbox",
            CustomFieldType::Choice => "choice",
            CustomFieldType::Date => "date",
            CustomFieldType::BankAccount => "bank_account",
            CustomFieldType::ParticipantDetecting => "participant_detecting",
        }
    }

    /// Parse a stored tag. Unknown tags are a data error, not a fallback —
    /// an open-ended dispatch here would silently mistype stored values.
    pub fn from_tag(tag: &str) -> Result<Self, EngineError> {
        match tag {
            "text" => Ok(CustomFieldType::Text),
            "number" => Ok(CustomFieldType::Number),
            "checkbox" => Ok(CustomFieldType::Checkbox),
            "choice" => Ok(CustomFieldType::Choice),
            "date" => Ok(CustomFieldType::Date),
            "bank_account" => Ok(CustomFieldType::BankAccount),
            "participant_detecting" => Ok(CustomFieldType::ParticipantDetecting),
            other => Err(EngineError::UnknownCustomFieldType {
                tag: other.to_string(),
            }),
        }
    }
}

/// A row from the `custom_fields` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomField {
    pub id: i64,
    pub event_id: i64,
    pub title: String,
    pub field_type: CustomFieldType,
}
