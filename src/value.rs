//! Tagged-union custom field values.
//!
//! Every variant carries a stable string tag (shared with
//! [`CustomFieldType`]) and serializes to a JSON object with a `"type"`
//! discriminator. Dispatch on the tag happens in exactly one place —
//! [`CustomFieldValue::from_json`] — with an exhaustive match, so an
//! unrecognized tag is a hard `UnknownCustomFieldType` error instead of a
//! silently mistyped value.
//!
//! All engine-managed state (selection, system selection, the proposal
//! cache) lives inside the [`ParticipantDetectingValue`] variant.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::custom_field::CustomFieldType;
use crate::error::EngineError;

// ---------------------------------------------------------------------------
// Composite payloads
// ---------------------------------------------------------------------------

/// Bank account triple. The composite counterpart to participant detection:
/// the form adapter hands the whole object through instead of a scalar.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BankAccountValue {
    #[serde(default)]
    pub iban: Option<String>,
    #[serde(default)]
    pub bic: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
}

impl BankAccountValue {
    /// Human rendering with the IBAN masked to its last four characters.
    pub fn textual(&self) -> String {
        let iban = match &self.iban {
            // Counted in chars, not bytes — the IBAN is free-form user input
            // and a byte slice could split a multi-byte character.
            Some(iban) if iban.chars().count() > 4 => {
                let skip = iban.chars().count() - 4;
                let tail: String = iban.chars().skip(skip).collect();
                format!("…{}", tail)
            }
            Some(iban) => iban.clone(),
            None => String::new(),
        };
        match &self.owner {
            Some(owner) if !owner.is_empty() => format!("{} ({})", iban, owner),
            _ => iban,
        }
    }
}

/// Value of a participant-detecting field: the guardian-typed name of a
/// sibling/companion, the resolved selection, and the proposal cache.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantDetectingValue {
    /// True when the selection was made by the engine (exact match), not a human.
    #[serde(default)]
    pub system_selection: bool,
    #[serde(default)]
    pub related_first_name: String,
    #[serde(default)]
    pub related_last_name: String,
    #[serde(default)]
    pub selected_participant_id: Option<i64>,
    /// Name snapshot taken at selection time; survives later pool renames.
    #[serde(default)]
    pub selected_first_name: String,
    #[serde(default)]
    pub selected_last_name: String,
    /// Ordered best-first candidate cache. `None` means "needs recompute".
    #[serde(default)]
    pub proposed_participant_ids: Option<Vec<i64>>,
}

impl ParticipantDetectingValue {
    pub fn has_selection(&self) -> bool {
        self.selected_participant_id.is_some()
    }

    /// Update the typed first name. A changed name invalidates the proposal
    /// cache; if the current selection was system-made it is cleared together
    /// with the flag and the snapshot (never a partial reset).
    pub fn set_related_first_name(&mut self, name: impl Into<String>) {
        let name = name.into();
        if name == self.related_first_name {
            return;
        }
        self.related_first_name = name;
        self.invalidate_after_name_edit();
    }

    /// Update the typed last name. Same invalidation contract as
    /// [`Self::set_related_first_name`].
    pub fn set_related_last_name(&mut self, name: impl Into<String>) {
        let name = name.into();
        if name == self.related_last_name {
            return;
        }
        self.related_last_name = name;
        self.invalidate_after_name_edit();
    }

    fn invalidate_after_name_edit(&mut self) {
        self.proposed_participant_ids = None;
        if self.system_selection {
            self.clear_selection();
        }
    }

    /// Record a selection with its name snapshot. `system` marks an
    /// engine-made (exact match) selection.
    pub fn select(
        &mut self,
        participant_id: i64,
        first_name: impl Into<String>,
        last_name: impl Into<String>,
        system: bool,
    ) {
        self.selected_participant_id = Some(participant_id);
        self.selected_first_name = first_name.into();
        self.selected_last_name = last_name.into();
        self.system_selection = system;
    }

    /// Drop selection, snapshot and the system flag in one step.
    pub fn clear_selection(&mut self) {
        self.selected_participant_id = None;
        self.selected_first_name.clear();
        self.selected_last_name.clear();
        self.system_selection = false;
    }
}

// ---------------------------------------------------------------------------
// The tagged union
// ---------------------------------------------------------------------------

/// A custom field value, one variant per [`CustomFieldType`].
#[derive(Debug, Clone, PartialEq)]
pub enum CustomFieldValue {
    Text(String),
    Number(Option<i64>),
    Checkbox(bool),
    Choice(Vec<String>),
    Date(Option<String>),
    BankAccount(BankAccountValue),
    ParticipantDetecting(ParticipantDetectingValue),
}

/// Form-layer representation: scalars for simple types, the value object
/// itself for composite types.
#[derive(Debug, Clone, PartialEq)]
pub enum FormValue {
    Scalar(String),
    BankAccount(BankAccountValue),
    ParticipantDetecting(ParticipantDetectingValue),
}

impl CustomFieldValue {
    /// An empty value of the given field type — what the collection attaches
    /// on first access to a field.
    pub fn empty(field_type: CustomFieldType) -> Self {
        match field_type {
            CustomFieldType::Text => CustomFieldValue::Text(String::new()),
            CustomFieldType::Number => CustomFieldValue::Number(None),
            CustomFieldType::Checkbox => CustomFieldValue::Checkbox(false),
            CustomFieldType::Choice => CustomFieldValue::Choice(Vec::new()),
            CustomFieldType::Date => CustomFieldValue::Date(None),
            CustomFieldType::BankAccount => {
                CustomFieldValue::BankAccount(BankAccountValue::default())
            }
            CustomFieldType::ParticipantDetecting => {
                CustomFieldValue::ParticipantDetecting(ParticipantDetectingValue::default())
            }
        }
    }

    /// The type tag of this value.
    pub fn type_tag(&self) -> CustomFieldType {
        match self {
            CustomFieldValue::Text(_) => CustomFieldType::Text,
            CustomFieldValue::Number(_) => CustomFieldType::Number,
            CustomFieldValue::Checkbox(_) => CustomFieldType::Checkbox,
            CustomFieldValue::Choice(_) => CustomFieldType::Choice,
            CustomFieldValue::Date(_) => CustomFieldType::Date,
            CustomFieldValue::BankAccount(_) => CustomFieldType::BankAccount,
            CustomFieldValue::ParticipantDetecting(_) => CustomFieldType::ParticipantDetecting,
        }
    }

    /// Value equality. Tag mismatch is simply "not equal".
    pub fn is_equal_to(&self, other: &CustomFieldValue) -> bool {
        self == other
    }

    /// Serialize to the stored JSON object with a `"type"` discriminator.
    pub fn to_json(&self) -> Value {
        let tag = self.type_tag().as_str();
        match self {
            CustomFieldValue::Text(text) => json!({ "type": tag, "value": text }),
            CustomFieldValue::Number(num) => json!({ "type": tag, "value": num }),
            CustomFieldValue::Checkbox(checked) => json!({ "type": tag, "value": checked }),
            CustomFieldValue::Choice(selected) => json!({ "type": tag, "selected": selected }),
            CustomFieldValue::Date(date) => json!({ "type": tag, "value": date }),
            CustomFieldValue::BankAccount(account) => {
                let mut obj = serde_json::to_value(account).unwrap_or_else(|_| json!({}));
                obj["type"] = json!(tag);
                obj
            }
            CustomFieldValue::ParticipantDetecting(detecting) => {
                let mut obj = serde_json::to_value(detecting).unwrap_or_else(|_| json!({}));
                obj["type"] = json!(tag);
                obj
            }
        }
    }

    /// Deserialize a stored JSON object. `custom_field_id` is error context
    /// only. Unknown `"type"` tags and shape mismatches are hard data errors.
    pub fn from_json(custom_field_id: i64, raw: &Value) -> Result<Self, EngineError> {
        let tag = raw
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| EngineError::MalformedValue {
                custom_field_id,
                reason: "missing \"type\" discriminator".to_string(),
            })?;
        let field_type = CustomFieldType::from_tag(tag)?;

        let malformed = |reason: &str| EngineError::MalformedValue {
            custom_field_id,
            reason: reason.to_string(),
        };

        match field_type {
            CustomFieldType::Text => {
                let text = raw
                    .get("value")
                    .and_then(Value::as_str)
                    .ok_or_else(|| malformed("text value must be a string"))?;
                Ok(CustomFieldValue::Text(text.to_string()))
            }
            CustomFieldType::Number => match raw.get("value") {
                None | Some(Value::Null) => Ok(CustomFieldValue::Number(None)),
                Some(v) => v
                    .as_i64()
                    .map(|n| CustomFieldValue::Number(Some(n)))
                    .ok_or_else(|| malformed("number value must be an integer")),
            },
            CustomFieldType::Checkbox => {
                let checked = raw
                    .get("value")
                    .and_then(Value::as_bool)
                    .ok_or_else(|| malformed("checkbox value must be a boolean"))?;
                Ok(CustomFieldValue::Checkbox(checked))
            }
            CustomFieldType::Choice => {
                let selected = raw
                    .get("selected")
                    .and_then(Value::as_array)
                    .ok_or_else(|| malformed("choice value must carry a \"selected\" array"))?
                    .iter()
                    .map(|v| {
                        v.as_str()
                            .map(str::to_string)
                            .ok_or_else(|| malformed("choice options must be strings"))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(CustomFieldValue::Choice(selected))
            }
            CustomFieldType::Date => match raw.get("value") {
                None | Some(Value::Null) => Ok(CustomFieldValue::Date(None)),
                Some(v) => v
                    .as_str()
                    .map(|s| CustomFieldValue::Date(Some(s.to_string())))
                    .ok_or_else(|| malformed("date value must be a string")),
            },
            CustomFieldType::BankAccount => {
                let account: BankAccountValue = serde_json::from_value(raw.clone())
                    .map_err(|e| malformed(&format!("bank account payload: {e}")))?;
                Ok(CustomFieldValue::BankAccount(account))
            }
            CustomFieldType::ParticipantDetecting => {
                let detecting: ParticipantDetectingValue = serde_json::from_value(raw.clone())
                    .map_err(|e| malformed(&format!("participant detecting payload: {e}")))?;
                Ok(CustomFieldValue::ParticipantDetecting(detecting))
            }
        }
    }

    /// Human rendering for lists and exports.
    pub fn textual_value(&self) -> String {
        match self {
            CustomFieldValue::Text(text) => text.clone(),
            CustomFieldValue::Number(Some(n)) => n.to_string(),
            CustomFieldValue::Number(None) => String::new(),
            CustomFieldValue::Checkbox(true) => "yes".to_string(),
            CustomFieldValue::Checkbox(false) => "no".to_string(),
            CustomFieldValue::Choice(selected) => selected.join(", "),
            CustomFieldValue::Date(Some(date)) => date.clone(),
            CustomFieldValue::Date(None) => String::new(),
            CustomFieldValue::BankAccount(account) => account.textual(),
            CustomFieldValue::ParticipantDetecting(detecting) => {
                if detecting.has_selection() {
                    format!(
                        "{} {}",
                        detecting.selected_first_name, detecting.selected_last_name
                    )
                } else {
                    format!(
                        "{} {}",
                        detecting.related_first_name, detecting.related_last_name
                    )
                    .trim()
                    .to_string()
                }
            }
        }
    }

    /// Form adapter: scalar for simple types, the value object for composites.
    pub fn form_value(&self) -> FormValue {
        match self {
            CustomFieldValue::Text(text) => FormValue::Scalar(text.clone()),
            CustomFieldValue::Number(n) => {
                FormValue::Scalar(n.map(|n| n.to_string()).unwrap_or_default())
            }
            CustomFieldValue::Checkbox(checked) => FormValue::Scalar(checked.to_string()),
            CustomFieldValue::Choice(selected) => FormValue::Scalar(selected.join(";")),
            CustomFieldValue::Date(date) => FormValue::Scalar(date.clone().unwrap_or_default()),
            CustomFieldValue::BankAccount(account) => FormValue::BankAccount(account.clone()),
            CustomFieldValue::ParticipantDetecting(detecting) => {
                FormValue::ParticipantDetecting(detecting.clone())
            }
        }
    }

    /// Apply a submitted form value. For participant detection only the typed
    /// names are taken from the form — selection, flag and proposal cache stay
    /// engine-managed and are only touched through the name-edit invalidation.
    pub fn set_form_value(&mut self, form: FormValue) -> Result<(), EngineError> {
        match (self, form) {
            (CustomFieldValue::Text(text), FormValue::Scalar(s)) => {
                *text = s;
                Ok(())
            }
            (CustomFieldValue::Number(n), FormValue::Scalar(s)) => {
                let trimmed = s.trim();
                *n = if trimmed.is_empty() {
                    None
                } else {
                    // Unparsable input degrades to empty rather than failing
                    // the whole form.
                    trimmed.parse::<i64>().ok()
                };
                Ok(())
            }
            (CustomFieldValue::Checkbox(checked), FormValue::Scalar(s)) => {
                *checked = matches!(s.trim(), "true" | "1" | "on" | "yes");
                Ok(())
            }
            (CustomFieldValue::Choice(selected), FormValue::Scalar(s)) => {
                *selected = s
                    .split(';')
                    .map(str::trim)
                    .filter(|part| !part.is_empty())
                    .map(str::to_string)
                    .collect();
                Ok(())
            }
            (CustomFieldValue::Date(date), FormValue::Scalar(s)) => {
                let trimmed = s.trim();
                *date = if trimmed.is_empty() {
                    None
                } else {
                    Some(trimmed.to_string())
                };
                Ok(())
            }
            (CustomFieldValue::BankAccount(account), FormValue::BankAccount(submitted)) => {
                *account = submitted;
                Ok(())
            }
            (
                CustomFieldValue::ParticipantDetecting(detecting),
                FormValue::ParticipantDetecting(submitted),
            ) => {
                detecting.set_related_first_name(submitted.related_first_name);
                detecting.set_related_last_name(submitted.related_last_name);
                Ok(())
            }
            (current, _) => Err(EngineError::TypeMismatch {
                field_tag: current.type_tag().as_str(),
                value_tag: "form value of a different shape",
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detecting_with_system_selection() -> ParticipantDetectingValue {
        let mut value = ParticipantDetectingValue {
            related_first_name: "Anna".to_string(),
            related_last_name: "Muster".to_string(),
            proposed_participant_ids: Some(vec![1, 2]),
            ..Default::default()
        };
        value.select(1, "Anna", "Muster", true);
        value
    }

    #[test]
    fn test_name_edit_clears_system_selection_atomically() {
        let mut value = detecting_with_system_selection();
        value.set_related_first_name("Anne");

        assert_eq!(value.selected_participant_id, None);
        assert!(!value.system_selection);
        assert!(value.selected_first_name.is_empty());
        assert!(value.selected_last_name.is_empty());
        assert_eq!(value.proposed_participant_ids, None);
    }

    #[test]
    fn test_name_edit_keeps_manual_selection() {
        let mut value = detecting_with_system_selection();
        value.system_selection = false; // human-confirmed selection
        value.set_related_last_name("Musterfrau");

        assert_eq!(value.selected_participant_id, Some(1));
        assert_eq!(value.proposed_participant_ids, None); // cache still invalidated
    }

    #[test]
    fn test_unchanged_name_keeps_cache() {
        let mut value = detecting_with_system_selection();
        value.set_related_first_name("Anna");
        assert_eq!(value.proposed_participant_ids, Some(vec![1, 2]));
        assert!(value.system_selection);
    }

    #[test]
    fn test_json_round_trip_participant_detecting() {
        let value = CustomFieldValue::ParticipantDetecting(detecting_with_system_selection());
        let raw = value.to_json();
        assert_eq!(raw["type"], "participant_detecting");
        assert_eq!(raw["systemSelection"], true);

        let back = CustomFieldValue::from_json(7, &raw).unwrap();
        assert!(back.is_equal_to(&value));
    }

    #[test]
    fn test_missing_proposals_deserializes_as_needs_recompute() {
        let raw = serde_json::json!({
            "type": "participant_detecting",
            "relatedFirstName": "Anna",
            "relatedLastName": "Muster"
        });
        let value = CustomFieldValue::from_json(7, &raw).unwrap();
        match value {
            CustomFieldValue::ParticipantDetecting(d) => {
                assert_eq!(d.proposed_participant_ids, None)
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_tag_fails() {
        let raw = serde_json::json!({ "type": "hologram", "value": 1 });
        let err = CustomFieldValue::from_json(3, &raw).unwrap_err();
        assert!(matches!(err, EngineError::UnknownCustomFieldType { .. }));
    }

    #[test]
    fn test_malformed_payload_fails() {
        let raw = serde_json::json!({ "type": "checkbox", "value": "maybe" });
        let err = CustomFieldValue::from_json(3, &raw).unwrap_err();
        assert!(matches!(err, EngineError::MalformedValue { .. }));
    }

    #[test]
    fn test_textual_values() {
        assert_eq!(CustomFieldValue::Checkbox(true).textual_value(), "yes");
        assert_eq!(
            CustomFieldValue::Choice(vec!["bus".into(), "train".into()]).textual_value(),
            "bus, train"
        );
        let account = BankAccountValue {
            iban: Some("DE02120300000000202051".to_string()),
            bic: None,
            owner: Some("Erika Muster".to_string()),
        };
        assert_eq!(
            CustomFieldValue::BankAccount(account).textual_value(),
            "…2051 (Erika Muster)"
        );
    }

    #[test]
    fn test_bank_account_mask_handles_multibyte_input() {
        // Free-form user input: the mask boundary must never split a
        // multi-byte character.
        let account = BankAccountValue {
            iban: Some("1é345".to_string()),
            bic: None,
            owner: None,
        };
        assert_eq!(account.textual(), "…é345");

        let short = BankAccountValue {
            iban: Some("éßü".to_string()),
            bic: None,
            owner: None,
        };
        assert_eq!(short.textual(), "éßü");
    }

    #[test]
    fn test_form_round_trip_scalar() {
        let mut value = CustomFieldValue::Number(None);
        value.set_form_value(FormValue::Scalar("42".to_string())).unwrap();
        assert_eq!(value, CustomFieldValue::Number(Some(42)));
        assert_eq!(value.form_value(), FormValue::Scalar("42".to_string()));
    }

    #[test]
    fn test_form_mismatch_is_error() {
        let mut value = CustomFieldValue::Text(String::new());
        let err = value
            .set_form_value(FormValue::BankAccount(BankAccountValue::default()))
            .unwrap_err();
        assert!(matches!(err, EngineError::TypeMismatch { .. }));
    }

    #[test]
    fn test_form_submission_preserves_manual_selection_state() {
        let mut value = CustomFieldValue::ParticipantDetecting(detecting_with_system_selection());
        // Same names submitted again — engine state must survive untouched.
        let resubmitted = ParticipantDetectingValue {
            related_first_name: "Anna".to_string(),
            related_last_name: "Muster".to_string(),
            ..Default::default()
        };
        value
            .set_form_value(FormValue::ParticipantDetecting(resubmitted))
            .unwrap();
        match value {
            CustomFieldValue::ParticipantDetecting(d) => {
                assert_eq!(d.selected_participant_id, Some(1));
                assert!(d.system_selection);
                assert_eq!(d.proposed_participant_ids, Some(vec![1, 2]));
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }
}
