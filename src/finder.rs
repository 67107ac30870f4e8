//! Proposal cache orchestration: staleness check, per-event locking with
//! retry, the batched recompute pass, and the proposal query.
//!
//! Control flow for a proposal request: check cache validity → if stale,
//! acquire the event's lock → load the pool once → recompute every
//! participant-detecting value of the event → auto-select on exact match →
//! persist the batch in one transaction → release the lock → return the
//! requested value's proposals.
//!
//! Concurrency model: plain synchronous execution. The only blocking point
//! is the backoff sleep while another process holds the event's lock, and
//! staleness is always re-evaluated after that sleep — the other process may
//! have finished the work already.

use std::thread;
use std::time::Duration;

use crate::container::CustomFieldValueContainer;
use crate::custom_field::{CustomField, CustomFieldType};
use crate::db::{DetectingValueRow, EventDb, ValueOwner};
use crate::error::EngineError;
use crate::locker::{Acquired, EventLocker};
use crate::matching::{self, PoolParticipant};
use crate::value::{CustomFieldValue, ParticipantDetectingValue};

/// Fixed sleep between lock attempts. Contention windows are one recompute
/// pass over human-scale data, so coarse is fine.
pub const LOCK_RETRY_BACKOFF: Duration = Duration::from_millis(250);

/// Computes and serves participant proposals for one database.
pub struct RelatedParticipantsFinder<'a> {
    db: &'a EventDb,
    locker: EventLocker,
    pass_delay: Duration,
}

impl<'a> RelatedParticipantsFinder<'a> {
    pub fn new(db: &'a EventDb, locker: EventLocker) -> Self {
        Self {
            db,
            locker,
            pass_delay: Duration::ZERO,
        }
    }

    /// Stretch the write pass while the lock is held. Concurrency tests use
    /// this to widen the race window; production keeps the default zero.
    pub fn with_pass_delay(mut self, delay: Duration) -> Self {
        self.pass_delay = delay;
        self
    }

    /// Make every participant-detecting value of the event carry a fresh
    /// proposal cache. No-op without lock acquisition when nothing is stale.
    pub fn ensure_proposals(&self, event_id: i64) -> Result<(), EngineError> {
        loop {
            // Re-evaluated on every iteration: after a backoff sleep another
            // process may have completed the pass.
            if !self.needs_recompute(event_id)? {
                return Ok(());
            }

            match self.locker.acquire(event_id)? {
                Acquired::Unavailable => {
                    log::debug!(
                        "RelatedParticipantsFinder: event {} is being recomputed elsewhere, backing off",
                        event_id
                    );
                    thread::sleep(LOCK_RETRY_BACKOFF);
                }
                Acquired::Held(handle) => {
                    let result = self.recompute_pass(event_id);
                    self.locker.release(handle);
                    return result;
                }
            }
        }
    }

    /// The primary "did you mean…" query: fresh ordered proposals for one
    /// owner's value of one participant-detecting field, resolved to pool
    /// participants. Ids that have vanished from the pool are dropped
    /// silently — proposals are an advisory aid, not correctness-critical.
    pub fn proposed_participants(
        &self,
        owner: ValueOwner,
        field: &CustomField,
    ) -> Result<Vec<PoolParticipant>, EngineError> {
        if field.field_type != CustomFieldType::ParticipantDetecting {
            return Err(EngineError::WrongFieldType {
                required: CustomFieldType::ParticipantDetecting.as_str(),
                found: field.field_type.as_str(),
            });
        }
        let event_id = owner.related_event()?;

        self.ensure_proposals(event_id)?;

        // Re-read after the pass so the answer reflects what was persisted.
        let container = match self.db.load_container(owner, field)? {
            Some(container) => container,
            None => return Ok(Vec::new()),
        };
        let ids = match container.value() {
            CustomFieldValue::ParticipantDetecting(value) => {
                value.proposed_participant_ids.clone().unwrap_or_default()
            }
            other => {
                return Err(EngineError::TypeMismatch {
                    field_tag: field.field_type.as_str(),
                    value_tag: other.type_tag().as_str(),
                })
            }
        };

        let pool = self.db.list_participants(event_id)?;
        let mut resolved = Vec::with_capacity(ids.len());
        for id in ids {
            match pool.iter().find(|p| p.id == id) {
                Some(participant) => resolved.push(participant.clone()),
                None => log::debug!(
                    "RelatedParticipantsFinder: dropping vanished participant {} from proposals",
                    id
                ),
            }
        }
        Ok(resolved)
    }

    /// True when any participant-detecting value of the event still carries
    /// an uncomputed (`None`) proposal cache.
    fn needs_recompute(&self, event_id: i64) -> Result<bool, EngineError> {
        for row in self.db.list_detecting_value_rows(event_id)? {
            if parse_detecting_row(&row)?.proposed_participant_ids.is_none() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// One full recompute: load the pool once, refresh every stored
    /// participant-detecting value, persist the batch in one transaction.
    fn recompute_pass(&self, event_id: i64) -> Result<(), EngineError> {
        let pool = self.db.list_participants(event_id)?;
        let rows = self.db.list_detecting_value_rows(event_id)?;
        let fields = self.db.list_participant_detecting_fields(event_id)?;

        log::info!(
            "RelatedParticipantsFinder: recompute pass for event {} ({} fields, {} values, pool of {})",
            event_id,
            fields.len(),
            rows.len(),
            pool.len()
        );

        let mut batch: Vec<(ValueOwner, CustomFieldValueContainer)> = Vec::with_capacity(rows.len());
        for row in &rows {
            let field = fields
                .iter()
                .find(|f| f.id == row.custom_field_id)
                .ok_or_else(|| EngineError::MalformedValue {
                    custom_field_id: row.custom_field_id,
                    reason: "value row references a field of another event".to_string(),
                })?;

            let mut value = parse_detecting_row(row)?;
            matching::recompute_value(&mut value, &pool);

            let mut container =
                CustomFieldValueContainer::new(field, CustomFieldValue::ParticipantDetecting(value))?;
            container.comment = row.comment.clone();
            let owner = ValueOwner {
                kind: row.owner_kind,
                id: row.owner_id,
                event_id: Some(event_id),
            };
            batch.push((owner, container));
        }

        if !self.pass_delay.is_zero() {
            thread::sleep(self.pass_delay);
        }

        self.db.with_transaction(|db| {
            for (owner, container) in &batch {
                db.save_container(*owner, container)?;
            }
            Ok(())
        })
    }
}

/// Parse one stored row into its detecting value. Non-JSON payloads, unknown
/// tags and wrong variants are all corrupted-state hard failures.
fn parse_detecting_row(row: &DetectingValueRow) -> Result<ParticipantDetectingValue, EngineError> {
    let raw: serde_json::Value =
        serde_json::from_str(&row.payload).map_err(|e| EngineError::MalformedValue {
            custom_field_id: row.custom_field_id,
            reason: format!("payload is not valid JSON: {e}"),
        })?;
    match CustomFieldValue::from_json(row.custom_field_id, &raw)? {
        CustomFieldValue::ParticipantDetecting(value) => Ok(value),
        other => Err(EngineError::TypeMismatch {
            field_tag: CustomFieldType::ParticipantDetecting.as_str(),
            value_tag: other.type_tag().as_str(),
        }),
    }
}
