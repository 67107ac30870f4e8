//! Approximate name matching against an event's participant pool.
//!
//! Pure ranking: no storage access, no failure modes. Malformed or
//! incomplete input degrades to weak or empty results instead of erroring.
//!
//! Each pool candidate is scored by the classic unit-cost edit distance of
//! the typed first/last name against the candidate's trimmed names, then
//! placed in one of three buckets:
//!
//! - tight (`df < 2 && dl < 2`, key `df + dl`): at most one typo per name
//! - loose-first-only (`df < 3`, key `df + 10`): the first name is a usable
//!   weak signal on its own
//! - loose-last-only (`dl < 3`, key `dl + 11`): same for the last name
//!
//! The 10/11 offsets keep any single-name signal ranked below every tight
//! match while staying asymmetric between the two loose paths. Candidates
//! missing all three buckets are excluded.

use crate::value::ParticipantDetectingValue;

/// One entry of the event's participant pool — flattened read model supplied
/// by the persistence layer, never the full object graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolParticipant {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
}

/// A scored candidate. Kept internal to the ranking pass; callers consume
/// plain ordered id lists.
#[derive(Debug, Clone, Copy)]
struct Ranked {
    id: i64,
    key: u32,
}

/// Distances of one candidate against the typed names.
fn distances(typed_first: &str, typed_last: &str, candidate: &PoolParticipant) -> (usize, usize) {
    (
        strsim::levenshtein(typed_first, candidate.first_name.trim()),
        strsim::levenshtein(typed_last, candidate.last_name.trim()),
    )
}

/// Bucket key for a distance pair, or `None` when the candidate is excluded.
fn bucket_key(df: usize, dl: usize) -> Option<u32> {
    if df < 2 && dl < 2 {
        Some((df + dl) as u32)
    } else if df < 3 {
        Some((df + 10) as u32)
    } else if dl < 3 {
        Some((dl + 11) as u32)
    } else {
        None
    }
}

/// Compute the ordered best-first candidate id list for a typed name pair.
///
/// Blank input on either name yields an empty list — incomplete data must
/// not produce spurious matches. Ordering within equal bucket keys preserves
/// pool order (stable sort); duplicate ids keep their first occurrence.
pub fn compute_candidates(
    typed_first: &str,
    typed_last: &str,
    pool: &[PoolParticipant],
) -> Vec<i64> {
    let typed_first = typed_first.trim();
    let typed_last = typed_last.trim();
    if typed_first.is_empty() || typed_last.is_empty() {
        return Vec::new();
    }

    let mut ranked: Vec<Ranked> = pool
        .iter()
        .filter_map(|candidate| {
            let (df, dl) = distances(typed_first, typed_last, candidate);
            bucket_key(df, dl).map(|key| Ranked {
                id: candidate.id,
                key,
            })
        })
        .collect();
    ranked.sort_by_key(|r| r.key);

    let mut seen = std::collections::HashSet::new();
    ranked
        .into_iter()
        .filter(|r| seen.insert(r.id))
        .map(|r| r.id)
        .collect()
}

/// First pool-order candidate matching both typed names exactly
/// (distance 0 on each). This is the only match quality that may
/// auto-select; approximate matches never do.
pub fn first_exact_match<'p>(
    typed_first: &str,
    typed_last: &str,
    pool: &'p [PoolParticipant],
) -> Option<&'p PoolParticipant> {
    let typed_first = typed_first.trim();
    let typed_last = typed_last.trim();
    if typed_first.is_empty() || typed_last.is_empty() {
        return None;
    }
    pool.iter()
        .find(|candidate| distances(typed_first, typed_last, candidate) == (0, 0))
}

/// Recompute one participant-detecting value against the pool: refresh the
/// proposal cache and, when no selection exists, auto-select an exact match
/// with `system_selection = true`.
pub fn recompute_value(value: &mut ParticipantDetectingValue, pool: &[PoolParticipant]) {
    let proposals = compute_candidates(&value.related_first_name, &value.related_last_name, pool);

    if !value.has_selection() {
        if let Some(exact) =
            first_exact_match(&value.related_first_name, &value.related_last_name, pool)
        {
            value.select(exact.id, exact.first_name.clone(), exact.last_name.clone(), true);
        }
    }

    // Written last: a Some cache marks the value fresh.
    value.proposed_participant_ids = Some(proposals);
}
