use leadflow_models::{MemberRef, Queue, Strategy};
use tracing::debug;

use super::RotationError;
use crate::storage::{DirectoryStore, StorageBackend, StorageError};

/// Cursor writes retried with a fresh read before giving up.
const CAS_ATTEMPTS: usize = 3;

/// One entry of a queue's resolved rotation, in cycle order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    pub user_id: String,
    pub weight: i64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RotationOptions<'a> {
    /// Skip this user when the queue has anyone else to offer.
    pub exclude: Option<&'a str>,
    /// Count the pick in `leads_distributed`.
    pub count_distribution: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pick {
    pub queue_id: String,
    pub user_id: String,
    /// Cursor value stored after the pick.
    pub cursor: i64,
}

/// Expands queue members into rotation slots. Users must be active; teams
/// expand to their active users in join order, each carrying the entry's weight.
pub fn resolve_slots<D: DirectoryStore + ?Sized>(
    directory: &D,
    queue: &Queue,
) -> Result<Vec<Slot>, StorageError> {
    let org = queue.organization_id.as_str();
    let mut slots = Vec::new();
    for entry in &queue.members {
        let weight = entry.weight.max(1);
        match entry.member {
            MemberRef::User(ref id) => {
                if directory.is_active_user(org, id)? {
                    slots.push(Slot {
                        user_id: id.clone(),
                        weight,
                    });
                }
            }
            MemberRef::Team(ref id) => {
                for user_id in directory.team_user_ids(org, id)? {
                    slots.push(Slot { user_id, weight });
                }
            }
        }
    }
    Ok(slots)
}

/// Number of cursor positions in one full rotation. None when the weights
/// do not fit in an i64.
pub fn cycle_len(strategy: Strategy, slots: &[Slot]) -> Option<i64> {
    match strategy {
        Strategy::Simple => i64::try_from(slots.len()).ok(),
        Strategy::Weighted => slots
            .iter()
            .try_fold(0i64, |total, slot| total.checked_add(slot.weight)),
    }
}

/// Number of cycle positions owned by a slot.
fn width(strategy: Strategy, slot: &Slot) -> i64 {
    match strategy {
        Strategy::Simple => 1,
        Strategy::Weighted => slot.weight,
    }
}

/// Picks the slot at `cursor` (reset to 0 when past the end of the cycle).
/// With `exclude` set and more than one distinct user available, moves on to
/// the start of the next slot owned by someone else. Returns the slot index
/// and the next cursor value.
pub fn choose(
    strategy: Strategy,
    slots: &[Slot],
    cursor: i64,
    exclude: Option<&str>,
) -> Option<(usize, i64)> {
    let len = cycle_len(strategy, slots)?;
    if len <= 0 {
        return None;
    }
    let position = if (0..len).contains(&cursor) { cursor } else { 0 };

    // Slot owning `position`, plus the position where that slot starts.
    let mut slot_start = 0;
    let mut idx = 0;
    for (i, slot) in slots.iter().enumerate() {
        let end = slot_start + width(strategy, slot);
        if position < end {
            idx = i;
            break;
        }
        slot_start = end;
    }

    let exclude = exclude.filter(|user| slots.iter().any(|s| s.user_id != *user));
    let Some(user) = exclude else {
        return Some((idx, (position + 1) % len));
    };
    if slots[idx].user_id != user {
        return Some((idx, (position + 1) % len));
    }

    let mut next_start = slot_start;
    for step in 1..slots.len() {
        let w = width(strategy, &slots[(idx + step - 1) % slots.len()]);
        let remaining = len - next_start;
        next_start = if w >= remaining {
            w - remaining
        } else {
            next_start + w
        };
        let candidate = (idx + step) % slots.len();
        if slots[candidate].user_id != user {
            return Some((candidate, (next_start + 1) % len));
        }
    }
    None
}

/// Picks the next user of a queue and persists the advanced cursor with a
/// compare-and-swap on the queue version.
pub fn next(
    storage: &dyn StorageBackend,
    org: &str,
    queue_id: &str,
    options: RotationOptions<'_>,
) -> Result<Pick, RotationError> {
    for attempt in 1..=CAS_ATTEMPTS {
        let queue = storage
            .get_queue(org, queue_id)?
            .ok_or_else(|| RotationError::QueueNotFound {
                queue_id: queue_id.to_string(),
            })?;

        let slots = resolve_slots(storage, &queue)?;
        if slots.is_empty() {
            return Err(RotationError::NoMembers {
                queue_id: queue_id.to_string(),
            });
        }

        if cycle_len(queue.strategy, &slots).is_none() {
            return Err(RotationError::WeightOverflow {
                queue_id: queue_id.to_string(),
            });
        }
        // A lone user stays eligible even when excluded.
        let (idx, cursor) = choose(queue.strategy, &slots, queue.cursor, options.exclude)
            .ok_or_else(|| RotationError::NoMembers {
                queue_id: queue_id.to_string(),
            })?;

        let delta = i64::from(options.count_distribution);
        if storage.advance_cursor(&queue.id, queue.version, cursor, delta)? {
            return Ok(Pick {
                queue_id: queue.id,
                user_id: slots[idx].user_id.clone(),
                cursor,
            });
        }
        debug!(queue_id, attempt, "queue cursor moved concurrently, retrying");
    }

    Err(RotationError::Contended {
        queue_id: queue_id.to_string(),
    })
}
