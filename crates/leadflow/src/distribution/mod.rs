//! Lead routing: rule matching, queue selection, rotation, assignment and
//! pool reclaim.

pub mod assignment;
pub mod matcher;
pub mod reclaim;
pub mod rotation;
pub mod selector;

use thiserror::Error;

use crate::storage::StorageError;

pub use assignment::{assign_lead, reassign_lead, touch_lead};
pub use reclaim::{run_exclusive_sweep, sweep, SweepScope};
pub use rotation::{Pick, RotationOptions};
pub use selector::{select_queue, Selection};

#[derive(Debug, Error)]
pub enum RotationError {
    #[error("queue {queue_id} not found")]
    QueueNotFound { queue_id: String },

    #[error("queue {queue_id} has no members configured")]
    NoMembers { queue_id: String },

    #[error("queue {queue_id} member weights overflow the rotation cycle")]
    WeightOverflow { queue_id: String },

    #[error("queue {queue_id} cursor kept changing under concurrent writers")]
    Contended { queue_id: String },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Error)]
pub enum DistributionError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("a pool sweep is already running")]
    SweepInProgress,

    #[error("pool sweep did not finish within {0:?}")]
    SweepTimedOut(std::time::Duration),

    #[error("pool sweep task failed: {0}")]
    SweepAborted(String),
}
