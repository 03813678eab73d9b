use chrono::{DateTime, Duration, Utc};
use leadflow_models::{Lead, Pipeline, Queue, SweepReport};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::rotation::{self, RotationOptions};
use super::{DistributionError, RotationError};
use crate::events::{self, Event, EventBus};
use crate::storage::{RedistributionClaim, StorageBackend};

/// Lease shared by every sweep trigger, scheduled or manual.
pub const SWEEP_LEASE: &str = "pool-sweep";

#[derive(Debug, Clone, Copy)]
pub enum SweepScope<'a> {
    All,
    Organization(&'a str),
}

impl SweepScope<'_> {
    fn organization(&self) -> Option<&str> {
        match self {
            SweepScope::All => None,
            SweepScope::Organization(org) => Some(*org),
        }
    }
}

enum Outcome {
    Redistributed,
    Skipped,
}

fn active_queue(
    storage: &dyn StorageBackend,
    org: &str,
    id: Option<&str>,
) -> Result<Option<Queue>, DistributionError> {
    let Some(id) = id else {
        return Ok(None);
    };
    Ok(storage.get_queue(org, id)?.filter(|q| q.is_active))
}

fn reclaim_lead(
    storage: &dyn StorageBackend,
    events: &EventBus,
    pipeline: &Pipeline,
    lead: &Lead,
    now: DateTime<Utc>,
) -> Result<Outcome, DistributionError> {
    let org = pipeline.organization_id.as_str();
    let Some(from_user_id) = lead.assigned_user_id.as_deref() else {
        return Ok(Outcome::Skipped);
    };

    // The cursor only moves for leads that are still claimable.
    let still_due = storage.get_lead(org, &lead.id)?.is_some_and(|current| {
        current.assigned_user_id == lead.assigned_user_id
            && current.redistribution_count == lead.redistribution_count
            && current.first_touch_at.is_none()
    });
    if !still_due {
        debug!(org, lead_id = %lead.id, "lead changed since scan, skipping");
        return Ok(Outcome::Skipped);
    }

    let queue = match active_queue(storage, org, lead.queue_id.as_deref())? {
        Some(q) => Some(q),
        None => active_queue(storage, org, pipeline.fallback_queue_id.as_deref())?,
    };
    let Some(queue) = queue else {
        warn!(org, lead_id = %lead.id, "no active queue to redistribute from, skipping");
        return Ok(Outcome::Skipped);
    };

    let options = RotationOptions {
        exclude: Some(from_user_id),
        count_distribution: false,
    };
    let pick = match rotation::next(storage, org, &queue.id, options) {
        Ok(pick) => pick,
        Err(RotationError::Storage(e)) => return Err(e.into()),
        Err(e) => {
            warn!(org, lead_id = %lead.id, queue_id = %queue.id, error = %e, "rotation failed, skipping lead");
            return Ok(Outcome::Skipped);
        }
    };

    let claim = RedistributionClaim {
        organization_id: org,
        lead_id: &lead.id,
        from_user_id,
        expected_count: lead.redistribution_count,
        to_user_id: &pick.user_id,
        queue_id: &pick.queue_id,
        at: now,
    };
    let Some(entry) = storage.record_redistribution(&claim)? else {
        debug!(org, lead_id = %lead.id, "lead claimed concurrently, skipping");
        return Ok(Outcome::Skipped);
    };

    let count = lead.redistribution_count + 1;
    info!(
        org,
        lead_id = %lead.id,
        from = from_user_id,
        to = %pick.user_id,
        redistribution_count = count,
        "lead redistributed"
    );
    events.emit(Event::lead(
        events::LEAD_REDISTRIBUTED,
        org,
        &lead.id,
        Some(&pick.user_id),
        serde_json::json!({
            "from_user_id": from_user_id,
            "queue_id": pick.queue_id,
            "reason": entry.reason,
            "redistribution_count": count,
            "max_redistributions": pipeline.pool.max_redistributions,
        }),
        now,
    ));
    Ok(Outcome::Redistributed)
}

/// Reassigns in-pool leads whose timeout has elapsed, on every pool-enabled
/// pipeline in scope. A lead is due when `assigned_at <= now - timeout`, it
/// has not been touched, and it is still under the redistribution cap.
/// At most `batch_limit` leads per pipeline are handled in one pass.
pub fn sweep(
    storage: &dyn StorageBackend,
    events: &EventBus,
    scope: SweepScope<'_>,
    now: DateTime<Utc>,
    batch_limit: i64,
) -> Result<SweepReport, DistributionError> {
    let mut report = SweepReport::default();

    for pipeline in storage.list_pool_enabled_pipelines(scope.organization())? {
        let cutoff = now - Duration::minutes(pipeline.pool.timeout_minutes);
        let due = storage.list_reclaimable_leads(
            &pipeline.id,
            cutoff,
            pipeline.pool.max_redistributions,
            batch_limit,
        )?;
        if due.is_empty() {
            continue;
        }
        debug!(pipeline_id = %pipeline.id, due = due.len(), "sweeping pipeline");

        for lead in &due {
            match reclaim_lead(storage, events, &pipeline, lead, now)? {
                Outcome::Redistributed => report.redistributed += 1,
                Outcome::Skipped => report.skipped += 1,
            }
        }
    }

    Ok(report)
}

/// Runs `sweep` while holding the sweep lease. Fails with
/// `SweepInProgress` when another sweep holds it.
pub fn run_exclusive_sweep(
    storage: &dyn StorageBackend,
    events: &EventBus,
    scope: SweepScope<'_>,
    now: DateTime<Utc>,
    batch_limit: i64,
    lease_secs: i64,
) -> Result<SweepReport, DistributionError> {
    let holder = Uuid::new_v4().to_string();
    if !storage.try_acquire_lease(SWEEP_LEASE, &holder, now, lease_secs)? {
        return Err(DistributionError::SweepInProgress);
    }

    let result = sweep(storage, events, scope, now, batch_limit);
    if let Err(e) = storage.release_lease(SWEEP_LEASE, &holder) {
        warn!(error = %e, "failed to release sweep lease");
    }

    if let Ok(ref report) = result {
        if report.redistributed > 0 || report.skipped > 0 {
            info!(
                redistributed = report.redistributed,
                skipped = report.skipped,
                "pool sweep finished"
            );
        }
    }
    result
}
