use chrono::{DateTime, Utc};
use leadflow_models::*;
use tracing::{info, warn};

use super::rotation::{self, RotationOptions};
use super::{matcher, selector, DistributionError, RotationError};
use crate::events::{self, Event, EventBus};
use crate::storage::{AssignmentWrite, StorageBackend, StorageError};

fn unassigned(reason: impl Into<String>) -> AssignmentOutcome {
    AssignmentOutcome::Unassigned {
        reason: reason.into(),
    }
}

/// Routes one lead to a user. Leads that already have an owner are left
/// untouched. A lead that cannot be routed stays unassigned for manual
/// triage; only storage failures are returned as errors.
pub fn assign_lead(
    storage: &dyn StorageBackend,
    events: &EventBus,
    org: &Organization,
    lead_id: &str,
    now: DateTime<Utc>,
) -> Result<AssignmentOutcome, DistributionError> {
    let mut lead = storage
        .get_lead(&org.id, lead_id)?
        .ok_or_else(|| StorageError::not_found("lead", lead_id))?;

    if let Some(user_id) = lead.assigned_user_id.clone() {
        return Ok(AssignmentOutcome::AlreadyAssigned { user_id });
    }

    // A lead whose pipeline disappeared is routed through the default.
    let pipeline = match lead.pipeline_id {
        Some(ref id) => match storage.get_pipeline(&org.id, id)? {
            Some(p) => Some(p),
            None => storage.default_pipeline(&org.id)?,
        },
        None => storage.default_pipeline(&org.id)?,
    };
    let Some(pipeline) = pipeline else {
        warn!(org = %org.id, lead_id, "no pipeline for lead, leaving unassigned");
        return Ok(unassigned("organization has no default pipeline"));
    };
    lead.pipeline_id = Some(pipeline.id.clone());

    let rules = storage.list_rules(&org.id)?;
    let queues = storage.list_queues(&org.id)?;
    let arrival = parse_timestamp(&lead.created_at).unwrap_or(now);
    let local_arrival = matcher::local_time(arrival, org.utc_offset_minutes);

    let Some(selection) = selector::select_queue(
        &lead,
        local_arrival,
        &rules,
        &queues,
        pipeline.fallback_queue_id.as_deref(),
    ) else {
        info!(org = %org.id, lead_id, "no rule or fallback queue matched, manual triage");
        return Ok(unassigned("no matching rule or fallback queue"));
    };

    let options = RotationOptions {
        exclude: None,
        count_distribution: true,
    };
    let pick = match rotation::next(storage, &org.id, &selection.queue_id, options) {
        Ok(pick) => pick,
        Err(RotationError::Storage(e)) => return Err(e.into()),
        Err(e) => {
            warn!(org = %org.id, lead_id, queue_id = %selection.queue_id, error = %e, "rotation failed, leaving lead unassigned");
            return Ok(unassigned(e.to_string()));
        }
    };

    let write = AssignmentWrite {
        lead_id,
        user_id: &pick.user_id,
        queue_id: &pick.queue_id,
        pipeline_id: &pipeline.id,
        stage_id: pipeline.first_stage().map(|s| s.id.as_str()),
        assigned_at: now,
    };
    if !storage.record_assignment(&org.id, &write)? {
        // A concurrent invocation assigned it first.
        let current = storage
            .get_lead(&org.id, lead_id)?
            .and_then(|l| l.assigned_user_id);
        return Ok(match current {
            Some(user_id) => AssignmentOutcome::AlreadyAssigned { user_id },
            None => unassigned("lead changed during assignment"),
        });
    }

    info!(org = %org.id, lead_id, user_id = %pick.user_id, queue_id = %pick.queue_id, "lead assigned");
    events.emit(Event::lead(
        events::LEAD_ASSIGNED,
        &org.id,
        lead_id,
        Some(&pick.user_id),
        serde_json::json!({
            "queue_id": pick.queue_id,
            "rule_id": selection.rule_id,
            "pipeline_id": pipeline.id,
        }),
        now,
    ));

    Ok(AssignmentOutcome::Assigned {
        user_id: pick.user_id,
        queue_id: pick.queue_id,
        rule_id: selection.rule_id,
    })
}

/// Manual override of a lead's owner. Appends a `manual` history entry and
/// leaves the redistribution count alone.
pub fn reassign_lead(
    storage: &dyn StorageBackend,
    events: &EventBus,
    org: &str,
    lead_id: &str,
    to_user_id: &str,
    now: DateTime<Utc>,
) -> Result<PoolHistoryEntry, DistributionError> {
    let entry = storage
        .record_manual_reassignment(org, lead_id, to_user_id, now)?
        .ok_or_else(|| StorageError::not_found("lead", lead_id))?;

    info!(org, lead_id, from = ?entry.from_user_id, to = to_user_id, "lead reassigned manually");
    events.emit(Event::lead(
        events::LEAD_REASSIGNED,
        org,
        lead_id,
        Some(to_user_id),
        serde_json::json!({
            "from_user_id": entry.from_user_id,
            "reason": entry.reason,
        }),
        now,
    ));
    Ok(entry)
}

/// Records the first agent contact. Later touches keep the original time.
pub fn touch_lead(
    storage: &dyn StorageBackend,
    events: &EventBus,
    org: &str,
    lead_id: &str,
    now: DateTime<Utc>,
) -> Result<Lead, DistributionError> {
    let before = storage
        .get_lead(org, lead_id)?
        .ok_or_else(|| StorageError::not_found("lead", lead_id))?;
    let lead = storage
        .record_first_touch(org, lead_id, now)?
        .ok_or_else(|| StorageError::not_found("lead", lead_id))?;

    if before.first_touch_at.is_none() {
        events.emit(Event::lead(
            events::LEAD_TOUCHED,
            org,
            lead_id,
            lead.assigned_user_id.as_deref(),
            serde_json::json!({ "first_touch_at": lead.first_touch_at }),
            now,
        ));
    }
    Ok(lead)
}
