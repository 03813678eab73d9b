//! Every way a lead enters the system: manual entry, bulk import and
//! per-integration webhooks. All of them persist the lead first and then run
//! the same assignment path; a failed assignment never fails the intake.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;

use crate::app::AppState;
use crate::distribution;
use crate::error::{ApiError, ApiResult};
use crate::events::{self, Event};
use crate::scope::OrgScope;
use leadflow_models::*;

fn ingest(state: &AppState, org: &Organization, input: &LeadEvent) -> ApiResult<LeadWithAssignment> {
    let now = Utc::now();
    let lead = state.storage.create_lead(&org.id, input, now)?;
    state.events.emit(Event::lead(
        events::LEAD_CREATED,
        &org.id,
        &lead.id,
        None,
        serde_json::json!({ "source": lead.source, "pipeline_id": lead.pipeline_id }),
        now,
    ));

    let assignment =
        match distribution::assign_lead(state.storage.as_ref(), &state.events, org, &lead.id, now) {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(org = %org.id, lead_id = %lead.id, error = %e, "assignment failed after intake");
                AssignmentOutcome::Unassigned {
                    reason: format!("assignment failed: {e}"),
                }
            }
        };

    let lead = match state.storage.get_lead(&org.id, &lead.id) {
        Ok(Some(current)) => current,
        _ => lead,
    };
    Ok(LeadWithAssignment { lead, assignment })
}

pub async fn create_lead(
    State(state): State<AppState>,
    scope: OrgScope,
    Json(input): Json<LeadEvent>,
) -> ApiResult<(StatusCode, Json<LeadWithAssignment>)> {
    let result = ingest(&state, &scope.0, &input)?;
    Ok((StatusCode::CREATED, Json(result)))
}

/// Validates the whole batch before creating anything.
pub async fn import_leads(
    State(state): State<AppState>,
    scope: OrgScope,
    Json(input): Json<Vec<LeadEvent>>,
) -> ApiResult<Json<ImportResult>> {
    for (idx, event) in input.iter().enumerate() {
        event
            .validate()
            .map_err(|e| ApiError::Unprocessable(format!("lead {idx}: {e}")))?;
    }

    let mut results = Vec::with_capacity(input.len());
    for event in &input {
        results.push(ingest(&state, &scope.0, event)?);
    }
    let assigned = results
        .iter()
        .filter(|r| r.assignment.assigned_user().is_some())
        .count();
    tracing::info!(org = %scope.id(), created = results.len(), assigned, "leads imported");

    Ok(Json(ImportResult {
        created: results.len(),
        assigned,
        results,
    }))
}

/// Inbound webhook of an external lead source. The integration name stands
/// in for `source` when the payload has none.
pub async fn receive_webhook(
    State(state): State<AppState>,
    scope: OrgScope,
    Path((_org_id, integration)): Path<(String, String)>,
    body: axum::body::Bytes,
) -> ApiResult<Json<LeadWithAssignment>> {
    let mut event: LeadEvent = serde_json::from_slice(&body)
        .map_err(|e| ApiError::Unprocessable(format!("invalid lead payload: {e}")))?;
    if event.source.as_deref().is_none_or(|s| s.trim().is_empty()) {
        event.source = Some(integration.clone());
    }

    let result = ingest(&state, &scope.0, &event)?;
    tracing::info!(
        org = %scope.id(),
        integration = %integration,
        lead_id = %result.lead.id,
        "webhook lead received"
    );
    Ok(Json(result))
}
