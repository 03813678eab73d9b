use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::Utc;

use crate::app::AppState;
use crate::distribution;
use crate::error::{ApiError, ApiResult};
use crate::scope::OrgScope;
use leadflow_models::*;

pub async fn list_leads(
    State(state): State<AppState>,
    scope: OrgScope,
    Query(filters): Query<LeadFilters>,
) -> ApiResult<Json<Vec<Lead>>> {
    Ok(Json(state.storage.list_leads(scope.id(), &filters)?))
}

pub async fn get_lead(
    State(state): State<AppState>,
    scope: OrgScope,
    Path((_org_id, id)): Path<(String, String)>,
) -> ApiResult<Json<Lead>> {
    state
        .storage
        .get_lead(scope.id(), &id)?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("lead"))
}

/// Re-runs routing for a lead left in manual triage. No-op for leads that
/// already have an owner.
pub async fn assign_lead(
    State(state): State<AppState>,
    scope: OrgScope,
    Path((_org_id, id)): Path<(String, String)>,
) -> ApiResult<Json<LeadWithAssignment>> {
    let assignment = distribution::assign_lead(
        state.storage.as_ref(),
        &state.events,
        &scope.0,
        &id,
        Utc::now(),
    )?;
    let lead = state
        .storage
        .get_lead(scope.id(), &id)?
        .ok_or_else(|| ApiError::not_found("lead"))?;
    Ok(Json(LeadWithAssignment { lead, assignment }))
}

pub async fn touch_lead(
    State(state): State<AppState>,
    scope: OrgScope,
    Path((_org_id, id)): Path<(String, String)>,
) -> ApiResult<Json<Lead>> {
    let lead = distribution::touch_lead(
        state.storage.as_ref(),
        &state.events,
        scope.id(),
        &id,
        Utc::now(),
    )?;
    Ok(Json(lead))
}

pub async fn reassign_lead(
    State(state): State<AppState>,
    scope: OrgScope,
    Path((_org_id, id)): Path<(String, String)>,
    Json(input): Json<ReassignLead>,
) -> ApiResult<Json<PoolHistoryEntry>> {
    let entry = distribution::reassign_lead(
        state.storage.as_ref(),
        &state.events,
        scope.id(),
        &id,
        &input.user_id,
        Utc::now(),
    )?;
    Ok(Json(entry))
}
