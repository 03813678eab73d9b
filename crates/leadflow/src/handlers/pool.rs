use axum::{
    extract::{Query, State},
    Json,
};

use crate::app::{self, AppState};
use crate::error::ApiResult;
use crate::scope::OrgScope;
use leadflow_models::*;

/// Leads assigned but not yet contacted, oldest assignment first.
pub async fn list_pool_leads(
    State(state): State<AppState>,
    scope: OrgScope,
    Query(query): Query<PoolLeadsQuery>,
) -> ApiResult<Json<Vec<Lead>>> {
    Ok(Json(state.storage.list_pool_leads(
        scope.id(),
        query.pipeline_id.as_deref(),
    )?))
}

pub async fn list_history(
    State(state): State<AppState>,
    scope: OrgScope,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<HistoryPage>> {
    Ok(Json(state.storage.list_pool_history(scope.id(), &query)?))
}

/// Runs a sweep for this organization now. 409 while another sweep holds
/// the lease.
pub async fn trigger_sweep(
    State(state): State<AppState>,
    scope: OrgScope,
) -> ApiResult<Json<SweepReport>> {
    let report = app::run_sweep(&state, Some(scope.id().to_string())).await?;
    tracing::info!(
        org = %scope.id(),
        redistributed = report.redistributed,
        skipped = report.skipped,
        "manual pool sweep"
    );
    Ok(Json(report))
}
