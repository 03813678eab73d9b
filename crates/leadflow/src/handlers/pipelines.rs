use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use crate::app::AppState;
use crate::error::{ApiError, ApiResult};
use crate::scope::OrgScope;
use leadflow_models::*;

pub async fn list_pipelines(
    State(state): State<AppState>,
    scope: OrgScope,
) -> ApiResult<Json<Vec<Pipeline>>> {
    Ok(Json(state.storage.list_pipelines(scope.id())?))
}

pub async fn create_pipeline(
    State(state): State<AppState>,
    scope: OrgScope,
    Json(input): Json<CreatePipeline>,
) -> ApiResult<(StatusCode, Json<Pipeline>)> {
    let pipeline = state.storage.create_pipeline(scope.id(), &input)?;
    Ok((StatusCode::CREATED, Json(pipeline)))
}

pub async fn get_pipeline(
    State(state): State<AppState>,
    scope: OrgScope,
    Path((_org_id, id)): Path<(String, String)>,
) -> ApiResult<Json<Pipeline>> {
    state
        .storage
        .get_pipeline(scope.id(), &id)?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("pipeline"))
}

pub async fn set_default_pipeline(
    State(state): State<AppState>,
    scope: OrgScope,
    Path((_org_id, id)): Path<(String, String)>,
) -> ApiResult<Json<Pipeline>> {
    state
        .storage
        .set_default_pipeline(scope.id(), &id)?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("pipeline"))
}

pub async fn get_pool_settings(
    State(state): State<AppState>,
    scope: OrgScope,
    Path((_org_id, id)): Path<(String, String)>,
) -> ApiResult<Json<PoolSettings>> {
    state
        .storage
        .get_pipeline(scope.id(), &id)?
        .map(|p| Json(p.pool))
        .ok_or_else(|| ApiError::not_found("pipeline"))
}

/// Out-of-range values are clamped, not rejected.
pub async fn update_pool_settings(
    State(state): State<AppState>,
    scope: OrgScope,
    Path((_org_id, id)): Path<(String, String)>,
    Json(input): Json<PoolSettings>,
) -> ApiResult<Json<PoolSettings>> {
    let pipeline = state
        .storage
        .update_pool_settings(scope.id(), &id, &input)?
        .ok_or_else(|| ApiError::not_found("pipeline"))?;
    tracing::info!(
        org = %scope.id(),
        pipeline_id = %id,
        enabled = pipeline.pool.enabled,
        timeout_minutes = pipeline.pool.timeout_minutes,
        max_redistributions = pipeline.pool.max_redistributions,
        "pool settings updated"
    );
    Ok(Json(pipeline.pool))
}

pub async fn set_fallback_queue(
    State(state): State<AppState>,
    scope: OrgScope,
    Path((_org_id, id)): Path<(String, String)>,
    Json(input): Json<SetFallbackQueue>,
) -> ApiResult<Json<Pipeline>> {
    state
        .storage
        .set_fallback_queue(scope.id(), &id, input.queue_id.as_deref())?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("pipeline"))
}
