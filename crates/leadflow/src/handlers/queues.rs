use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use crate::app::AppState;
use crate::error::{ApiError, ApiResult};
use crate::scope::OrgScope;
use leadflow_models::*;

pub async fn list_queues(
    State(state): State<AppState>,
    scope: OrgScope,
) -> ApiResult<Json<Vec<Queue>>> {
    Ok(Json(state.storage.list_queues(scope.id())?))
}

pub async fn create_queue(
    State(state): State<AppState>,
    scope: OrgScope,
    Json(input): Json<CreateQueue>,
) -> ApiResult<(StatusCode, Json<Queue>)> {
    let queue = state.storage.create_queue(scope.id(), &input)?;
    Ok((StatusCode::CREATED, Json(queue)))
}

pub async fn get_queue(
    State(state): State<AppState>,
    scope: OrgScope,
    Path((_org_id, id)): Path<(String, String)>,
) -> ApiResult<Json<Queue>> {
    state
        .storage
        .get_queue(scope.id(), &id)?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("queue"))
}

pub async fn update_queue(
    State(state): State<AppState>,
    scope: OrgScope,
    Path((_org_id, id)): Path<(String, String)>,
    Json(input): Json<UpdateQueue>,
) -> ApiResult<Json<Queue>> {
    state
        .storage
        .update_queue(scope.id(), &id, &input)?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("queue"))
}

/// Refused with 409 while an active rule or a pipeline fallback points at
/// the queue. Inactive rules go with it.
pub async fn delete_queue(
    State(state): State<AppState>,
    scope: OrgScope,
    Path((_org_id, id)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    if state.storage.delete_queue(scope.id(), &id)? {
        tracing::info!(org = %scope.id(), queue_id = %id, "queue deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found("queue"))
    }
}

pub async fn add_member(
    State(state): State<AppState>,
    scope: OrgScope,
    Path((_org_id, id)): Path<(String, String)>,
    Json(input): Json<AddMember>,
) -> ApiResult<(StatusCode, Json<QueueMember>)> {
    let member = state.storage.add_queue_member(scope.id(), &id, &input)?;
    Ok((StatusCode::CREATED, Json(member)))
}

pub async fn remove_member(
    State(state): State<AppState>,
    scope: OrgScope,
    Path((_org_id, id, member_id)): Path<(String, String, String)>,
) -> ApiResult<StatusCode> {
    if state
        .storage
        .remove_queue_member(scope.id(), &id, &member_id)?
    {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found("queue member"))
    }
}
