use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use crate::app::AppState;
use crate::error::{ApiError, ApiResult};
use crate::scope::OrgScope;
use leadflow_models::*;

// --- Users ---

pub async fn list_users(
    State(state): State<AppState>,
    scope: OrgScope,
) -> ApiResult<Json<Vec<User>>> {
    Ok(Json(state.storage.list_users(scope.id())?))
}

pub async fn create_user(
    State(state): State<AppState>,
    scope: OrgScope,
    Json(input): Json<CreateUser>,
) -> ApiResult<(StatusCode, Json<User>)> {
    let user = state.storage.create_user(scope.id(), &input)?;
    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn update_user(
    State(state): State<AppState>,
    scope: OrgScope,
    Path((_org_id, id)): Path<(String, String)>,
    Json(input): Json<UpdateUser>,
) -> ApiResult<Json<User>> {
    let user = state
        .storage
        .update_user(scope.id(), &id, &input)?
        .ok_or_else(|| ApiError::not_found("user"))?;
    if input.is_active == Some(false) {
        tracing::info!(org = %scope.id(), user_id = %id, "user deactivated, dropped from rotations");
    }
    Ok(Json(user))
}

// --- Teams ---

pub async fn list_teams(
    State(state): State<AppState>,
    scope: OrgScope,
) -> ApiResult<Json<Vec<Team>>> {
    Ok(Json(state.storage.list_teams(scope.id())?))
}

pub async fn create_team(
    State(state): State<AppState>,
    scope: OrgScope,
    Json(input): Json<CreateTeam>,
) -> ApiResult<(StatusCode, Json<Team>)> {
    let team = state.storage.create_team(scope.id(), &input)?;
    Ok((StatusCode::CREATED, Json(team)))
}

pub async fn add_team_member(
    State(state): State<AppState>,
    scope: OrgScope,
    Path((_org_id, id)): Path<(String, String)>,
    Json(input): Json<AddTeamMember>,
) -> ApiResult<Json<Team>> {
    let team = state
        .storage
        .add_team_member(scope.id(), &id, &input.user_id)?;
    Ok(Json(team))
}

pub async fn remove_team_member(
    State(state): State<AppState>,
    scope: OrgScope,
    Path((_org_id, id, user_id)): Path<(String, String, String)>,
) -> ApiResult<StatusCode> {
    if state
        .storage
        .remove_team_member(scope.id(), &id, &user_id)?
    {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found("team member"))
    }
}
