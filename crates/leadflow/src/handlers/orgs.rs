use axum::{extract::State, http::StatusCode, Json};

use crate::app::AppState;
use crate::error::{ApiError, ApiResult};
use crate::scope::OrgScope;
use leadflow_models::*;

pub async fn create_organization(
    State(state): State<AppState>,
    Json(input): Json<CreateOrganization>,
) -> ApiResult<(StatusCode, Json<Organization>)> {
    let org = state.storage.create_organization(&input)?;
    tracing::info!(org = %org.id, name = %org.name, "organization created");
    Ok((StatusCode::CREATED, Json(org)))
}

pub async fn get_organization(scope: OrgScope) -> Json<Organization> {
    Json(scope.0)
}

pub async fn update_organization(
    State(state): State<AppState>,
    scope: OrgScope,
    Json(input): Json<UpdateOrganization>,
) -> ApiResult<Json<Organization>> {
    state
        .storage
        .update_organization(scope.id(), &input)?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("organization"))
}
