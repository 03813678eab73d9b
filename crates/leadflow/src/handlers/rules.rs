use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use crate::app::AppState;
use crate::error::{ApiError, ApiResult};
use crate::scope::OrgScope;
use leadflow_models::*;

/// Rules in evaluation order.
pub async fn list_rules(
    State(state): State<AppState>,
    scope: OrgScope,
) -> ApiResult<Json<Vec<Rule>>> {
    Ok(Json(state.storage.list_rules(scope.id())?))
}

pub async fn create_rule(
    State(state): State<AppState>,
    scope: OrgScope,
    Json(input): Json<CreateRule>,
) -> ApiResult<(StatusCode, Json<Rule>)> {
    let rule = state.storage.create_rule(scope.id(), &input)?;
    Ok((StatusCode::CREATED, Json(rule)))
}

pub async fn get_rule(
    State(state): State<AppState>,
    scope: OrgScope,
    Path((_org_id, id)): Path<(String, String)>,
) -> ApiResult<Json<Rule>> {
    state
        .storage
        .get_rule(scope.id(), &id)?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("rule"))
}

pub async fn update_rule(
    State(state): State<AppState>,
    scope: OrgScope,
    Path((_org_id, id)): Path<(String, String)>,
    Json(input): Json<UpdateRule>,
) -> ApiResult<Json<Rule>> {
    state
        .storage
        .update_rule(scope.id(), &id, &input)?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("rule"))
}

pub async fn delete_rule(
    State(state): State<AppState>,
    scope: OrgScope,
    Path((_org_id, id)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    if state.storage.delete_rule(scope.id(), &id)? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found("rule"))
    }
}

pub async fn reorder_rules(
    State(state): State<AppState>,
    scope: OrgScope,
    Json(input): Json<ReorderRules>,
) -> ApiResult<Json<Vec<Rule>>> {
    Ok(Json(
        state.storage.reorder_rules(scope.id(), &input.rule_ids)?,
    ))
}
