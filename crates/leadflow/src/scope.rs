use async_trait::async_trait;
use axum::extract::{FromRequestParts, Path};
use axum::http::request::Parts;
use std::collections::HashMap;

use crate::app::AppState;
use crate::error::ApiError;
use leadflow_models::Organization;

/// The organization named by the `:org_id` path segment. Every
/// organization-scoped handler takes one; unknown organizations are a 404
/// before the handler runs.
#[derive(Debug, Clone)]
pub struct OrgScope(pub Organization);

impl OrgScope {
    pub fn id(&self) -> &str {
        &self.0.id
    }
}

#[async_trait]
impl FromRequestParts<AppState> for OrgScope {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Path(params) = Path::<HashMap<String, String>>::from_request_parts(parts, state)
            .await
            .map_err(|_| ApiError::not_found("organization"))?;
        let org_id = params
            .get("org_id")
            .ok_or_else(|| ApiError::not_found("organization"))?;

        let org = state
            .storage
            .get_organization(org_id)?
            .ok_or_else(|| ApiError::not_found("organization"))?;
        Ok(OrgScope(org))
    }
}
