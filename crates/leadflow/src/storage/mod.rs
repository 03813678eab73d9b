pub mod sqlite;

use chrono::{DateTime, Utc};
use leadflow_models::*;
use thiserror::Error;

/// Error type for storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The write would break a referential or state constraint.
    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Invalid(String),
}

impl StorageError {
    pub fn not_found(entity: &'static str, id: &str) -> Self {
        StorageError::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

impl From<ValidationError> for StorageError {
    fn from(e: ValidationError) -> Self {
        StorageError::Invalid(e.0)
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Fields written when a lead receives its first assignment.
#[derive(Debug, Clone)]
pub struct AssignmentWrite<'a> {
    pub lead_id: &'a str,
    pub user_id: &'a str,
    pub queue_id: &'a str,
    pub pipeline_id: &'a str,
    /// Only applied when the lead has no stage yet.
    pub stage_id: Option<&'a str>,
    pub assigned_at: DateTime<Utc>,
}

/// A timeout reclaim, applied only if the lead is still exactly as the sweep saw it.
#[derive(Debug, Clone)]
pub struct RedistributionClaim<'a> {
    pub organization_id: &'a str,
    pub lead_id: &'a str,
    pub from_user_id: &'a str,
    pub expected_count: i64,
    pub to_user_id: &'a str,
    pub queue_id: &'a str,
    pub at: DateTime<Utc>,
}

// --- Storage Traits ---
// Each trait covers a domain. Organization-scoped methods take `org` first;
// rows of other organizations are invisible to them.

pub trait OrganizationStore: Send + Sync {
    fn create_organization(&self, input: &CreateOrganization) -> Result<Organization>;
    fn get_organization(&self, org: &str) -> Result<Option<Organization>>;
    fn update_organization(
        &self,
        org: &str,
        input: &UpdateOrganization,
    ) -> Result<Option<Organization>>;
}

/// Users and teams. Doubles as the team-membership lookup used by rotation.
pub trait DirectoryStore: Send + Sync {
    fn create_user(&self, org: &str, input: &CreateUser) -> Result<User>;
    fn get_user(&self, org: &str, id: &str) -> Result<Option<User>>;
    fn list_users(&self, org: &str) -> Result<Vec<User>>;
    fn update_user(&self, org: &str, id: &str, input: &UpdateUser) -> Result<Option<User>>;
    fn create_team(&self, org: &str, input: &CreateTeam) -> Result<Team>;
    fn get_team(&self, org: &str, id: &str) -> Result<Option<Team>>;
    fn list_teams(&self, org: &str) -> Result<Vec<Team>>;
    fn add_team_member(&self, org: &str, team_id: &str, user_id: &str) -> Result<Team>;
    fn remove_team_member(&self, org: &str, team_id: &str, user_id: &str) -> Result<bool>;
    /// Active users of a team, in join order.
    fn team_user_ids(&self, org: &str, team_id: &str) -> Result<Vec<String>>;
    fn is_active_user(&self, org: &str, user_id: &str) -> Result<bool>;
}

pub trait PipelineStore: Send + Sync {
    fn create_pipeline(&self, org: &str, input: &CreatePipeline) -> Result<Pipeline>;
    fn get_pipeline(&self, org: &str, id: &str) -> Result<Option<Pipeline>>;
    fn list_pipelines(&self, org: &str) -> Result<Vec<Pipeline>>;
    fn default_pipeline(&self, org: &str) -> Result<Option<Pipeline>>;
    fn set_default_pipeline(&self, org: &str, id: &str) -> Result<Option<Pipeline>>;
    /// Stores the settings clamped to their allowed ranges.
    fn update_pool_settings(
        &self,
        org: &str,
        id: &str,
        settings: &PoolSettings,
    ) -> Result<Option<Pipeline>>;
    fn set_fallback_queue(
        &self,
        org: &str,
        id: &str,
        queue_id: Option<&str>,
    ) -> Result<Option<Pipeline>>;
    /// Pipelines with the pool enabled, across all organizations when `org` is None.
    fn list_pool_enabled_pipelines(&self, org: Option<&str>) -> Result<Vec<Pipeline>>;
}

pub trait QueueStore: Send + Sync {
    fn create_queue(&self, org: &str, input: &CreateQueue) -> Result<Queue>;
    fn get_queue(&self, org: &str, id: &str) -> Result<Option<Queue>>;
    fn list_queues(&self, org: &str) -> Result<Vec<Queue>>;
    fn update_queue(&self, org: &str, id: &str, input: &UpdateQueue) -> Result<Option<Queue>>;
    /// Refused with `Conflict` while an active rule or a pipeline fallback references the queue.
    fn delete_queue(&self, org: &str, id: &str) -> Result<bool>;
    fn add_queue_member(&self, org: &str, queue_id: &str, input: &AddMember)
        -> Result<QueueMember>;
    fn remove_queue_member(&self, org: &str, queue_id: &str, member_id: &str) -> Result<bool>;
    /// Compare-and-swap on the queue version. Returns false when another
    /// writer got there first.
    fn advance_cursor(
        &self,
        queue_id: &str,
        expected_version: i64,
        new_cursor: i64,
        distributed_delta: i64,
    ) -> Result<bool>;
}

pub trait RuleStore: Send + Sync {
    fn create_rule(&self, org: &str, input: &CreateRule) -> Result<Rule>;
    fn get_rule(&self, org: &str, id: &str) -> Result<Option<Rule>>;
    /// All rules of the organization ordered by (priority, insertion order).
    fn list_rules(&self, org: &str) -> Result<Vec<Rule>>;
    fn update_rule(&self, org: &str, id: &str, input: &UpdateRule) -> Result<Option<Rule>>;
    fn delete_rule(&self, org: &str, id: &str) -> Result<bool>;
    /// Priorities become 1..=n in the given order.
    fn reorder_rules(&self, org: &str, rule_ids: &[String]) -> Result<Vec<Rule>>;
}

pub trait LeadStore: Send + Sync {
    fn create_lead(
        &self,
        org: &str,
        input: &LeadEvent,
        received_at: DateTime<Utc>,
    ) -> Result<Lead>;
    fn get_lead(&self, org: &str, id: &str) -> Result<Option<Lead>>;
    fn list_leads(&self, org: &str, filters: &LeadFilters) -> Result<Vec<Lead>>;
    /// Applies only while the lead is unassigned; false means someone else won.
    fn record_assignment(&self, org: &str, write: &AssignmentWrite<'_>) -> Result<bool>;
    fn record_first_touch(
        &self,
        org: &str,
        lead_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<Lead>>;
    /// In-pool leads of a pipeline with `assigned_at <= cutoff` and
    /// `redistribution_count < max_redistributions`, oldest first.
    fn list_reclaimable_leads(
        &self,
        pipeline_id: &str,
        cutoff: DateTime<Utc>,
        max_redistributions: i64,
        limit: i64,
    ) -> Result<Vec<Lead>>;
    /// Claim-row update plus history append in one transaction. Returns the
    /// history entry, or None when the lead changed since it was scanned.
    fn record_redistribution(
        &self,
        claim: &RedistributionClaim<'_>,
    ) -> Result<Option<PoolHistoryEntry>>;
    fn record_manual_reassignment(
        &self,
        org: &str,
        lead_id: &str,
        to_user_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<PoolHistoryEntry>>;
    fn list_pool_leads(&self, org: &str, pipeline_id: Option<&str>) -> Result<Vec<Lead>>;
    fn list_pool_history(&self, org: &str, query: &HistoryQuery) -> Result<HistoryPage>;
}

pub trait SweepLeaseStore: Send + Sync {
    /// Takes the named lease if it is free or expired.
    fn try_acquire_lease(
        &self,
        name: &str,
        holder: &str,
        now: DateTime<Utc>,
        ttl_secs: i64,
    ) -> Result<bool>;
    fn release_lease(&self, name: &str, holder: &str) -> Result<()>;
}

/// Super-trait combining all domain stores.
pub trait StorageBackend:
    OrganizationStore
    + DirectoryStore
    + PipelineStore
    + QueueStore
    + RuleStore
    + LeadStore
    + SweepLeaseStore
{
    /// Like get_organization, but a missing organization is an error.
    fn require_organization(&self, org: &str) -> Result<Organization> {
        self.get_organization(org)?
            .ok_or_else(|| StorageError::not_found("organization", org))
    }
}
