use chrono::{DateTime, Utc};
use leadflow_models::*;
use rusqlite::Connection;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::db_ops;
use crate::storage::*;

/// SQLite-backed storage implementation.
/// Wraps a `Mutex<Connection>` and delegates to the `db_ops` functions.
pub struct SqliteBackend {
    pub conn: Arc<Mutex<Connection>>,
}

impl SqliteBackend {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        // A panic mid-statement leaves nothing half-applied outside a
        // transaction, so the connection stays usable.
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl OrganizationStore for SqliteBackend {
    fn create_organization(&self, input: &CreateOrganization) -> Result<Organization> {
        db_ops::create_organization(&self.lock(), input)
    }
    fn get_organization(&self, org: &str) -> Result<Option<Organization>> {
        db_ops::get_organization(&self.lock(), org)
    }
    fn update_organization(
        &self,
        org: &str,
        input: &UpdateOrganization,
    ) -> Result<Option<Organization>> {
        db_ops::update_organization(&self.lock(), org, input)
    }
}

impl DirectoryStore for SqliteBackend {
    fn create_user(&self, org: &str, input: &CreateUser) -> Result<User> {
        db_ops::create_user(&self.lock(), org, input)
    }
    fn get_user(&self, org: &str, id: &str) -> Result<Option<User>> {
        db_ops::get_user(&self.lock(), org, id)
    }
    fn list_users(&self, org: &str) -> Result<Vec<User>> {
        db_ops::list_users(&self.lock(), org)
    }
    fn update_user(&self, org: &str, id: &str, input: &UpdateUser) -> Result<Option<User>> {
        db_ops::update_user(&self.lock(), org, id, input)
    }
    fn create_team(&self, org: &str, input: &CreateTeam) -> Result<Team> {
        db_ops::create_team(&self.lock(), org, input)
    }
    fn get_team(&self, org: &str, id: &str) -> Result<Option<Team>> {
        db_ops::get_team(&self.lock(), org, id)
    }
    fn list_teams(&self, org: &str) -> Result<Vec<Team>> {
        db_ops::list_teams(&self.lock(), org)
    }
    fn add_team_member(&self, org: &str, team_id: &str, user_id: &str) -> Result<Team> {
        db_ops::add_team_member(&self.lock(), org, team_id, user_id)
    }
    fn remove_team_member(&self, org: &str, team_id: &str, user_id: &str) -> Result<bool> {
        db_ops::remove_team_member(&self.lock(), org, team_id, user_id)
    }
    fn team_user_ids(&self, org: &str, team_id: &str) -> Result<Vec<String>> {
        db_ops::team_user_ids(&self.lock(), org, team_id)
    }
    fn is_active_user(&self, org: &str, user_id: &str) -> Result<bool> {
        db_ops::is_active_user(&self.lock(), org, user_id)
    }
}

impl PipelineStore for SqliteBackend {
    fn create_pipeline(&self, org: &str, input: &CreatePipeline) -> Result<Pipeline> {
        db_ops::create_pipeline(&self.lock(), org, input)
    }
    fn get_pipeline(&self, org: &str, id: &str) -> Result<Option<Pipeline>> {
        db_ops::get_pipeline(&self.lock(), org, id)
    }
    fn list_pipelines(&self, org: &str) -> Result<Vec<Pipeline>> {
        db_ops::list_pipelines(&self.lock(), org)
    }
    fn default_pipeline(&self, org: &str) -> Result<Option<Pipeline>> {
        db_ops::default_pipeline(&self.lock(), org)
    }
    fn set_default_pipeline(&self, org: &str, id: &str) -> Result<Option<Pipeline>> {
        db_ops::set_default_pipeline(&self.lock(), org, id)
    }
    fn update_pool_settings(
        &self,
        org: &str,
        id: &str,
        settings: &PoolSettings,
    ) -> Result<Option<Pipeline>> {
        db_ops::update_pool_settings(&self.lock(), org, id, settings)
    }
    fn set_fallback_queue(
        &self,
        org: &str,
        id: &str,
        queue_id: Option<&str>,
    ) -> Result<Option<Pipeline>> {
        db_ops::set_fallback_queue(&self.lock(), org, id, queue_id)
    }
    fn list_pool_enabled_pipelines(&self, org: Option<&str>) -> Result<Vec<Pipeline>> {
        db_ops::list_pool_enabled_pipelines(&self.lock(), org)
    }
}

impl QueueStore for SqliteBackend {
    fn create_queue(&self, org: &str, input: &CreateQueue) -> Result<Queue> {
        db_ops::create_queue(&self.lock(), org, input)
    }
    fn get_queue(&self, org: &str, id: &str) -> Result<Option<Queue>> {
        db_ops::get_queue(&self.lock(), org, id)
    }
    fn list_queues(&self, org: &str) -> Result<Vec<Queue>> {
        db_ops::list_queues(&self.lock(), org)
    }
    fn update_queue(&self, org: &str, id: &str, input: &UpdateQueue) -> Result<Option<Queue>> {
        db_ops::update_queue(&self.lock(), org, id, input)
    }
    fn delete_queue(&self, org: &str, id: &str) -> Result<bool> {
        db_ops::delete_queue(&self.lock(), org, id)
    }
    fn add_queue_member(
        &self,
        org: &str,
        queue_id: &str,
        input: &AddMember,
    ) -> Result<QueueMember> {
        db_ops::add_queue_member(&self.lock(), org, queue_id, input)
    }
    fn remove_queue_member(&self, org: &str, queue_id: &str, member_id: &str) -> Result<bool> {
        db_ops::remove_queue_member(&self.lock(), org, queue_id, member_id)
    }
    fn advance_cursor(
        &self,
        queue_id: &str,
        expected_version: i64,
        new_cursor: i64,
        distributed_delta: i64,
    ) -> Result<bool> {
        db_ops::advance_cursor(
            &self.lock(),
            queue_id,
            expected_version,
            new_cursor,
            distributed_delta,
        )
    }
}

impl RuleStore for SqliteBackend {
    fn create_rule(&self, org: &str, input: &CreateRule) -> Result<Rule> {
        db_ops::create_rule(&self.lock(), org, input)
    }
    fn get_rule(&self, org: &str, id: &str) -> Result<Option<Rule>> {
        db_ops::get_rule(&self.lock(), org, id)
    }
    fn list_rules(&self, org: &str) -> Result<Vec<Rule>> {
        db_ops::list_rules(&self.lock(), org)
    }
    fn update_rule(&self, org: &str, id: &str, input: &UpdateRule) -> Result<Option<Rule>> {
        db_ops::update_rule(&self.lock(), org, id, input)
    }
    fn delete_rule(&self, org: &str, id: &str) -> Result<bool> {
        db_ops::delete_rule(&self.lock(), org, id)
    }
    fn reorder_rules(&self, org: &str, rule_ids: &[String]) -> Result<Vec<Rule>> {
        db_ops::reorder_rules(&self.lock(), org, rule_ids)
    }
}

impl LeadStore for SqliteBackend {
    fn create_lead(
        &self,
        org: &str,
        input: &LeadEvent,
        received_at: DateTime<Utc>,
    ) -> Result<Lead> {
        db_ops::create_lead(&self.lock(), org, input, received_at)
    }
    fn get_lead(&self, org: &str, id: &str) -> Result<Option<Lead>> {
        db_ops::get_lead(&self.lock(), org, id)
    }
    fn list_leads(&self, org: &str, filters: &LeadFilters) -> Result<Vec<Lead>> {
        db_ops::list_leads(&self.lock(), org, filters)
    }
    fn record_assignment(&self, org: &str, write: &AssignmentWrite<'_>) -> Result<bool> {
        db_ops::record_assignment(&self.lock(), org, write)
    }
    fn record_first_touch(
        &self,
        org: &str,
        lead_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<Lead>> {
        db_ops::record_first_touch(&self.lock(), org, lead_id, at)
    }
    fn list_reclaimable_leads(
        &self,
        pipeline_id: &str,
        cutoff: DateTime<Utc>,
        max_redistributions: i64,
        limit: i64,
    ) -> Result<Vec<Lead>> {
        db_ops::list_reclaimable_leads(
            &self.lock(),
            pipeline_id,
            cutoff,
            max_redistributions,
            limit,
        )
    }
    fn record_redistribution(
        &self,
        claim: &RedistributionClaim<'_>,
    ) -> Result<Option<PoolHistoryEntry>> {
        db_ops::record_redistribution(&self.lock(), claim)
    }
    fn record_manual_reassignment(
        &self,
        org: &str,
        lead_id: &str,
        to_user_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<PoolHistoryEntry>> {
        db_ops::record_manual_reassignment(&self.lock(), org, lead_id, to_user_id, at)
    }
    fn list_pool_leads(&self, org: &str, pipeline_id: Option<&str>) -> Result<Vec<Lead>> {
        db_ops::list_pool_leads(&self.lock(), org, pipeline_id)
    }
    fn list_pool_history(&self, org: &str, query: &HistoryQuery) -> Result<HistoryPage> {
        db_ops::list_pool_history(&self.lock(), org, query)
    }
}

impl SweepLeaseStore for SqliteBackend {
    fn try_acquire_lease(
        &self,
        name: &str,
        holder: &str,
        now: DateTime<Utc>,
        ttl_secs: i64,
    ) -> Result<bool> {
        db_ops::try_acquire_lease(&self.lock(), name, holder, now, ttl_secs)
    }
    fn release_lease(&self, name: &str, holder: &str) -> Result<()> {
        db_ops::release_lease(&self.lock(), name, holder)
    }
}

impl StorageBackend for SqliteBackend {}
