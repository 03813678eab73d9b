use chrono::{DateTime, NaiveTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// --- Limits ---

pub const POOL_TIMEOUT_MINUTES_MIN: i64 = 1;
pub const POOL_TIMEOUT_MINUTES_MAX: i64 = 120;
pub const POOL_MAX_REDISTRIBUTIONS_MIN: i64 = 1;
pub const POOL_MAX_REDISTRIBUTIONS_MAX: i64 = 10;
pub const DEFAULT_POOL_TIMEOUT_MINUTES: i64 = 30;
pub const DEFAULT_POOL_MAX_REDISTRIBUTIONS: i64 = 3;
pub const MEMBER_WEIGHT_MIN: i64 = 1;
pub const MEMBER_WEIGHT_MAX: i64 = 1000;

/// Stages a pipeline gets when it is created without an explicit list.
pub const DEFAULT_STAGES: [&str; 5] = ["New", "Contacted", "Qualified", "Won", "Lost"];

/// Write-time validation failure for an admin or intake payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ValidationError(pub String);

impl ValidationError {
    pub fn new(msg: impl Into<String>) -> Self {
        ValidationError(msg.into())
    }
}

// --- Timestamps ---

/// Fixed-width RFC 3339 (UTC, millisecond precision). Stored timestamps are
/// compared lexicographically in SQL, so every write goes through here.
pub fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Parses an "HH:MM" clock value.
pub fn parse_clock(s: &str) -> Option<NaiveTime> {
    if s.len() != 5 {
        return None;
    }
    NaiveTime::parse_from_str(s, "%H:%M").ok()
}

// --- Enums ---

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    #[default]
    Simple,
    Weighted,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Simple => "simple",
            Strategy::Weighted => "weighted",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "simple" => Some(Strategy::Simple),
            "weighted" => Some(Strategy::Weighted),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RedistributionReason {
    Timeout,
    Manual,
}

impl RedistributionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RedistributionReason::Timeout => "timeout",
            RedistributionReason::Manual => "manual",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "timeout" => Some(RedistributionReason::Timeout),
            "manual" => Some(RedistributionReason::Manual),
            _ => None,
        }
    }
}

/// A queue member is either a single user or a whole team. Teams are expanded
/// to their current users every time the queue rotates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum MemberRef {
    User(String),
    Team(String),
}

impl MemberRef {
    pub fn kind(&self) -> &'static str {
        match self {
            MemberRef::User(_) => "user",
            MemberRef::Team(_) => "team",
        }
    }

    pub fn id(&self) -> &str {
        match self {
            MemberRef::User(id) | MemberRef::Team(id) => id,
        }
    }

    pub fn from_parts(kind: &str, id: String) -> Option<Self> {
        match kind {
            "user" => Some(MemberRef::User(id)),
            "team" => Some(MemberRef::Team(id)),
            _ => None,
        }
    }
}

// --- Domain models ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organization {
    pub id: String,
    pub name: String,
    /// Organization-local time as a fixed offset from UTC.
    pub utc_offset_minutes: i32,
    /// Receives a POST for every assignment and redistribution.
    pub notify_webhook_url: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub organization_id: String,
    pub name: String,
    pub email: Option<String>,
    pub is_active: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Team {
    pub id: String,
    pub organization_id: String,
    pub name: String,
    /// Member user ids in join order.
    pub user_ids: Vec<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stage {
    pub id: String,
    pub name: String,
    pub position: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PoolSettings {
    pub enabled: bool,
    pub timeout_minutes: i64,
    pub max_redistributions: i64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            timeout_minutes: DEFAULT_POOL_TIMEOUT_MINUTES,
            max_redistributions: DEFAULT_POOL_MAX_REDISTRIBUTIONS,
        }
    }
}

impl PoolSettings {
    /// Clamp timeout to 1–120 minutes and the redistribution cap to 1–10.
    pub fn clamped(self) -> Self {
        Self {
            enabled: self.enabled,
            timeout_minutes: self
                .timeout_minutes
                .clamp(POOL_TIMEOUT_MINUTES_MIN, POOL_TIMEOUT_MINUTES_MAX),
            max_redistributions: self
                .max_redistributions
                .clamp(POOL_MAX_REDISTRIBUTIONS_MIN, POOL_MAX_REDISTRIBUTIONS_MAX),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: String,
    pub organization_id: String,
    pub name: String,
    pub is_default: bool,
    pub stages: Vec<Stage>,
    pub pool: PoolSettings,
    pub fallback_queue_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Pipeline {
    pub fn first_stage(&self) -> Option<&Stage> {
        self.stages.iter().min_by_key(|s| s.position)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueMember {
    pub id: String,
    pub queue_id: String,
    pub member: MemberRef,
    pub weight: i64,
    pub position: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Queue {
    pub id: String,
    pub organization_id: String,
    pub name: String,
    pub strategy: Strategy,
    pub is_active: bool,
    pub members: Vec<QueueMember>,
    /// Next slot of the rotation cycle; always wrapped into range.
    pub cursor: i64,
    /// Bumped on every cursor write; cursor updates are conditional on it.
    pub version: i64,
    pub leads_distributed: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Schedule {
    /// 0 = Sunday … 6 = Saturday.
    pub days: Vec<u8>,
    /// "HH:MM", inclusive.
    pub start: String,
    /// "HH:MM", exclusive. Must be later than `start`: overnight windows are not supported.
    pub end: String,
}

impl Schedule {
    pub fn window(&self) -> Option<(NaiveTime, NaiveTime)> {
        Some((parse_clock(&self.start)?, parse_clock(&self.end)?))
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.days.is_empty() {
            return Err(ValidationError::new("schedule.days must not be empty"));
        }
        if let Some(day) = self.days.iter().find(|d| **d > 6) {
            return Err(ValidationError(format!(
                "schedule.days entries must be 0-6, got {day}"
            )));
        }
        let start = parse_clock(&self.start).ok_or_else(|| {
            ValidationError(format!("schedule.start must be HH:MM, got '{}'", self.start))
        })?;
        let end = parse_clock(&self.end).ok_or_else(|| {
            ValidationError(format!("schedule.end must be HH:MM, got '{}'", self.end))
        })?;
        if start >= end {
            return Err(ValidationError::new(
                "schedule.start must be before schedule.end (overnight windows are not supported)",
            ));
        }
        Ok(())
    }
}

/// Routing predicate of a rule. Every field is optional; an absent (or empty)
/// field places no constraint on the lead.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuleMatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub campaign_name_contains: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag_in: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city_in: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<Schedule>,
}

impl RuleMatch {
    pub fn is_catch_all(&self) -> bool {
        fn empty(list: &Option<Vec<String>>) -> bool {
            list.as_ref().is_none_or(|l| l.is_empty())
        }
        self.pipeline_id.is_none()
            && empty(&self.source)
            && self.campaign_name_contains.as_deref().is_none_or(str::is_empty)
            && empty(&self.tag_in)
            && empty(&self.city_in)
            && self.schedule.is_none()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        for (field, list) in [
            ("source", &self.source),
            ("tag_in", &self.tag_in),
            ("city_in", &self.city_in),
        ] {
            if let Some(values) = list {
                if values.iter().any(|v| v.trim().is_empty()) {
                    return Err(ValidationError(format!(
                        "{field} must not contain blank values"
                    )));
                }
            }
        }
        if let Some(ref schedule) = self.schedule {
            schedule.validate()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub organization_id: String,
    pub queue_id: String,
    pub name: String,
    pub priority: i64,
    pub is_active: bool,
    #[serde(rename = "match")]
    pub criteria: RuleMatch,
    /// Insertion order; breaks priority ties.
    #[serde(skip)]
    pub seq: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lead {
    pub id: String,
    pub organization_id: String,
    pub pipeline_id: Option<String>,
    pub stage_id: Option<String>,
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub message: Option<String>,
    pub source: String,
    pub campaign_name: Option<String>,
    pub tags: Vec<String>,
    pub city: Option<String>,
    /// Queue that produced the current assignment.
    pub queue_id: Option<String>,
    pub assigned_user_id: Option<String>,
    pub assigned_at: Option<String>,
    pub first_touch_at: Option<String>,
    pub redistribution_count: i64,
    /// Arrival time; schedules are evaluated against it.
    pub created_at: String,
    pub updated_at: String,
}

impl Lead {
    pub fn in_pool(&self) -> bool {
        self.assigned_user_id.is_some() && self.first_touch_at.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolHistoryEntry {
    pub id: String,
    pub organization_id: String,
    pub lead_id: String,
    pub from_user_id: Option<String>,
    pub to_user_id: String,
    pub reason: RedistributionReason,
    pub redistributed_at: String,
}

// --- Intake ---

/// Inbound "new lead" payload shared by every intake path.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LeadEvent {
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub message: Option<String>,
    pub source: Option<String>,
    pub pipeline_id: Option<String>,
    pub campaign_name: Option<String>,
    pub tags: Option<Vec<String>>,
    pub city: Option<String>,
}

impl LeadEvent {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::new("name is required"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AssignmentOutcome {
    Assigned {
        user_id: String,
        queue_id: String,
        rule_id: Option<String>,
    },
    AlreadyAssigned {
        user_id: String,
    },
    /// Valid terminal state: the lead waits for manual triage.
    Unassigned {
        reason: String,
    },
}

impl AssignmentOutcome {
    pub fn assigned_user(&self) -> Option<&str> {
        match self {
            AssignmentOutcome::Assigned { user_id, .. } => Some(user_id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeadWithAssignment {
    pub lead: Lead,
    pub assignment: AssignmentOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportResult {
    pub created: usize,
    pub assigned: usize,
    pub results: Vec<LeadWithAssignment>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SweepReport {
    pub redistributed: usize,
    pub skipped: usize,
}

// --- Queries ---

#[derive(Debug, Default, Deserialize)]
pub struct LeadFilters {
    pub pipeline_id: Option<String>,
    pub assigned_user_id: Option<String>,
    pub unassigned: Option<bool>,
    pub limit: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PoolLeadsQuery {
    pub pipeline_id: Option<String>,
}

pub const HISTORY_MAX_PER_PAGE: u32 = 100;

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    pub lead_id: Option<String>,
}

impl HistoryQuery {
    /// Returns (page, per_page), 1-based page, per_page within 1–100.
    pub fn paging(&self) -> (u32, u32) {
        let page = self.page.unwrap_or(1).max(1);
        let per_page = self.per_page.unwrap_or(20).clamp(1, HISTORY_MAX_PER_PAGE);
        (page, per_page)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryPage {
    pub entries: Vec<PoolHistoryEntry>,
    pub page: u32,
    pub per_page: u32,
    pub total: i64,
}

// --- Input DTOs ---

fn validate_offset(minutes: i32) -> Result<(), ValidationError> {
    if !(-720..=840).contains(&minutes) {
        return Err(ValidationError(format!(
            "utc_offset_minutes must be between -720 and 840, got {minutes}"
        )));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct CreateOrganization {
    pub name: String,
    pub utc_offset_minutes: Option<i32>,
    pub notify_webhook_url: Option<String>,
}

impl CreateOrganization {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::new("name is required"));
        }
        if let Some(offset) = self.utc_offset_minutes {
            validate_offset(offset)?;
        }
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateOrganization {
    pub name: Option<String>,
    pub utc_offset_minutes: Option<i32>,
    /// An empty string clears the webhook.
    pub notify_webhook_url: Option<String>,
}

impl UpdateOrganization {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(offset) = self.utc_offset_minutes {
            validate_offset(offset)?;
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateUser {
    pub name: String,
    pub email: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateUser {
    pub name: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct CreateTeam {
    pub name: String,
    pub user_ids: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct AddTeamMember {
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
pub struct CreatePipeline {
    pub name: String,
    pub stages: Option<Vec<String>>,
    pub pool: Option<PoolSettings>,
}

#[derive(Debug, Deserialize)]
pub struct SetFallbackQueue {
    pub queue_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddMember {
    pub member: MemberRef,
    pub weight: Option<i64>,
}

impl AddMember {
    pub fn weight(&self) -> i64 {
        self.weight.unwrap_or(1)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if !(MEMBER_WEIGHT_MIN..=MEMBER_WEIGHT_MAX).contains(&self.weight()) {
            return Err(ValidationError(format!(
                "member weight must be between {MEMBER_WEIGHT_MIN} and {MEMBER_WEIGHT_MAX}, got {}",
                self.weight()
            )));
        }
        if self.member.id().trim().is_empty() {
            return Err(ValidationError::new("member id is required"));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateQueue {
    pub name: String,
    pub strategy: Option<Strategy>,
    pub is_active: Option<bool>,
    pub members: Option<Vec<AddMember>>,
}

impl CreateQueue {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::new("name is required"));
        }
        for member in self.members.iter().flatten() {
            member.validate()?;
        }
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateQueue {
    pub name: Option<String>,
    pub strategy: Option<Strategy>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct CreateRule {
    pub queue_id: String,
    pub name: String,
    pub priority: Option<i64>,
    pub is_active: Option<bool>,
    #[serde(rename = "match", default)]
    pub criteria: RuleMatch,
}

impl CreateRule {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::new("name is required"));
        }
        self.criteria.validate()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateRule {
    pub queue_id: Option<String>,
    pub name: Option<String>,
    pub priority: Option<i64>,
    pub is_active: Option<bool>,
    #[serde(rename = "match")]
    pub criteria: Option<RuleMatch>,
}

impl UpdateRule {
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self.criteria {
            Some(ref criteria) => criteria.validate(),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ReorderRules {
    pub rule_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReassignLead {
    pub user_id: String,
}
