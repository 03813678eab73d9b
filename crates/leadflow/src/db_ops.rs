use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::storage::{AssignmentWrite, RedistributionClaim, Result, StorageError};
use leadflow_models::*;

// --- Helpers ---

fn now() -> String {
    format_timestamp(&Utc::now())
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

fn json_column<T: serde::de::DeserializeOwned>(idx: usize, raw: &str) -> rusqlite::Result<T> {
    serde_json::from_str(raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn require_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(StorageError::Invalid("name is required".to_string()));
    }
    Ok(())
}

// --- Organizations ---

const ORG_COLS: &str = "id, name, utc_offset_minutes, notify_webhook_url, created_at";

fn row_to_organization(row: &rusqlite::Row) -> rusqlite::Result<Organization> {
    Ok(Organization {
        id: row.get(0)?,
        name: row.get(1)?,
        utc_offset_minutes: row.get(2)?,
        notify_webhook_url: row.get(3)?,
        created_at: row.get(4)?,
    })
}

pub fn create_organization(conn: &Connection, input: &CreateOrganization) -> Result<Organization> {
    input.validate()?;
    let org = Organization {
        id: new_id(),
        name: input.name.trim().to_string(),
        utc_offset_minutes: input.utc_offset_minutes.unwrap_or(0),
        notify_webhook_url: input
            .notify_webhook_url
            .clone()
            .filter(|u| !u.trim().is_empty()),
        created_at: now(),
    };
    conn.execute(
        "INSERT INTO organizations (id, name, utc_offset_minutes, notify_webhook_url, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            org.id,
            org.name,
            org.utc_offset_minutes,
            org.notify_webhook_url,
            org.created_at
        ],
    )?;
    Ok(org)
}

pub fn get_organization(conn: &Connection, id: &str) -> Result<Option<Organization>> {
    let org = conn
        .query_row(
            &format!("SELECT {ORG_COLS} FROM organizations WHERE id = ?1"),
            params![id],
            row_to_organization,
        )
        .optional()?;
    Ok(org)
}

pub fn update_organization(
    conn: &Connection,
    id: &str,
    input: &UpdateOrganization,
) -> Result<Option<Organization>> {
    input.validate()?;
    let Some(mut org) = get_organization(conn, id)? else {
        return Ok(None);
    };
    if let Some(ref name) = input.name {
        require_name(name)?;
        org.name = name.trim().to_string();
    }
    if let Some(offset) = input.utc_offset_minutes {
        org.utc_offset_minutes = offset;
    }
    if let Some(ref url) = input.notify_webhook_url {
        org.notify_webhook_url = Some(url.trim().to_string()).filter(|u| !u.is_empty());
    }
    conn.execute(
        "UPDATE organizations SET name = ?1, utc_offset_minutes = ?2, notify_webhook_url = ?3 WHERE id = ?4",
        params![org.name, org.utc_offset_minutes, org.notify_webhook_url, id],
    )?;
    Ok(Some(org))
}

// --- Users & teams ---

const USER_COLS: &str = "id, organization_id, name, email, is_active, created_at";

fn row_to_user(row: &rusqlite::Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        organization_id: row.get(1)?,
        name: row.get(2)?,
        email: row.get(3)?,
        is_active: row.get(4)?,
        created_at: row.get(5)?,
    })
}

pub fn create_user(conn: &Connection, org: &str, input: &CreateUser) -> Result<User> {
    require_name(&input.name)?;
    let user = User {
        id: new_id(),
        organization_id: org.to_string(),
        name: input.name.trim().to_string(),
        email: input.email.clone(),
        is_active: true,
        created_at: now(),
    };
    conn.execute(
        "INSERT INTO users (id, organization_id, name, email, is_active, created_at)
         VALUES (?1, ?2, ?3, ?4, 1, ?5)",
        params![user.id, org, user.name, user.email, user.created_at],
    )?;
    Ok(user)
}

pub fn get_user(conn: &Connection, org: &str, id: &str) -> Result<Option<User>> {
    let user = conn
        .query_row(
            &format!("SELECT {USER_COLS} FROM users WHERE id = ?1 AND organization_id = ?2"),
            params![id, org],
            row_to_user,
        )
        .optional()?;
    Ok(user)
}

pub fn list_users(conn: &Connection, org: &str) -> Result<Vec<User>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {USER_COLS} FROM users WHERE organization_id = ?1 ORDER BY created_at, rowid"
    ))?;
    let users = stmt
        .query_map(params![org], row_to_user)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(users)
}

pub fn update_user(
    conn: &Connection,
    org: &str,
    id: &str,
    input: &UpdateUser,
) -> Result<Option<User>> {
    let Some(mut user) = get_user(conn, org, id)? else {
        return Ok(None);
    };
    if let Some(ref name) = input.name {
        require_name(name)?;
        user.name = name.trim().to_string();
    }
    if let Some(active) = input.is_active {
        user.is_active = active;
    }
    conn.execute(
        "UPDATE users SET name = ?1, is_active = ?2 WHERE id = ?3 AND organization_id = ?4",
        params![user.name, user.is_active, id, org],
    )?;
    Ok(Some(user))
}

pub fn is_active_user(conn: &Connection, org: &str, user_id: &str) -> Result<bool> {
    let active: Option<bool> = conn
        .query_row(
            "SELECT is_active FROM users WHERE id = ?1 AND organization_id = ?2",
            params![user_id, org],
            |row| row.get(0),
        )
        .optional()?;
    Ok(active.unwrap_or(false))
}

fn load_team_user_ids(conn: &Connection, team_id: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt =
        conn.prepare("SELECT user_id FROM team_members WHERE team_id = ?1 ORDER BY joined_seq")?;
    let ids = stmt
        .query_map(params![team_id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(ids)
}

fn insert_team_member(conn: &Connection, team_id: &str, user_id: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO team_members (team_id, user_id, joined_seq)
         VALUES (?1, ?2, (SELECT COALESCE(MAX(joined_seq), 0) + 1 FROM team_members WHERE team_id = ?1))",
        params![team_id, user_id],
    )?;
    Ok(())
}

pub fn create_team(conn: &Connection, org: &str, input: &CreateTeam) -> Result<Team> {
    require_name(&input.name)?;
    let user_ids = input.user_ids.clone().unwrap_or_default();
    for user_id in &user_ids {
        if get_user(conn, org, user_id)?.is_none() {
            return Err(StorageError::not_found("user", user_id));
        }
    }

    let id = new_id();
    let created_at = now();
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO teams (id, organization_id, name, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![id, org, input.name.trim(), created_at],
    )?;
    for user_id in &user_ids {
        insert_team_member(&tx, &id, user_id)?;
    }
    tx.commit()?;

    get_team(conn, org, &id)?.ok_or_else(|| StorageError::not_found("team", &id))
}

pub fn get_team(conn: &Connection, org: &str, id: &str) -> Result<Option<Team>> {
    let team = conn
        .query_row(
            "SELECT id, organization_id, name, created_at FROM teams WHERE id = ?1 AND organization_id = ?2",
            params![id, org],
            |row| {
                Ok(Team {
                    id: row.get(0)?,
                    organization_id: row.get(1)?,
                    name: row.get(2)?,
                    user_ids: vec![],
                    created_at: row.get(3)?,
                })
            },
        )
        .optional()?;
    match team {
        Some(mut team) => {
            team.user_ids = load_team_user_ids(conn, &team.id)?;
            Ok(Some(team))
        }
        None => Ok(None),
    }
}

pub fn list_teams(conn: &Connection, org: &str) -> Result<Vec<Team>> {
    let mut stmt = conn.prepare(
        "SELECT id FROM teams WHERE organization_id = ?1 ORDER BY created_at, rowid",
    )?;
    let ids = stmt
        .query_map(params![org], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    let mut teams = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(team) = get_team(conn, org, &id)? {
            teams.push(team);
        }
    }
    Ok(teams)
}

pub fn add_team_member(conn: &Connection, org: &str, team_id: &str, user_id: &str) -> Result<Team> {
    if get_team(conn, org, team_id)?.is_none() {
        return Err(StorageError::not_found("team", team_id));
    }
    if get_user(conn, org, user_id)?.is_none() {
        return Err(StorageError::not_found("user", user_id));
    }
    insert_team_member(conn, team_id, user_id)?;
    get_team(conn, org, team_id)?.ok_or_else(|| StorageError::not_found("team", team_id))
}

pub fn remove_team_member(conn: &Connection, org: &str, team_id: &str, user_id: &str) -> Result<bool> {
    let removed = conn.execute(
        "DELETE FROM team_members WHERE team_id = ?1 AND user_id = ?2
         AND team_id IN (SELECT id FROM teams WHERE organization_id = ?3)",
        params![team_id, user_id, org],
    )?;
    Ok(removed > 0)
}

pub fn team_user_ids(conn: &Connection, org: &str, team_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT tm.user_id FROM team_members tm
         INNER JOIN teams t ON t.id = tm.team_id
         INNER JOIN users u ON u.id = tm.user_id
         WHERE tm.team_id = ?1 AND t.organization_id = ?2 AND u.is_active = 1
         ORDER BY tm.joined_seq",
    )?;
    let ids = stmt
        .query_map(params![team_id, org], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(ids)
}

// --- Pipelines ---

const PIPELINE_COLS: &str = "id, organization_id, name, is_default, pool_enabled, pool_timeout_minutes, pool_max_redistributions, fallback_queue_id, created_at, updated_at";

fn row_to_pipeline(row: &rusqlite::Row) -> rusqlite::Result<Pipeline> {
    Ok(Pipeline {
        id: row.get(0)?,
        organization_id: row.get(1)?,
        name: row.get(2)?,
        is_default: row.get(3)?,
        stages: vec![],
        pool: PoolSettings {
            enabled: row.get(4)?,
            timeout_minutes: row.get(5)?,
            max_redistributions: row.get(6)?,
        },
        fallback_queue_id: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

fn load_stages(conn: &Connection, pipeline_id: &str) -> rusqlite::Result<Vec<Stage>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, position FROM pipeline_stages WHERE pipeline_id = ?1 ORDER BY position",
    )?;
    let stages = stmt
        .query_map(params![pipeline_id], |row| {
            Ok(Stage {
                id: row.get(0)?,
                name: row.get(1)?,
                position: row.get(2)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(stages)
}

fn query_pipelines(
    conn: &Connection,
    where_clause: &str,
    params: &[&dyn rusqlite::types::ToSql],
) -> Result<Vec<Pipeline>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {PIPELINE_COLS} FROM pipelines WHERE {where_clause} ORDER BY created_at, rowid"
    ))?;
    let mut pipelines = stmt
        .query_map(params, row_to_pipeline)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    for pipeline in &mut pipelines {
        pipeline.stages = load_stages(conn, &pipeline.id)?;
    }
    Ok(pipelines)
}

pub fn create_pipeline(conn: &Connection, org: &str, input: &CreatePipeline) -> Result<Pipeline> {
    require_name(&input.name)?;
    let stage_names: Vec<String> = match input.stages {
        Some(ref names) => names
            .iter()
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .collect(),
        None => DEFAULT_STAGES.iter().map(|s| s.to_string()).collect(),
    };
    if stage_names.is_empty() {
        return Err(StorageError::Invalid(
            "a pipeline needs at least one stage".to_string(),
        ));
    }

    let pool = input.pool.unwrap_or_default().clamped();
    let is_default = default_pipeline(conn, org)?.is_none();
    let id = new_id();
    let now = now();

    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO pipelines (id, organization_id, name, is_default, pool_enabled, pool_timeout_minutes, pool_max_redistributions, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
        params![
            id,
            org,
            input.name.trim(),
            is_default,
            pool.enabled,
            pool.timeout_minutes,
            pool.max_redistributions,
            now
        ],
    )?;
    for (position, name) in stage_names.iter().enumerate() {
        tx.execute(
            "INSERT INTO pipeline_stages (id, pipeline_id, name, position) VALUES (?1, ?2, ?3, ?4)",
            params![new_id(), id, name, position as i64],
        )?;
    }
    tx.commit()?;

    get_pipeline(conn, org, &id)?.ok_or_else(|| StorageError::not_found("pipeline", &id))
}

pub fn get_pipeline(conn: &Connection, org: &str, id: &str) -> Result<Option<Pipeline>> {
    Ok(
        query_pipelines(conn, "id = ?1 AND organization_id = ?2", params![id, org])?
            .into_iter()
            .next(),
    )
}

pub fn list_pipelines(conn: &Connection, org: &str) -> Result<Vec<Pipeline>> {
    query_pipelines(conn, "organization_id = ?1", params![org])
}

pub fn default_pipeline(conn: &Connection, org: &str) -> Result<Option<Pipeline>> {
    Ok(
        query_pipelines(conn, "organization_id = ?1 AND is_default = 1", params![org])?
            .into_iter()
            .next(),
    )
}

pub fn set_default_pipeline(conn: &Connection, org: &str, id: &str) -> Result<Option<Pipeline>> {
    if get_pipeline(conn, org, id)?.is_none() {
        return Ok(None);
    }
    let now = now();
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "UPDATE pipelines SET is_default = 0, updated_at = ?2 WHERE organization_id = ?1 AND is_default = 1",
        params![org, now],
    )?;
    tx.execute(
        "UPDATE pipelines SET is_default = 1, updated_at = ?3 WHERE id = ?1 AND organization_id = ?2",
        params![id, org, now],
    )?;
    tx.commit()?;
    get_pipeline(conn, org, id)
}

pub fn update_pool_settings(
    conn: &Connection,
    org: &str,
    id: &str,
    settings: &PoolSettings,
) -> Result<Option<Pipeline>> {
    let settings = settings.clamped();
    let changed = conn.execute(
        "UPDATE pipelines SET pool_enabled = ?1, pool_timeout_minutes = ?2, pool_max_redistributions = ?3, updated_at = ?4
         WHERE id = ?5 AND organization_id = ?6",
        params![
            settings.enabled,
            settings.timeout_minutes,
            settings.max_redistributions,
            now(),
            id,
            org
        ],
    )?;
    if changed == 0 {
        return Ok(None);
    }
    get_pipeline(conn, org, id)
}

pub fn set_fallback_queue(
    conn: &Connection,
    org: &str,
    id: &str,
    queue_id: Option<&str>,
) -> Result<Option<Pipeline>> {
    if let Some(queue_id) = queue_id {
        if get_queue(conn, org, queue_id)?.is_none() {
            return Err(StorageError::not_found("queue", queue_id));
        }
    }
    let changed = conn.execute(
        "UPDATE pipelines SET fallback_queue_id = ?1, updated_at = ?2 WHERE id = ?3 AND organization_id = ?4",
        params![queue_id, now(), id, org],
    )?;
    if changed == 0 {
        return Ok(None);
    }
    get_pipeline(conn, org, id)
}

pub fn list_pool_enabled_pipelines(conn: &Connection, org: Option<&str>) -> Result<Vec<Pipeline>> {
    query_pipelines(
        conn,
        "pool_enabled = 1 AND (?1 IS NULL OR organization_id = ?1)",
        params![org],
    )
}

// --- Queues ---

const QUEUE_COLS: &str = "id, organization_id, name, strategy, is_active, cursor, version, leads_distributed, created_at, updated_at";

fn row_to_queue(row: &rusqlite::Row) -> rusqlite::Result<Queue> {
    let strategy: String = row.get(3)?;
    Ok(Queue {
        id: row.get(0)?,
        organization_id: row.get(1)?,
        name: row.get(2)?,
        strategy: Strategy::from_str(&strategy).unwrap_or_default(),
        is_active: row.get(4)?,
        members: vec![],
        cursor: row.get(5)?,
        version: row.get(6)?,
        leads_distributed: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

fn load_members(conn: &Connection, queue_id: &str) -> rusqlite::Result<Vec<QueueMember>> {
    let mut stmt = conn.prepare(
        "SELECT id, queue_id, member_type, member_id, weight, position
         FROM queue_members WHERE queue_id = ?1 ORDER BY position",
    )?;
    let rows = stmt
        .query_map(params![queue_id], |row| {
            let kind: String = row.get(2)?;
            let member_id: String = row.get(3)?;
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                MemberRef::from_parts(&kind, member_id),
                row.get::<_, i64>(4)?,
                row.get::<_, i64>(5)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows
        .into_iter()
        .filter_map(|(id, queue_id, member, weight, position)| {
            member.map(|member| QueueMember {
                id,
                queue_id,
                member,
                weight,
                position,
            })
        })
        .collect())
}

fn check_member_ref(conn: &Connection, org: &str, member: &MemberRef) -> Result<()> {
    match member {
        MemberRef::User(id) => {
            if get_user(conn, org, id)?.is_none() {
                return Err(StorageError::not_found("user", id));
            }
        }
        MemberRef::Team(id) => {
            if get_team(conn, org, id)?.is_none() {
                return Err(StorageError::not_found("team", id));
            }
        }
    }
    Ok(())
}

fn insert_member(conn: &Connection, queue_id: &str, input: &AddMember) -> Result<QueueMember> {
    let id = new_id();
    let position: i64 = conn.query_row(
        "SELECT COALESCE(MAX(position), -1) + 1 FROM queue_members WHERE queue_id = ?1",
        params![queue_id],
        |row| row.get(0),
    )?;
    conn.execute(
        "INSERT INTO queue_members (id, queue_id, member_type, member_id, weight, position)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            id,
            queue_id,
            input.member.kind(),
            input.member.id(),
            input.weight(),
            position
        ],
    )?;
    Ok(QueueMember {
        id,
        queue_id: queue_id.to_string(),
        member: input.member.clone(),
        weight: input.weight(),
        position,
    })
}

pub fn create_queue(conn: &Connection, org: &str, input: &CreateQueue) -> Result<Queue> {
    input.validate()?;
    let members = input.members.clone().unwrap_or_default();
    for member in &members {
        check_member_ref(conn, org, &member.member)?;
    }

    let id = new_id();
    let now = now();
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO queues (id, organization_id, name, strategy, is_active, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
        params![
            id,
            org,
            input.name.trim(),
            input.strategy.unwrap_or_default().as_str(),
            input.is_active.unwrap_or(true),
            now
        ],
    )?;
    for member in &members {
        insert_member(&tx, &id, member)?;
    }
    tx.commit()?;

    get_queue(conn, org, &id)?.ok_or_else(|| StorageError::not_found("queue", &id))
}

pub fn get_queue(conn: &Connection, org: &str, id: &str) -> Result<Option<Queue>> {
    let queue = conn
        .query_row(
            &format!("SELECT {QUEUE_COLS} FROM queues WHERE id = ?1 AND organization_id = ?2"),
            params![id, org],
            row_to_queue,
        )
        .optional()?;
    match queue {
        Some(mut queue) => {
            queue.members = load_members(conn, &queue.id)?;
            Ok(Some(queue))
        }
        None => Ok(None),
    }
}

pub fn list_queues(conn: &Connection, org: &str) -> Result<Vec<Queue>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {QUEUE_COLS} FROM queues WHERE organization_id = ?1 ORDER BY created_at, rowid"
    ))?;
    let mut queues = stmt
        .query_map(params![org], row_to_queue)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    for queue in &mut queues {
        queue.members = load_members(conn, &queue.id)?;
    }
    Ok(queues)
}

pub fn update_queue(
    conn: &Connection,
    org: &str,
    id: &str,
    input: &UpdateQueue,
) -> Result<Option<Queue>> {
    let Some(mut queue) = get_queue(conn, org, id)? else {
        return Ok(None);
    };
    if let Some(ref name) = input.name {
        require_name(name)?;
        queue.name = name.trim().to_string();
    }
    if let Some(active) = input.is_active {
        queue.is_active = active;
    }
    // A strategy switch changes the cycle length, so the rotation restarts.
    if let Some(strategy) = input.strategy {
        if strategy != queue.strategy {
            queue.strategy = strategy;
            queue.cursor = 0;
        }
    }
    conn.execute(
        "UPDATE queues SET name = ?1, strategy = ?2, is_active = ?3, cursor = ?4, version = version + 1, updated_at = ?5
         WHERE id = ?6 AND organization_id = ?7",
        params![
            queue.name,
            queue.strategy.as_str(),
            queue.is_active,
            queue.cursor,
            now(),
            id,
            org
        ],
    )?;
    get_queue(conn, org, id)
}

pub fn delete_queue(conn: &Connection, org: &str, id: &str) -> Result<bool> {
    if get_queue(conn, org, id)?.is_none() {
        return Ok(false);
    }

    let active_rules: i64 = conn.query_row(
        "SELECT COUNT(*) FROM rules WHERE queue_id = ?1 AND is_active = 1",
        params![id],
        |row| row.get(0),
    )?;
    let fallbacks: i64 = conn.query_row(
        "SELECT COUNT(*) FROM pipelines WHERE fallback_queue_id = ?1",
        params![id],
        |row| row.get(0),
    )?;
    if active_rules > 0 || fallbacks > 0 {
        return Err(StorageError::Conflict(format!(
            "queue is referenced by {active_rules} active rule(s) and {fallbacks} pipeline fallback(s)"
        )));
    }

    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM rules WHERE queue_id = ?1", params![id])?;
    tx.execute("DELETE FROM queue_members WHERE queue_id = ?1", params![id])?;
    tx.execute(
        "DELETE FROM queues WHERE id = ?1 AND organization_id = ?2",
        params![id, org],
    )?;
    tx.commit()?;
    Ok(true)
}

pub fn add_queue_member(
    conn: &Connection,
    org: &str,
    queue_id: &str,
    input: &AddMember,
) -> Result<QueueMember> {
    input.validate()?;
    if get_queue(conn, org, queue_id)?.is_none() {
        return Err(StorageError::not_found("queue", queue_id));
    }
    check_member_ref(conn, org, &input.member)?;

    let tx = conn.unchecked_transaction()?;
    let member = insert_member(&tx, queue_id, input)?;
    tx.execute(
        "UPDATE queues SET version = version + 1, updated_at = ?1 WHERE id = ?2",
        params![now(), queue_id],
    )?;
    tx.commit()?;
    Ok(member)
}

/// Length of the rotation cycle counted from the stored member entries.
fn static_cycle_len(queue: &Queue) -> i64 {
    match queue.strategy {
        Strategy::Simple => queue.members.len() as i64,
        Strategy::Weighted => queue
            .members
            .iter()
            .fold(0i64, |total, m| total.saturating_add(m.weight.max(1))),
    }
}

pub fn remove_queue_member(
    conn: &Connection,
    org: &str,
    queue_id: &str,
    member_id: &str,
) -> Result<bool> {
    if get_queue(conn, org, queue_id)?.is_none() {
        return Ok(false);
    }

    let tx = conn.unchecked_transaction()?;
    let removed = tx.execute(
        "DELETE FROM queue_members WHERE id = ?1 AND queue_id = ?2",
        params![member_id, queue_id],
    )?;
    if removed == 0 {
        return Ok(false);
    }
    let Some(queue) = get_queue(&tx, org, queue_id)? else {
        return Ok(false);
    };
    let cursor = if queue.cursor >= static_cycle_len(&queue) {
        0
    } else {
        queue.cursor
    };
    tx.execute(
        "UPDATE queues SET cursor = ?1, version = version + 1, updated_at = ?2 WHERE id = ?3",
        params![cursor, now(), queue_id],
    )?;
    tx.commit()?;
    Ok(true)
}

pub fn advance_cursor(
    conn: &Connection,
    queue_id: &str,
    expected_version: i64,
    new_cursor: i64,
    distributed_delta: i64,
) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE queues SET cursor = ?1, version = version + 1, leads_distributed = leads_distributed + ?2, updated_at = ?3
         WHERE id = ?4 AND version = ?5",
        params![new_cursor, distributed_delta, now(), queue_id, expected_version],
    )?;
    Ok(changed == 1)
}

// --- Rules ---

const RULE_COLS: &str =
    "seq, id, organization_id, queue_id, name, priority, is_active, match_json, created_at, updated_at";

fn row_to_rule(row: &rusqlite::Row) -> rusqlite::Result<Rule> {
    let match_json: String = row.get(7)?;
    Ok(Rule {
        seq: row.get(0)?,
        id: row.get(1)?,
        organization_id: row.get(2)?,
        queue_id: row.get(3)?,
        name: row.get(4)?,
        priority: row.get(5)?,
        is_active: row.get(6)?,
        criteria: json_column(7, &match_json)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

fn check_rule_refs(conn: &Connection, org: &str, queue_id: &str, criteria: &RuleMatch) -> Result<()> {
    if get_queue(conn, org, queue_id)?.is_none() {
        return Err(StorageError::not_found("queue", queue_id));
    }
    if let Some(ref pipeline_id) = criteria.pipeline_id {
        if get_pipeline(conn, org, pipeline_id)?.is_none() {
            return Err(StorageError::not_found("pipeline", pipeline_id));
        }
    }
    Ok(())
}

pub fn create_rule(conn: &Connection, org: &str, input: &CreateRule) -> Result<Rule> {
    input.validate()?;
    check_rule_refs(conn, org, &input.queue_id, &input.criteria)?;

    let priority = match input.priority {
        Some(p) => p,
        None => conn.query_row(
            "SELECT COALESCE(MAX(priority), 0) + 1 FROM rules WHERE organization_id = ?1",
            params![org],
            |row| row.get(0),
        )?,
    };
    let id = new_id();
    let now = now();
    conn.execute(
        "INSERT INTO rules (id, organization_id, queue_id, name, priority, is_active, match_json, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
        params![
            id,
            org,
            input.queue_id,
            input.name.trim(),
            priority,
            input.is_active.unwrap_or(true),
            serde_json::to_string(&input.criteria)?,
            now
        ],
    )?;
    get_rule(conn, org, &id)?.ok_or_else(|| StorageError::not_found("rule", &id))
}

pub fn get_rule(conn: &Connection, org: &str, id: &str) -> Result<Option<Rule>> {
    let rule = conn
        .query_row(
            &format!("SELECT {RULE_COLS} FROM rules WHERE id = ?1 AND organization_id = ?2"),
            params![id, org],
            row_to_rule,
        )
        .optional()?;
    Ok(rule)
}

pub fn list_rules(conn: &Connection, org: &str) -> Result<Vec<Rule>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {RULE_COLS} FROM rules WHERE organization_id = ?1 ORDER BY priority ASC, seq ASC"
    ))?;
    let rules = stmt
        .query_map(params![org], row_to_rule)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rules)
}

pub fn update_rule(conn: &Connection, org: &str, id: &str, input: &UpdateRule) -> Result<Option<Rule>> {
    input.validate()?;
    let Some(mut rule) = get_rule(conn, org, id)? else {
        return Ok(None);
    };
    if let Some(ref queue_id) = input.queue_id {
        rule.queue_id = queue_id.clone();
    }
    if let Some(ref name) = input.name {
        require_name(name)?;
        rule.name = name.trim().to_string();
    }
    if let Some(priority) = input.priority {
        rule.priority = priority;
    }
    if let Some(active) = input.is_active {
        rule.is_active = active;
    }
    if let Some(ref criteria) = input.criteria {
        rule.criteria = criteria.clone();
    }
    check_rule_refs(conn, org, &rule.queue_id, &rule.criteria)?;

    conn.execute(
        "UPDATE rules SET queue_id = ?1, name = ?2, priority = ?3, is_active = ?4, match_json = ?5, updated_at = ?6
         WHERE id = ?7 AND organization_id = ?8",
        params![
            rule.queue_id,
            rule.name,
            rule.priority,
            rule.is_active,
            serde_json::to_string(&rule.criteria)?,
            now(),
            id,
            org
        ],
    )?;
    get_rule(conn, org, id)
}

pub fn delete_rule(conn: &Connection, org: &str, id: &str) -> Result<bool> {
    let removed = conn.execute(
        "DELETE FROM rules WHERE id = ?1 AND organization_id = ?2",
        params![id, org],
    )?;
    Ok(removed > 0)
}

pub fn reorder_rules(conn: &Connection, org: &str, rule_ids: &[String]) -> Result<Vec<Rule>> {
    for id in rule_ids {
        if get_rule(conn, org, id)?.is_none() {
            return Err(StorageError::not_found("rule", id));
        }
    }
    let now = now();
    let tx = conn.unchecked_transaction()?;
    for (idx, id) in rule_ids.iter().enumerate() {
        tx.execute(
            "UPDATE rules SET priority = ?1, updated_at = ?2 WHERE id = ?3 AND organization_id = ?4",
            params![idx as i64 + 1, now, id, org],
        )?;
    }
    tx.commit()?;
    list_rules(conn, org)
}

// --- Leads ---

const LEAD_COLS: &str = "id, organization_id, pipeline_id, stage_id, name, phone, email, message, source, campaign_name, tags, city, queue_id, assigned_user_id, assigned_at, first_touch_at, redistribution_count, created_at, updated_at";

fn row_to_lead(row: &rusqlite::Row) -> rusqlite::Result<Lead> {
    let tags: String = row.get(10)?;
    Ok(Lead {
        id: row.get(0)?,
        organization_id: row.get(1)?,
        pipeline_id: row.get(2)?,
        stage_id: row.get(3)?,
        name: row.get(4)?,
        phone: row.get(5)?,
        email: row.get(6)?,
        message: row.get(7)?,
        source: row.get(8)?,
        campaign_name: row.get(9)?,
        tags: json_column(10, &tags)?,
        city: row.get(11)?,
        queue_id: row.get(12)?,
        assigned_user_id: row.get(13)?,
        assigned_at: row.get(14)?,
        first_touch_at: row.get(15)?,
        redistribution_count: row.get(16)?,
        created_at: row.get(17)?,
        updated_at: row.get(18)?,
    })
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

pub fn create_lead(
    conn: &Connection,
    org: &str,
    input: &LeadEvent,
    received_at: DateTime<Utc>,
) -> Result<Lead> {
    input.validate()?;
    let tags: Vec<String> = input
        .tags
        .iter()
        .flatten()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    let id = new_id();
    let at = format_timestamp(&received_at);

    conn.execute(
        "INSERT INTO leads (id, organization_id, pipeline_id, name, phone, email, message, source, campaign_name, tags, city, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)",
        params![
            id,
            org,
            non_blank(&input.pipeline_id),
            input.name.trim(),
            non_blank(&input.phone),
            non_blank(&input.email),
            input.message,
            non_blank(&input.source).unwrap_or_else(|| "manual".to_string()),
            non_blank(&input.campaign_name),
            serde_json::to_string(&tags)?,
            non_blank(&input.city),
            at
        ],
    )?;
    get_lead(conn, org, &id)?.ok_or_else(|| StorageError::not_found("lead", &id))
}

pub fn get_lead(conn: &Connection, org: &str, id: &str) -> Result<Option<Lead>> {
    let lead = conn
        .query_row(
            &format!("SELECT {LEAD_COLS} FROM leads WHERE id = ?1 AND organization_id = ?2"),
            params![id, org],
            row_to_lead,
        )
        .optional()?;
    Ok(lead)
}

pub fn list_leads(conn: &Connection, org: &str, filters: &LeadFilters) -> Result<Vec<Lead>> {
    let mut conditions = vec!["organization_id = ?1".to_string()];
    let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = vec![Box::new(org.to_string())];
    let mut idx = 2;

    if let Some(ref pid) = filters.pipeline_id {
        conditions.push(format!("pipeline_id = ?{idx}"));
        param_values.push(Box::new(pid.clone()));
        idx += 1;
    }
    if let Some(ref user_id) = filters.assigned_user_id {
        conditions.push(format!("assigned_user_id = ?{idx}"));
        param_values.push(Box::new(user_id.clone()));
        idx += 1;
    }
    if filters.unassigned == Some(true) {
        conditions.push("assigned_user_id IS NULL".to_string());
    }
    let limit = filters.limit.unwrap_or(200).clamp(1, 1000);
    param_values.push(Box::new(limit));

    let sql = format!(
        "SELECT {LEAD_COLS} FROM leads WHERE {} ORDER BY created_at DESC, rowid DESC LIMIT ?{idx}",
        conditions.join(" AND ")
    );
    let mut stmt = conn.prepare(&sql)?;
    let params: Vec<&dyn rusqlite::types::ToSql> =
        param_values.iter().map(|b| b.as_ref()).collect();
    let leads = stmt
        .query_map(params.as_slice(), row_to_lead)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(leads)
}

pub fn record_assignment(conn: &Connection, org: &str, write: &AssignmentWrite<'_>) -> Result<bool> {
    let at = format_timestamp(&write.assigned_at);
    let changed = conn.execute(
        "UPDATE leads SET assigned_user_id = ?1, assigned_at = ?2, queue_id = ?3, pipeline_id = ?4,
                stage_id = COALESCE(stage_id, ?5), updated_at = ?2
         WHERE id = ?6 AND organization_id = ?7 AND assigned_user_id IS NULL",
        params![
            write.user_id,
            at,
            write.queue_id,
            write.pipeline_id,
            write.stage_id,
            write.lead_id,
            org
        ],
    )?;
    Ok(changed == 1)
}

pub fn record_first_touch(
    conn: &Connection,
    org: &str,
    lead_id: &str,
    at: DateTime<Utc>,
) -> Result<Option<Lead>> {
    let at = format_timestamp(&at);
    let changed = conn.execute(
        "UPDATE leads SET first_touch_at = COALESCE(first_touch_at, ?1), updated_at = ?1
         WHERE id = ?2 AND organization_id = ?3",
        params![at, lead_id, org],
    )?;
    if changed == 0 {
        return Ok(None);
    }
    get_lead(conn, org, lead_id)
}

pub fn list_reclaimable_leads(
    conn: &Connection,
    pipeline_id: &str,
    cutoff: DateTime<Utc>,
    max_redistributions: i64,
    limit: i64,
) -> Result<Vec<Lead>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {LEAD_COLS} FROM leads
         WHERE pipeline_id = ?1
           AND assigned_user_id IS NOT NULL
           AND first_touch_at IS NULL
           AND assigned_at <= ?2
           AND redistribution_count < ?3
         ORDER BY assigned_at ASC, rowid ASC
         LIMIT ?4"
    ))?;
    let leads = stmt
        .query_map(
            params![
                pipeline_id,
                format_timestamp(&cutoff),
                max_redistributions,
                limit
            ],
            row_to_lead,
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(leads)
}

fn insert_history(conn: &Connection, entry: &PoolHistoryEntry) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO pool_history (id, organization_id, lead_id, from_user_id, to_user_id, reason, redistributed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            entry.id,
            entry.organization_id,
            entry.lead_id,
            entry.from_user_id,
            entry.to_user_id,
            entry.reason.as_str(),
            entry.redistributed_at
        ],
    )?;
    Ok(())
}

pub fn record_redistribution(
    conn: &Connection,
    claim: &RedistributionClaim<'_>,
) -> Result<Option<PoolHistoryEntry>> {
    let at = format_timestamp(&claim.at);
    let tx = conn.unchecked_transaction()?;
    let changed = tx.execute(
        "UPDATE leads SET assigned_user_id = ?1, assigned_at = ?2, queue_id = ?3,
                redistribution_count = redistribution_count + 1, updated_at = ?2
         WHERE id = ?4 AND organization_id = ?5
           AND assigned_user_id = ?6
           AND redistribution_count = ?7
           AND first_touch_at IS NULL",
        params![
            claim.to_user_id,
            at,
            claim.queue_id,
            claim.lead_id,
            claim.organization_id,
            claim.from_user_id,
            claim.expected_count
        ],
    )?;
    if changed == 0 {
        return Ok(None);
    }

    let entry = PoolHistoryEntry {
        id: new_id(),
        organization_id: claim.organization_id.to_string(),
        lead_id: claim.lead_id.to_string(),
        from_user_id: Some(claim.from_user_id.to_string()),
        to_user_id: claim.to_user_id.to_string(),
        reason: RedistributionReason::Timeout,
        redistributed_at: at,
    };
    insert_history(&tx, &entry)?;
    tx.commit()?;
    Ok(Some(entry))
}

pub fn record_manual_reassignment(
    conn: &Connection,
    org: &str,
    lead_id: &str,
    to_user_id: &str,
    at: DateTime<Utc>,
) -> Result<Option<PoolHistoryEntry>> {
    let Some(lead) = get_lead(conn, org, lead_id)? else {
        return Ok(None);
    };
    if !is_active_user(conn, org, to_user_id)? {
        return Err(StorageError::Invalid(format!(
            "user {to_user_id} is not an active user of this organization"
        )));
    }
    if lead.assigned_user_id.as_deref() == Some(to_user_id) {
        return Err(StorageError::Conflict(
            "lead is already assigned to that user".to_string(),
        ));
    }

    let at = format_timestamp(&at);
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "UPDATE leads SET assigned_user_id = ?1, assigned_at = ?2, updated_at = ?2
         WHERE id = ?3 AND organization_id = ?4",
        params![to_user_id, at, lead_id, org],
    )?;
    let entry = PoolHistoryEntry {
        id: new_id(),
        organization_id: org.to_string(),
        lead_id: lead_id.to_string(),
        from_user_id: lead.assigned_user_id,
        to_user_id: to_user_id.to_string(),
        reason: RedistributionReason::Manual,
        redistributed_at: at,
    };
    insert_history(&tx, &entry)?;
    tx.commit()?;
    Ok(Some(entry))
}

pub fn list_pool_leads(conn: &Connection, org: &str, pipeline_id: Option<&str>) -> Result<Vec<Lead>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {LEAD_COLS} FROM leads
         WHERE organization_id = ?1
           AND assigned_user_id IS NOT NULL
           AND first_touch_at IS NULL
           AND (?2 IS NULL OR pipeline_id = ?2)
         ORDER BY assigned_at ASC, rowid ASC"
    ))?;
    let leads = stmt
        .query_map(params![org, pipeline_id], row_to_lead)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(leads)
}

fn row_to_history(row: &rusqlite::Row) -> rusqlite::Result<PoolHistoryEntry> {
    let reason: String = row.get(5)?;
    Ok(PoolHistoryEntry {
        id: row.get(0)?,
        organization_id: row.get(1)?,
        lead_id: row.get(2)?,
        from_user_id: row.get(3)?,
        to_user_id: row.get(4)?,
        reason: RedistributionReason::from_str(&reason).unwrap_or(RedistributionReason::Manual),
        redistributed_at: row.get(6)?,
    })
}

pub fn list_pool_history(conn: &Connection, org: &str, query: &HistoryQuery) -> Result<HistoryPage> {
    let (page, per_page) = query.paging();
    let lead_id = query.lead_id.as_deref();

    let total: i64 = conn.query_row(
        "SELECT COUNT(*) FROM pool_history WHERE organization_id = ?1 AND (?2 IS NULL OR lead_id = ?2)",
        params![org, lead_id],
        |row| row.get(0),
    )?;
    let mut stmt = conn.prepare(
        "SELECT id, organization_id, lead_id, from_user_id, to_user_id, reason, redistributed_at
         FROM pool_history
         WHERE organization_id = ?1 AND (?2 IS NULL OR lead_id = ?2)
         ORDER BY redistributed_at DESC, rowid DESC
         LIMIT ?3 OFFSET ?4",
    )?;
    let offset = i64::from(page - 1) * i64::from(per_page);
    let entries = stmt
        .query_map(
            params![org, lead_id, i64::from(per_page), offset],
            row_to_history,
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(HistoryPage {
        entries,
        page,
        per_page,
        total,
    })
}

// --- Sweep lease ---

pub fn try_acquire_lease(
    conn: &Connection,
    name: &str,
    holder: &str,
    now: DateTime<Utc>,
    ttl_secs: i64,
) -> Result<bool> {
    let expires_at = format_timestamp(&(now + chrono::Duration::seconds(ttl_secs)));
    let changed = conn.execute(
        "INSERT INTO sweep_leases (name, holder, expires_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(name) DO UPDATE SET holder = excluded.holder, expires_at = excluded.expires_at
         WHERE sweep_leases.expires_at <= ?4",
        params![name, holder, expires_at, format_timestamp(&now)],
    )?;
    Ok(changed == 1)
}

pub fn release_lease(conn: &Connection, name: &str, holder: &str) -> Result<()> {
    conn.execute(
        "DELETE FROM sweep_leases WHERE name = ?1 AND holder = ?2",
        params![name, holder],
    )?;
    Ok(())
}
