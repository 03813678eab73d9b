use rusqlite::Connection;

pub fn init_db(path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;

    // WAL lets the pool views read while the sweeper writes
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    conn.execute_batch("PRAGMA foreign_keys=ON;")?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS organizations (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            utc_offset_minutes INTEGER NOT NULL DEFAULT 0,
            notify_webhook_url TEXT,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            organization_id TEXT NOT NULL REFERENCES organizations(id),
            name TEXT NOT NULL,
            email TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_users_org ON users(organization_id);

        CREATE TABLE IF NOT EXISTS teams (
            id TEXT PRIMARY KEY,
            organization_id TEXT NOT NULL REFERENCES organizations(id),
            name TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS team_members (
            team_id TEXT NOT NULL REFERENCES teams(id) ON DELETE CASCADE,
            user_id TEXT NOT NULL REFERENCES users(id),
            joined_seq INTEGER NOT NULL,
            PRIMARY KEY (team_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS pipelines (
            id TEXT PRIMARY KEY,
            organization_id TEXT NOT NULL REFERENCES organizations(id),
            name TEXT NOT NULL,
            is_default INTEGER NOT NULL DEFAULT 0,
            pool_enabled INTEGER NOT NULL DEFAULT 0,
            pool_timeout_minutes INTEGER NOT NULL DEFAULT 30,
            pool_max_redistributions INTEGER NOT NULL DEFAULT 3,
            fallback_queue_id TEXT REFERENCES queues(id),
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_pipelines_org ON pipelines(organization_id);

        CREATE TABLE IF NOT EXISTS pipeline_stages (
            id TEXT PRIMARY KEY,
            pipeline_id TEXT NOT NULL REFERENCES pipelines(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            position INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_stages_pipeline ON pipeline_stages(pipeline_id, position);

        CREATE TABLE IF NOT EXISTS queues (
            id TEXT PRIMARY KEY,
            organization_id TEXT NOT NULL REFERENCES organizations(id),
            name TEXT NOT NULL,
            strategy TEXT NOT NULL DEFAULT 'simple',
            is_active INTEGER NOT NULL DEFAULT 1,
            cursor INTEGER NOT NULL DEFAULT 0,
            version INTEGER NOT NULL DEFAULT 0,
            leads_distributed INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_queues_org ON queues(organization_id);

        CREATE TABLE IF NOT EXISTS queue_members (
            id TEXT PRIMARY KEY,
            queue_id TEXT NOT NULL REFERENCES queues(id) ON DELETE CASCADE,
            member_type TEXT NOT NULL,
            member_id TEXT NOT NULL,
            weight INTEGER NOT NULL DEFAULT 1,
            position INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_queue_members_queue ON queue_members(queue_id, position);

        CREATE TABLE IF NOT EXISTS rules (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            organization_id TEXT NOT NULL REFERENCES organizations(id),
            queue_id TEXT NOT NULL REFERENCES queues(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            priority INTEGER NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            match_json TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_rules_org ON rules(organization_id, priority, seq);

        CREATE TABLE IF NOT EXISTS leads (
            id TEXT PRIMARY KEY,
            organization_id TEXT NOT NULL REFERENCES organizations(id),
            pipeline_id TEXT,
            stage_id TEXT,
            name TEXT NOT NULL,
            phone TEXT,
            email TEXT,
            message TEXT,
            source TEXT NOT NULL,
            campaign_name TEXT,
            tags TEXT NOT NULL DEFAULT '[]',
            city TEXT,
            queue_id TEXT,
            assigned_user_id TEXT,
            assigned_at TEXT,
            first_touch_at TEXT,
            redistribution_count INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_leads_org ON leads(organization_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_leads_pool ON leads(pipeline_id, first_touch_at, assigned_at);
        CREATE INDEX IF NOT EXISTS idx_leads_assignee ON leads(assigned_user_id);

        CREATE TABLE IF NOT EXISTS pool_history (
            id TEXT PRIMARY KEY,
            organization_id TEXT NOT NULL REFERENCES organizations(id),
            lead_id TEXT NOT NULL REFERENCES leads(id),
            from_user_id TEXT,
            to_user_id TEXT NOT NULL,
            reason TEXT NOT NULL,
            redistributed_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_pool_history_org ON pool_history(organization_id, redistributed_at);
        CREATE INDEX IF NOT EXISTS idx_pool_history_lead ON pool_history(lead_id);

        CREATE TABLE IF NOT EXISTS sweep_leases (
            name TEXT PRIMARY KEY,
            holder TEXT NOT NULL,
            expires_at TEXT NOT NULL
        );
        ",
    )?;

    Ok(conn)
}

/// Create a SQLite-backed StorageBackend from a path.
pub fn init_sqlite_storage(
    path: &str,
) -> rusqlite::Result<std::sync::Arc<dyn crate::storage::StorageBackend>> {
    let conn = init_db(path)?;
    let conn = std::sync::Arc::new(std::sync::Mutex::new(conn));
    Ok(std::sync::Arc::new(
        crate::storage::sqlite::SqliteBackend::new(conn),
    ))
}
