mod alert;
mod directory;
mod escalation;
mod event;
mod incident;
mod integration;
mod job_queue;
mod routing;
mod schedule;

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use klaxon_ports::error::PortError;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS alerts (
        id TEXT PRIMARY KEY,
        fingerprint TEXT NOT NULL,
        status TEXT NOT NULL,
        incident_id TEXT,
        data TEXT NOT NULL,
        created_at TEXT NOT NULL,
        revision INTEGER NOT NULL DEFAULT 0
    )",
    // At most one firing alert per fingerprint.
    "CREATE UNIQUE INDEX IF NOT EXISTS uq_alerts_firing_fingerprint
     ON alerts(fingerprint) WHERE status = 'firing'",
    "CREATE INDEX IF NOT EXISTS idx_alerts_incident ON alerts(incident_id)",
    "CREATE TABLE IF NOT EXISTS incidents (
        id TEXT PRIMARY KEY,
        number INTEGER NOT NULL UNIQUE,
        service_id TEXT NOT NULL,
        severity TEXT NOT NULL,
        status TEXT NOT NULL,
        data TEXT NOT NULL,
        triggered_at TEXT NOT NULL,
        revision INTEGER NOT NULL DEFAULT 0
    )",
    // At most one triggered incident per (service, severity).
    "CREATE UNIQUE INDEX IF NOT EXISTS uq_incidents_triggered_group
     ON incidents(service_id, severity) WHERE status = 'triggered'",
    "CREATE TABLE IF NOT EXISTS counters (
        name TEXT PRIMARY KEY,
        value INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS integrations (
        id TEXT PRIMARY KEY,
        key TEXT NOT NULL UNIQUE,
        data TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS services (
        id TEXT PRIMARY KEY,
        data TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS escalation_policies (
        id TEXT PRIMARY KEY,
        data TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS routing_rules (
        id TEXT PRIMARY KEY,
        team_id TEXT NOT NULL,
        priority INTEGER NOT NULL,
        enabled INTEGER NOT NULL,
        data TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_routing_rules_team
     ON routing_rules(team_id, enabled, priority)",
    "CREATE TABLE IF NOT EXISTS rotations (
        id TEXT PRIMARY KEY,
        schedule_id TEXT NOT NULL,
        data TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS schedule_overrides (
        id TEXT PRIMARY KEY,
        schedule_id TEXT NOT NULL,
        data TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS team_members (
        team_id TEXT NOT NULL,
        user_id TEXT NOT NULL,
        active INTEGER NOT NULL,
        PRIMARY KEY (team_id, user_id)
    )",
    "CREATE TABLE IF NOT EXISTS user_channels (
        user_id TEXT PRIMARY KEY,
        channels TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS jobs (
        id TEXT PRIMARY KEY,
        key TEXT NOT NULL,
        queue TEXT NOT NULL,
        payload TEXT NOT NULL,
        state TEXT NOT NULL,
        priority INTEGER NOT NULL,
        run_at INTEGER NOT NULL,
        attempts INTEGER NOT NULL DEFAULT 0,
        max_attempts INTEGER NOT NULL,
        backoff_secs INTEGER NOT NULL,
        last_error TEXT,
        locked_until INTEGER
    )",
    "CREATE INDEX IF NOT EXISTS idx_jobs_due ON jobs(queue, state, priority, run_at)",
    "CREATE INDEX IF NOT EXISTS idx_jobs_key ON jobs(key, state)",
    "CREATE TABLE IF NOT EXISTS events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        event_type TEXT NOT NULL,
        data TEXT NOT NULL,
        occurred_at TEXT NOT NULL
    )",
];

#[derive(Clone)]
pub struct SqliteDb {
    pool: SqlitePool,
}

impl SqliteDb {
    pub async fn new(url: &str) -> Result<Self, PortError> {
        // Every connection to `:memory:` opens its own empty database, so an
        // in-memory pool is pinned to one connection that never recycles.
        let options = if url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };
        let pool = options
            .connect(url)
            .await
            .map_err(|e| PortError::Connection(e.to_string()))?;

        let db = Self { pool };
        db.init_schema().await?;
        Ok(db)
    }

    async fn init_schema(&self) -> Result<(), PortError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| PortError::Persistence(e.to_string()))?;
        }
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Unique-index violations become `Conflict` so callers can re-read and
/// retry; everything else is a persistence failure.
fn write_error(e: sqlx::Error, what: &str) -> PortError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            PortError::Conflict(format!("{what} already exists"))
        }
        _ => PortError::Persistence(e.to_string()),
    }
}

fn decode<T: serde::de::DeserializeOwned>(data: &str) -> Result<T, PortError> {
    serde_json::from_str(data).map_err(|e| PortError::Persistence(e.to_string()))
}

fn encode<T: serde::Serialize>(value: &T) -> Result<String, PortError> {
    serde_json::to_string(value).map_err(|e| PortError::Persistence(e.to_string()))
}
