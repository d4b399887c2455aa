//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the Sumi-Strata database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Raw response bodies, one row per distinct content
CREATE TABLE IF NOT EXISTS snapshot_blobs (
    content_hash TEXT PRIMARY KEY,
    content_type TEXT NOT NULL,
    raw_bytes BLOB NOT NULL
);

-- Observations of a blob for a site
CREATE TABLE IF NOT EXISTS snapshots (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    site_id TEXT NOT NULL,
    url TEXT NOT NULL,
    fetch_time TEXT NOT NULL,
    content_hash TEXT NOT NULL REFERENCES snapshot_blobs(content_hash),
    content_type TEXT NOT NULL,
    UNIQUE(site_id, content_hash)
);

CREATE INDEX IF NOT EXISTS idx_snapshots_site_time ON snapshots(site_id, fetch_time, id);

-- Versioned analysis artifacts, never updated in place
CREATE TABLE IF NOT EXISTS structural_models (
    site_id TEXT NOT NULL,
    version INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    body TEXT NOT NULL,
    PRIMARY KEY (site_id, version)
);

CREATE TABLE IF NOT EXISTS database_schemas (
    site_id TEXT NOT NULL,
    version INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    body TEXT NOT NULL,
    PRIMARY KEY (site_id, version)
);

CREATE TABLE IF NOT EXISTS crawl_plans (
    site_id TEXT NOT NULL,
    version INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    body TEXT NOT NULL,
    PRIMARY KEY (site_id, version)
);

-- Track pipeline runs
CREATE TABLE IF NOT EXISTS pipeline_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    site_id TEXT NOT NULL,
    fingerprint TEXT,
    status TEXT NOT NULL,
    stage TEXT NOT NULL,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    failure_stage TEXT,
    failure_kind TEXT,
    failure_message TEXT,
    model_version INTEGER,
    schema_version INTEGER,
    plan_version INTEGER,
    reused_run INTEGER REFERENCES pipeline_runs(id)
);

CREATE INDEX IF NOT EXISTS idx_runs_site ON pipeline_runs(site_id);
CREATE INDEX IF NOT EXISTS idx_runs_fingerprint ON pipeline_runs(site_id, fingerprint, status);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
