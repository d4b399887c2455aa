//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Storage trait.

use crate::analyzer::StructuralModel;
use crate::orchestrator::{FailureKind, PipelineRun, RunArtifacts, RunFailure, RunStatus};
use crate::plan::CrawlPlan;
use crate::schema::DatabaseSchema;
use crate::state::PipelineStage;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Storage, StorageError, StorageResult};
use crate::storage::{content_hash, from_db_time, to_db_time, Snapshot, SnapshotPosition};
use crate::StrataError;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use std::path::Path;

const MODELS_TABLE: &str = "structural_models";
const SCHEMAS_TABLE: &str = "database_schemas";
const PLANS_TABLE: &str = "crawl_plans";

const SNAPSHOT_COLUMNS: &str = "s.id, s.site_id, s.url, s.fetch_time, s.content_hash, s.content_type, b.raw_bytes";

const RUN_COLUMNS: &str = "id, site_id, fingerprint, status, stage, started_at, finished_at, \
     failure_stage, failure_kind, failure_message, model_version, schema_version, plan_version, reused_run";

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(StrataError)` - Failed to open database
    pub fn new(path: &Path) -> Result<Self, StrataError> {
        let conn = Connection::open(path).map_err(StorageError::from)?;

        // Configure SQLite for better performance
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
            PRAGMA mmap_size = 268435456;
        ",
        )
        .map_err(StorageError::from)?;

        initialize_schema(&conn).map_err(StorageError::from)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database (tests and dry runs)
    pub fn open_in_memory() -> Result<Self, StrataError> {
        let conn = Connection::open_in_memory().map_err(StorageError::from)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(StorageError::from)?;
        initialize_schema(&conn).map_err(StorageError::from)?;
        Ok(Self { conn })
    }

    fn find_snapshot(&self, site_id: &str, hash: &str) -> StorageResult<Option<Snapshot>> {
        let sql = format!(
            "SELECT {} FROM snapshots s JOIN snapshot_blobs b ON b.content_hash = s.content_hash
             WHERE s.site_id = ?1 AND s.content_hash = ?2",
            SNAPSHOT_COLUMNS
        );
        let found = self
            .conn
            .query_row(&sql, params![site_id, hash], |row| {
                row_to_snapshot(row).map(|(_, snapshot)| snapshot)
            })
            .optional()?;
        Ok(found)
    }

    fn load_latest<T: DeserializeOwned>(&self, table: &str, site_id: &str) -> StorageResult<Option<T>> {
        let sql = format!(
            "SELECT body FROM {} WHERE site_id = ?1 ORDER BY version DESC LIMIT 1",
            table
        );
        let body: Option<String> = self
            .conn
            .query_row(&sql, params![site_id], |row| row.get(0))
            .optional()?;
        match body {
            Some(body) => Ok(Some(serde_json::from_str(&body)?)),
            None => Ok(None),
        }
    }

    fn load_version<T: DeserializeOwned>(
        &self,
        table: &str,
        site_id: &str,
        version: u32,
    ) -> StorageResult<T> {
        let sql = format!(
            "SELECT body FROM {} WHERE site_id = ?1 AND version = ?2",
            table
        );
        let body: Option<String> = self
            .conn
            .query_row(&sql, params![site_id, version], |row| row.get(0))
            .optional()?;
        let body = body.ok_or_else(|| {
            StorageError::NotFound(format!("{} v{} for site '{}'", table, version, site_id))
        })?;
        Ok(serde_json::from_str(&body)?)
    }
}

impl Storage for SqliteStorage {
    // ===== Snapshots =====

    fn put_snapshot(
        &mut self,
        site_id: &str,
        url: &str,
        raw_bytes: &[u8],
        content_type: &str,
        fetch_time: DateTime<Utc>,
    ) -> StorageResult<Snapshot> {
        let hash = content_hash(raw_bytes);

        if let Some(existing) = self.find_snapshot(site_id, &hash)? {
            return Ok(existing);
        }

        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT OR IGNORE INTO snapshot_blobs (content_hash, content_type, raw_bytes)
             VALUES (?1, ?2, ?3)",
            params![hash, content_type, raw_bytes],
        )?;
        tx.execute(
            "INSERT INTO snapshots (site_id, url, fetch_time, content_hash, content_type)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![site_id, url, to_db_time(&fetch_time), hash, content_type],
        )?;
        tx.commit()?;

        // Round-trip through the stored text so the returned value equals later reads
        let fetch_time = from_db_time(&to_db_time(&fetch_time))
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        Ok(Snapshot {
            site_id: site_id.to_string(),
            url: url.to_string(),
            fetch_time,
            content_hash: hash,
            raw_bytes: raw_bytes.to_vec(),
            content_type: content_type.to_string(),
        })
    }

    fn get_snapshot_bytes(&self, content_hash: &str) -> StorageResult<Vec<u8>> {
        self.conn
            .query_row(
                "SELECT raw_bytes FROM snapshot_blobs WHERE content_hash = ?1",
                params![content_hash],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| StorageError::NotFound(format!("snapshot {}", content_hash)))
    }

    fn get_snapshot(&self, site_id: &str, content_hash: &str) -> StorageResult<Snapshot> {
        self.find_snapshot(site_id, content_hash)?.ok_or_else(|| {
            StorageError::NotFound(format!("snapshot {} for site '{}'", content_hash, site_id))
        })
    }

    fn list_snapshots(
        &self,
        site_id: &str,
        since: Option<DateTime<Utc>>,
        after: Option<&SnapshotPosition>,
        limit: usize,
    ) -> StorageResult<Vec<(SnapshotPosition, Snapshot)>> {
        let sql = format!(
            "SELECT {} FROM snapshots s JOIN snapshot_blobs b ON b.content_hash = s.content_hash
             WHERE s.site_id = ?1
               AND (?2 IS NULL OR s.fetch_time >= ?2)
               AND (?3 IS NULL OR s.fetch_time > ?3 OR (s.fetch_time = ?3 AND s.id > ?4))
             ORDER BY s.fetch_time, s.id
             LIMIT ?5",
            SNAPSHOT_COLUMNS
        );

        let since = since.map(|t| to_db_time(&t));
        let after_time = after.map(|p| p.fetch_time.clone());
        let after_id = after.map(|p| p.row_id);
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(
                params![site_id, since, after_time, after_id, limit],
                row_to_snapshot,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    // ===== Artifacts =====

    fn latest_model(&self, site_id: &str) -> StorageResult<Option<StructuralModel>> {
        self.load_latest(MODELS_TABLE, site_id)
    }

    fn get_model(&self, site_id: &str, version: u32) -> StorageResult<StructuralModel> {
        self.load_version(MODELS_TABLE, site_id, version)
    }

    fn latest_schema(&self, site_id: &str) -> StorageResult<Option<DatabaseSchema>> {
        self.load_latest(SCHEMAS_TABLE, site_id)
    }

    fn get_schema(&self, site_id: &str, version: u32) -> StorageResult<DatabaseSchema> {
        self.load_version(SCHEMAS_TABLE, site_id, version)
    }

    fn latest_plan(&self, site_id: &str) -> StorageResult<Option<CrawlPlan>> {
        self.load_latest(PLANS_TABLE, site_id)
    }

    fn get_plan(&self, site_id: &str, version: u32) -> StorageResult<CrawlPlan> {
        self.load_version(PLANS_TABLE, site_id, version)
    }

    fn commit_artifacts(
        &mut self,
        run: &PipelineRun,
        model: &StructuralModel,
        schema: &DatabaseSchema,
        plan: &CrawlPlan,
    ) -> StorageResult<()> {
        let model_body = serde_json::to_string(model)?;
        let schema_body = serde_json::to_string(schema)?;
        let plan_body = serde_json::to_string(plan)?;

        let tx = self.conn.transaction()?;
        insert_artifact(&tx, MODELS_TABLE, &model.site_id, model.version, &model.created_at, &model_body)?;
        insert_artifact(&tx, SCHEMAS_TABLE, &schema.site_id, schema.version, &schema.created_at, &schema_body)?;
        insert_artifact(&tx, PLANS_TABLE, &plan.site_id, plan.version, &plan.created_at, &plan_body)?;
        write_run(&tx, run)?;
        tx.commit()?;

        Ok(())
    }

    // ===== Run Management =====

    fn create_run(
        &mut self,
        site_id: &str,
        fingerprint: Option<&str>,
        stage: PipelineStage,
    ) -> StorageResult<PipelineRun> {
        let started_at = Utc::now();
        self.conn.execute(
            "INSERT INTO pipeline_runs (site_id, fingerprint, status, stage, started_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                site_id,
                fingerprint,
                RunStatus::Pending.to_db_string(),
                stage.to_db_string(),
                to_db_time(&started_at)
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        self.get_run(id)
    }

    fn update_run(&mut self, run: &PipelineRun) -> StorageResult<()> {
        write_run(&self.conn, run)
    }

    fn get_run(&self, run_id: i64) -> StorageResult<PipelineRun> {
        let sql = format!("SELECT {} FROM pipeline_runs WHERE id = ?1", RUN_COLUMNS);
        self.conn
            .query_row(&sql, params![run_id], row_to_run)
            .optional()?
            .ok_or(StorageError::RunNotFound(run_id))
    }

    fn latest_run(&self, site_id: &str) -> StorageResult<Option<PipelineRun>> {
        let sql = format!(
            "SELECT {} FROM pipeline_runs WHERE site_id = ?1 ORDER BY id DESC LIMIT 1",
            RUN_COLUMNS
        );
        let run = self
            .conn
            .query_row(&sql, params![site_id], row_to_run)
            .optional()?;
        Ok(run)
    }

    fn find_committed_run(
        &self,
        site_id: &str,
        fingerprint: &str,
    ) -> StorageResult<Option<PipelineRun>> {
        let sql = format!(
            "SELECT {} FROM pipeline_runs
             WHERE site_id = ?1 AND fingerprint = ?2 AND status = ?3
             ORDER BY id ASC LIMIT 1",
            RUN_COLUMNS
        );
        let run = self
            .conn
            .query_row(
                &sql,
                params![site_id, fingerprint, RunStatus::Succeeded.to_db_string()],
                row_to_run,
            )
            .optional()?;
        Ok(run)
    }
}

fn insert_artifact(
    conn: &Connection,
    table: &str,
    site_id: &str,
    version: u32,
    created_at: &DateTime<Utc>,
    body: &str,
) -> StorageResult<()> {
    let sql = format!(
        "INSERT INTO {} (site_id, version, created_at, body) VALUES (?1, ?2, ?3, ?4)",
        table
    );
    conn.execute(&sql, params![site_id, version, to_db_time(created_at), body])
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(code, _)
                if code.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StorageError::ConstraintViolation(format!(
                    "{} v{} already exists for site '{}'",
                    table, version, site_id
                ))
            }
            other => StorageError::Sqlite(other),
        })?;
    Ok(())
}

fn write_run(conn: &Connection, run: &PipelineRun) -> StorageResult<()> {
    let (failure_stage, failure_kind, failure_message) = match &run.failure {
        Some(f) => (
            Some(f.stage.to_db_string()),
            Some(f.kind.to_db_string()),
            Some(f.message.as_str()),
        ),
        None => (None, None, None),
    };
    let (model_version, schema_version, plan_version) = match &run.artifacts {
        Some(a) => (
            Some(a.model_version),
            Some(a.schema_version),
            Some(a.plan_version),
        ),
        None => (None, None, None),
    };

    let changed = conn.execute(
        "UPDATE pipeline_runs SET
            fingerprint = ?1, status = ?2, stage = ?3, finished_at = ?4,
            failure_stage = ?5, failure_kind = ?6, failure_message = ?7,
            model_version = ?8, schema_version = ?9, plan_version = ?10, reused_run = ?11
         WHERE id = ?12",
        params![
            run.fingerprint,
            run.status.to_db_string(),
            run.stage.to_db_string(),
            run.finished_at.as_ref().map(to_db_time),
            failure_stage,
            failure_kind,
            failure_message,
            model_version,
            schema_version,
            plan_version,
            run.reused_run,
            run.id,
        ],
    )?;

    if changed == 0 {
        return Err(StorageError::RunNotFound(run.id));
    }
    Ok(())
}

fn time_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    from_db_time(&text).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn invalid_enum(idx: usize, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        format!("unknown value '{}'", value).into(),
    )
}

fn row_to_snapshot(row: &Row<'_>) -> rusqlite::Result<(SnapshotPosition, Snapshot)> {
    let row_id: i64 = row.get(0)?;
    let fetch_text: String = row.get(3)?;
    let snapshot = Snapshot {
        site_id: row.get(1)?,
        url: row.get(2)?,
        fetch_time: time_column(row, 3)?,
        content_hash: row.get(4)?,
        content_type: row.get(5)?,
        raw_bytes: row.get(6)?,
    };
    Ok((
        SnapshotPosition {
            fetch_time: fetch_text,
            row_id,
        },
        snapshot,
    ))
}

fn row_to_run(row: &Row<'_>) -> rusqlite::Result<PipelineRun> {
    let status_text: String = row.get(3)?;
    let status = RunStatus::from_db_string(&status_text).ok_or_else(|| invalid_enum(3, &status_text))?;
    let stage_text: String = row.get(4)?;
    let stage =
        PipelineStage::from_db_string(&stage_text).ok_or_else(|| invalid_enum(4, &stage_text))?;

    let finished_at = match row.get::<_, Option<String>>(6)? {
        Some(_) => Some(time_column(row, 6)?),
        None => None,
    };

    let failure_stage: Option<String> = row.get(7)?;
    let failure_kind: Option<String> = row.get(8)?;
    let failure = match (failure_stage, failure_kind) {
        (Some(stage_text), Some(kind_text)) => Some(RunFailure {
            stage: PipelineStage::from_db_string(&stage_text)
                .ok_or_else(|| invalid_enum(7, &stage_text))?,
            kind: FailureKind::from_db_string(&kind_text)
                .ok_or_else(|| invalid_enum(8, &kind_text))?,
            message: row.get::<_, Option<String>>(9)?.unwrap_or_default(),
        }),
        _ => None,
    };

    let versions: (Option<u32>, Option<u32>, Option<u32>) = (row.get(10)?, row.get(11)?, row.get(12)?);
    let artifacts = match versions {
        (Some(model_version), Some(schema_version), Some(plan_version)) => Some(RunArtifacts {
            model_version,
            schema_version,
            plan_version,
        }),
        _ => None,
    };

    Ok(PipelineRun {
        id: row.get(0)?,
        site_id: row.get(1)?,
        fingerprint: row.get(2)?,
        status,
        stage,
        started_at: time_column(row, 5)?,
        finished_at,
        failure,
        artifacts,
        reused_run: row.get(13)?,
    })
}
