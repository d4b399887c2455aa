//! Storage traits and error types
//!
//! This module defines the trait interface for storage backends and
//! associated error types.

use crate::analyzer::StructuralModel;
use crate::orchestrator::PipelineRun;
use crate::plan::CrawlPlan;
use crate::schema::DatabaseSchema;
use crate::state::PipelineStage;
use crate::storage::{Snapshot, SnapshotPosition};
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Storage lock poisoned: {0}")]
    Lock(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for storage backend implementations
///
/// This trait defines all database operations needed by the pipeline.
/// Artifact tables are append-only: a version, once written, is never rewritten.
pub trait Storage {
    // ===== Snapshots =====

    /// Records a response body for a site
    ///
    /// The body is stored once per content hash. If the site already holds a
    /// snapshot with the same hash, that snapshot is returned unchanged and
    /// `url`/`fetch_time` are ignored.
    ///
    /// # Arguments
    ///
    /// * `site_id` - The site the response belongs to
    /// * `url` - The normalized URL the body was fetched from
    /// * `raw_bytes` - The response body
    /// * `content_type` - The response media type
    /// * `fetch_time` - When the response was received
    fn put_snapshot(
        &mut self,
        site_id: &str,
        url: &str,
        raw_bytes: &[u8],
        content_type: &str,
        fetch_time: DateTime<Utc>,
    ) -> StorageResult<Snapshot>;

    /// Gets the raw bytes stored under a content hash
    fn get_snapshot_bytes(&self, content_hash: &str) -> StorageResult<Vec<u8>>;

    /// Gets a site's snapshot by content hash
    fn get_snapshot(&self, site_id: &str, content_hash: &str) -> StorageResult<Snapshot>;

    /// Lists a page of a site's snapshots ordered by (fetch_time, row id)
    ///
    /// # Arguments
    ///
    /// * `since` - Only snapshots fetched at or after this instant
    /// * `after` - Resume strictly after this position
    /// * `limit` - Maximum number of rows returned
    fn list_snapshots(
        &self,
        site_id: &str,
        since: Option<DateTime<Utc>>,
        after: Option<&SnapshotPosition>,
        limit: usize,
    ) -> StorageResult<Vec<(SnapshotPosition, Snapshot)>>;

    // ===== Artifacts =====

    /// Gets the highest structural model version of a site
    fn latest_model(&self, site_id: &str) -> StorageResult<Option<StructuralModel>>;

    /// Gets one structural model version
    fn get_model(&self, site_id: &str, version: u32) -> StorageResult<StructuralModel>;

    /// Gets the highest schema version of a site
    fn latest_schema(&self, site_id: &str) -> StorageResult<Option<DatabaseSchema>>;

    /// Gets one schema version
    fn get_schema(&self, site_id: &str, version: u32) -> StorageResult<DatabaseSchema>;

    /// Gets the highest crawl plan version of a site
    fn latest_plan(&self, site_id: &str) -> StorageResult<Option<CrawlPlan>>;

    /// Gets one crawl plan version
    fn get_plan(&self, site_id: &str, version: u32) -> StorageResult<CrawlPlan>;

    /// Writes model, schema and plan and marks the run succeeded
    ///
    /// All four writes happen in a single transaction: either every artifact
    /// becomes visible together with the run's new status, or nothing changes.
    fn commit_artifacts(
        &mut self,
        run: &PipelineRun,
        model: &StructuralModel,
        schema: &DatabaseSchema,
        plan: &CrawlPlan,
    ) -> StorageResult<()>;

    // ===== Run Management =====

    /// Creates a new pipeline run in the pending state
    ///
    /// # Returns
    ///
    /// The freshly stored run, including its ID
    fn create_run(
        &mut self,
        site_id: &str,
        fingerprint: Option<&str>,
        stage: PipelineStage,
    ) -> StorageResult<PipelineRun>;

    /// Overwrites the mutable columns of a run (status, stage, failure, artifacts)
    fn update_run(&mut self, run: &PipelineRun) -> StorageResult<()>;

    /// Gets a run by ID
    fn get_run(&self, run_id: i64) -> StorageResult<PipelineRun>;

    /// Gets the most recent run of a site
    fn latest_run(&self, site_id: &str) -> StorageResult<Option<PipelineRun>>;

    /// Gets the first succeeded run of a site with the given fingerprint
    fn find_committed_run(
        &self,
        site_id: &str,
        fingerprint: &str,
    ) -> StorageResult<Option<PipelineRun>>;
}
