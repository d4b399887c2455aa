//! Pipeline orchestration
//!
//! Each run of a site's pipeline walks a fixed stage machine:
//!
//! ```text
//! Idle -> Fetching -> Analyzing -> Deriving -> Committed
//!   \________\___________\___________\______-> Failed
//! ```
//!
//! - A run's fingerprint identifies its input; a fingerprint that already has a
//!   committed run is answered from that run without recomputation
//! - At most one run per site is in flight; other callers wait for it or are
//!   rejected, depending on `on-conflict`
//! - Model, schema and plan are committed in one transaction, so a failed or
//!   cancelled run never disturbs what an earlier run committed
//! - Stage-internal retries belong to the stages; a failed run is recorded and
//!   reported, never retried here

mod fingerprint;
mod registry;
mod run;

pub use fingerprint::fingerprint;
pub use registry::{RunOutcome, RunRegistry};
pub use run::{FailureKind, PipelineRun, RunArtifacts, RunFailure, RunStatus};

use crate::analyzer::{inference_from_config, Analyzer, FieldInference, StructuralModel};
use crate::config::{compute_analysis_digest, Config, ConflictPolicy};
use crate::crawler::{discover, Fetcher, ReqwestTransport, Transport};
use crate::plan::{generate, CrawlPlan};
use crate::schema::{derive, DatabaseSchema};
use crate::state::PipelineStage;
use crate::storage::{
    lock, open_storage, SharedStorage, Snapshot, SnapshotStore, SqliteStorage, Storage, StorageError,
    StorageResult,
};
use crate::StrataError;
use registry::{Entry, SlotOwner};
use std::fmt;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// What a run starts from
#[derive(Debug, Clone)]
pub enum RunInput {
    /// Crawl the site from these URLs first
    Seeds(Vec<String>),
    /// Analyze these responses; they are archived under the run's site first
    Snapshots(Vec<Snapshot>),
    /// Analyze every snapshot already archived for the site
    Stored,
}

/// Errors surfaced to callers of the orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("a pipeline run for site '{site_id}' is already in progress")]
    AlreadyRunning { site_id: String },

    #[error("run {run_id} for site '{site_id}' failed during {stage} ({kind}): {cause}")]
    PipelineFailed {
        site_id: String,
        run_id: i64,
        stage: PipelineStage,
        kind: FailureKind,
        cause: String,
    },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl From<StorageError> for PipelineError {
    fn from(err: StorageError) -> Self {
        Self::Storage(err.to_string())
    }
}

/// Sequences fetch, analysis, schema derivation and plan generation per site
#[derive(Clone)]
pub struct Orchestrator {
    config: Arc<Config>,
    storage: SharedStorage,
    store: SnapshotStore,
    fetcher: Arc<Fetcher>,
    analyzer: Arc<Analyzer>,
    registry: Arc<RunRegistry>,
    config_digest: String,
}

impl Orchestrator {
    /// Creates an orchestrator
    ///
    /// # Arguments
    ///
    /// * `config` - Full configuration
    /// * `storage` - Shared database handle; snapshots, artifacts and runs live here
    /// * `transport` - Network boundary used by the fetcher (robots.txt included)
    /// * `inference` - Field inference capability used by the analyzer
    pub fn new(
        config: Config,
        storage: SharedStorage,
        transport: Arc<dyn Transport>,
        inference: Arc<dyn FieldInference>,
    ) -> Self {
        let store = SnapshotStore::new(storage.clone());
        let fetcher = Fetcher::new(transport, store.clone(), &config.fetcher, &config.user_agent);
        let analyzer = Analyzer::new(inference, &config.analyzer);
        let config_digest = compute_analysis_digest(&config);

        Self {
            config: Arc::new(config),
            storage,
            store,
            fetcher: Arc::new(fetcher),
            analyzer: Arc::new(analyzer),
            registry: Arc::new(RunRegistry::new()),
            config_digest,
        }
    }

    /// Creates an orchestrator with the production stack: the SQLite file named by
    /// the config, a reqwest transport and the configured inference capability
    pub fn from_config(config: Config) -> Result<Self, StrataError> {
        let storage = open_storage(std::path::Path::new(&config.storage.database_path))?;
        let transport = ReqwestTransport::from_config(&config.user_agent, &config.fetcher)?;
        let inference = inference_from_config(&config.inference)?;
        Ok(Self::new(
            config,
            Arc::new(Mutex::new(storage)),
            Arc::new(transport),
            inference,
        ))
    }

    pub fn snapshot_store(&self) -> &SnapshotStore {
        &self.store
    }

    /// Runs the pipeline for a site
    ///
    /// # Arguments
    ///
    /// * `site_id` - The site
    /// * `input` - Seed URLs to crawl, or snapshots to analyze
    ///
    /// # Returns
    ///
    /// * `Ok(PipelineRun)` - A succeeded run (possibly answered from an earlier run
    ///   with the same fingerprint, see `reused_run`)
    /// * `Err(PipelineError::AlreadyRunning)` - The site is busy and `on-conflict` is `reject`
    /// * `Err(PipelineError::PipelineFailed)` - The run failed; the failure is recorded on it
    pub async fn run(&self, site_id: &str, input: RunInput) -> Result<PipelineRun, PipelineError> {
        validate_input(site_id, &input)?;
        let slot = self.registry.slot(site_id);

        loop {
            match slot.enter() {
                Entry::Owner(owner) => {
                    let outcome = self.execute(&owner, site_id, input).await;
                    return owner.finish(outcome);
                }
                Entry::Joined(mut rx) => {
                    if self.config.orchestrator.on_conflict == ConflictPolicy::Reject {
                        info!("Rejecting run for '{}': a run is already in progress", site_id);
                        return Err(PipelineError::AlreadyRunning {
                            site_id: site_id.to_string(),
                        });
                    }
                    debug!("Waiting for the in-flight run of '{}'", site_id);
                    let shared = match rx.wait_for(|outcome| outcome.is_some()).await {
                        Ok(outcome) => outcome.clone(),
                        Err(_) => None,
                    };
                    match shared {
                        Some(outcome) => return outcome,
                        // The owner went away without an outcome; compete for the slot again
                        None => continue,
                    }
                }
            }
        }
    }

    /// Starts a seed run in the background
    pub fn submit(&self, site_id: &str, seeds: Vec<String>) -> JoinHandle<RunOutcome> {
        let this = self.clone();
        let site_id = site_id.to_string();
        tokio::spawn(async move { this.run(&site_id, RunInput::Seeds(seeds)).await })
    }

    /// Requests cancellation of the site's in-flight run
    ///
    /// The run stops at its next stage boundary and is recorded as failed with
    /// kind `cancelled`. Returns false if no run was in flight.
    pub fn cancel(&self, site_id: &str) -> bool {
        let requested = self.registry.slot(site_id).request_cancel();
        if requested {
            info!("Cancellation requested for '{}'", site_id);
        }
        requested
    }

    pub fn is_running(&self, site_id: &str) -> bool {
        self.registry.is_running(site_id)
    }

    /// The site's most recent run
    pub fn status(&self, site_id: &str) -> Result<Option<PipelineRun>, PipelineError> {
        Ok(self.with_storage(|s| s.latest_run(site_id))?)
    }

    pub fn run_by_id(&self, run_id: i64) -> Result<PipelineRun, PipelineError> {
        Ok(self.with_storage(|s| s.get_run(run_id))?)
    }

    pub fn latest_schema(&self, site_id: &str) -> Result<Option<DatabaseSchema>, PipelineError> {
        Ok(self.with_storage(|s| s.latest_schema(site_id))?)
    }

    pub fn latest_plan(&self, site_id: &str) -> Result<Option<CrawlPlan>, PipelineError> {
        Ok(self.with_storage(|s| s.latest_plan(site_id))?)
    }

    pub fn latest_model(&self, site_id: &str) -> Result<Option<StructuralModel>, PipelineError> {
        Ok(self.with_storage(|s| s.latest_model(site_id))?)
    }

    pub fn schema_version(&self, site_id: &str, version: u32) -> Result<DatabaseSchema, PipelineError> {
        Ok(self.with_storage(|s| s.get_schema(site_id, version))?)
    }

    pub fn plan_version(&self, site_id: &str, version: u32) -> Result<CrawlPlan, PipelineError> {
        Ok(self.with_storage(|s| s.get_plan(site_id, version))?)
    }

    pub fn model_version(&self, site_id: &str, version: u32) -> Result<StructuralModel, PipelineError> {
        Ok(self.with_storage(|s| s.get_model(site_id, version))?)
    }

    // ===== Pipeline =====

    async fn execute(&self, owner: &SlotOwner, site_id: &str, input: RunInput) -> RunOutcome {
        // Snapshot inputs are known up front and can be fingerprinted before any work
        let known = match input {
            RunInput::Seeds(seeds) => Err(seeds),
            RunInput::Snapshots(snapshots) => Ok(self.archive(site_id, &snapshots)?),
            RunInput::Stored => Ok(self.stored(site_id)?),
        };
        let fingerprint = known.as_ref().ok().map(|s| self.fingerprint_of(site_id, s));

        let mut run = self.with_storage(|s| s.create_run(site_id, fingerprint.as_deref(), PipelineStage::Idle))?;
        info!("Run {} started for '{}'", run.id, site_id);

        let mut unsettled = Unsettled::new(self.storage.clone(), run.id);
        let outcome = self.drive(owner, &mut run, site_id, known).await;
        unsettled.settle();
        outcome
    }

    /// Walks the stages of a recorded run; every exit records the run's outcome
    async fn drive(
        &self,
        owner: &SlotOwner,
        run: &mut PipelineRun,
        site_id: &str,
        known: Result<Vec<Snapshot>, Vec<String>>,
    ) -> RunOutcome {
        if self.reuse_committed(run)? {
            return Ok(run.clone());
        }

        let snapshots = match known {
            Ok(snapshots) => snapshots,
            Err(seeds) => {
                self.transition(run, PipelineStage::Fetching)?;
                let outcome = discover(self.fetcher.clone(), site_id, &seeds, &self.config.discovery).await;
                for failure in &outcome.failures {
                    debug!("Run {}: {}", run.id, failure);
                }
                if outcome.snapshots.is_empty() {
                    let cause = outcome
                        .failures
                        .first()
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| "no page could be fetched".to_string());
                    return Err(self.fail(run, FailureKind::Fetch, cause));
                }
                run.fingerprint = Some(self.fingerprint_of(site_id, &outcome.snapshots));
                if self.reuse_committed(run)? {
                    return Ok(run.clone());
                }
                outcome.snapshots
            }
        };

        if snapshots.is_empty() {
            return Err(self.fail(run, FailureKind::Fetch, "no snapshots to analyze"));
        }

        self.checkpoint(owner, run)?;
        self.transition(run, PipelineStage::Analyzing)?;
        let prior_model = self.recorded(run, FailureKind::Storage, |s| s.latest_model(site_id))?;
        let model = self.analyzer.analyze(site_id, &snapshots, prior_model.as_ref()).await;

        self.checkpoint(owner, run)?;
        self.transition(run, PipelineStage::Deriving)?;
        let prior_schema = self.recorded(run, FailureKind::Storage, |s| s.latest_schema(site_id))?;
        let schema = derive(&model, prior_schema.as_ref());
        let plan = match generate(&model, &schema, &self.config.planner) {
            Ok(plan) => plan,
            Err(e) => return Err(self.fail(run, FailureKind::IncompleteModel, e.to_string())),
        };

        self.checkpoint(owner, run)?;
        let mut committed = run.clone();
        committed.succeed(RunArtifacts {
            model_version: model.version,
            schema_version: schema.version,
            plan_version: plan.version,
        });
        if let Err(e) = self.with_storage(|s| s.commit_artifacts(&committed, &model, &schema, &plan)) {
            return Err(self.fail(run, FailureKind::Storage, e.to_string()));
        }

        info!(
            "Run {} committed for '{}': model v{}, {} table(s), {} rule(s)",
            committed.id,
            site_id,
            model.version,
            schema.tables.len(),
            plan.rules.len()
        );
        Ok(committed)
    }

    /// Answers the run from an earlier committed run with the same fingerprint
    fn reuse_committed(&self, run: &mut PipelineRun) -> Result<bool, PipelineError> {
        let Some(fingerprint) = run.fingerprint.clone() else {
            return Ok(false);
        };
        let site_id = run.site_id.clone();
        let earlier = self.recorded(run, FailureKind::Storage, |s| s.find_committed_run(&site_id, &fingerprint))?;
        let Some((earlier_id, artifacts)) = earlier.and_then(|r| r.artifacts.map(|a| (r.id, a))) else {
            return Ok(false);
        };

        run.reused_run = Some(earlier_id);
        run.succeed(artifacts);
        self.with_storage(|s| s.update_run(run))?;
        info!(
            "Run {} for '{}' reuses the artifacts of run {}",
            run.id, run.site_id, earlier_id
        );
        Ok(true)
    }

    /// Stage boundary: honors a pending cancellation
    fn checkpoint(&self, owner: &SlotOwner, run: &mut PipelineRun) -> Result<(), PipelineError> {
        if owner.is_cancelled() {
            return Err(self.fail(run, FailureKind::Cancelled, "cancelled by caller"));
        }
        Ok(())
    }

    fn transition(&self, run: &mut PipelineRun, stage: PipelineStage) -> Result<(), PipelineError> {
        if !run.advance(stage) {
            warn!("Run {}: unexpected transition {} -> {}", run.id, run.stage, stage);
        }
        info!("Run {} for '{}': {}", run.id, run.site_id, run.stage);
        let result = self.with_storage(|s| s.update_run(run));
        self.recorded(run, FailureKind::Storage, |_| result)
    }

    /// Records the failure on the run and builds the caller-facing error
    fn fail(&self, run: &mut PipelineRun, kind: FailureKind, cause: impl fmt::Display) -> PipelineError {
        let cause = cause.to_string();
        let stage = run.stage;
        run.fail(kind, cause.clone());
        error!(
            "Run {} for '{}' failed during {} ({}): {}",
            run.id, run.site_id, stage, kind, cause
        );
        if let Err(e) = self.with_storage(|s| s.update_run(run)) {
            error!("Could not record failure of run {}: {}", run.id, e);
        }
        PipelineError::PipelineFailed {
            site_id: run.site_id.clone(),
            run_id: run.id,
            stage,
            kind,
            cause,
        }
    }

    /// Storage access during a run; errors fail the run
    fn recorded<T>(
        &self,
        run: &mut PipelineRun,
        kind: FailureKind,
        op: impl FnOnce(&mut SqliteStorage) -> StorageResult<T>,
    ) -> Result<T, PipelineError> {
        self.with_storage(op).map_err(|e| self.fail(run, kind, e))
    }

    fn with_storage<T>(&self, op: impl FnOnce(&mut SqliteStorage) -> StorageResult<T>) -> StorageResult<T> {
        let mut guard = lock(&self.storage)?;
        op(&mut guard)
    }

    /// Archives caller-supplied snapshots under `site_id`, keeping their fetch times
    fn archive(&self, site_id: &str, snapshots: &[Snapshot]) -> StorageResult<Vec<Snapshot>> {
        self.with_storage(|s| {
            snapshots
                .iter()
                .map(|snap| {
                    s.put_snapshot(
                        site_id,
                        &snap.url,
                        &snap.raw_bytes,
                        &snap.content_type,
                        snap.fetch_time,
                    )
                })
                .collect()
        })
    }

    fn stored(&self, site_id: &str) -> StorageResult<Vec<Snapshot>> {
        self.store.list(site_id, None).collect()
    }

    fn fingerprint_of(&self, site_id: &str, snapshots: &[Snapshot]) -> String {
        fingerprint(
            site_id,
            snapshots.iter().map(|s| s.content_hash.as_str()),
            &self.config_digest,
        )
    }
}

/// Records a run as failed if it is left before reaching an outcome
///
/// That happens when the run future is dropped (recorded as `cancelled`) or when
/// a panic unwinds through it (recorded as `internal`).
struct Unsettled {
    storage: SharedStorage,
    run_id: i64,
    armed: bool,
}

impl Unsettled {
    fn new(storage: SharedStorage, run_id: i64) -> Self {
        Self {
            storage,
            run_id,
            armed: true,
        }
    }

    fn settle(&mut self) {
        self.armed = false;
    }
}

impl Drop for Unsettled {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let (kind, cause) = if std::thread::panicking() {
            (FailureKind::Internal, "run aborted by a panic")
        } else {
            (FailureKind::Cancelled, "run abandoned before completion")
        };
        // The panic may have poisoned the lock; the connection itself is still usable
        let mut storage = self.storage.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let current = storage.get_run(self.run_id);
        let recorded = match current {
            Ok(run) if run.status.is_finished() => Ok(()),
            Ok(mut run) => {
                run.fail(kind, cause);
                storage.update_run(&run)
            }
            Err(e) => Err(e),
        };
        match recorded {
            Ok(()) => error!("Run {} {}", self.run_id, cause),
            Err(e) => error!("Could not record abandoned run {}: {}", self.run_id, e),
        }
    }
}

fn validate_input(site_id: &str, input: &RunInput) -> Result<(), PipelineError> {
    if site_id.trim().is_empty() {
        return Err(PipelineError::InvalidInput("site id must not be empty".to_string()));
    }
    match input {
        RunInput::Seeds(seeds) if seeds.is_empty() => {
            Err(PipelineError::InvalidInput("at least one seed URL is required".to_string()))
        }
        RunInput::Snapshots(snapshots) if snapshots.is_empty() => {
            Err(PipelineError::InvalidInput("at least one snapshot is required".to_string()))
        }
        _ => Ok(()),
    }
}
