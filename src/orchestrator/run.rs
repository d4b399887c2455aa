//! Pipeline run records

use crate::state::PipelineStage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl RunStatus {
    /// Converts the status to a database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    /// Parses a status from a database string representation
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

/// Why a run failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The fetching stage produced no snapshot
    Fetch,
    /// Analysis found nothing that could be crawled
    IncompleteModel,
    Storage,
    Cancelled,
    /// The run was abandoned by a panic
    Internal,
}

impl FailureKind {
    /// Converts the kind to a database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Fetch => "fetch",
            Self::IncompleteModel => "incomplete_model",
            Self::Storage => "storage",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal",
        }
    }

    /// Parses a kind from a database string representation
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "fetch" => Some(Self::Fetch),
            "incomplete_model" => Some(Self::IncompleteModel),
            "storage" => Some(Self::Storage),
            "cancelled" => Some(Self::Cancelled),
            "internal" => Some(Self::Internal),
            _ => None,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

/// Stage and cause of a failed run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFailure {
    pub stage: PipelineStage,
    pub kind: FailureKind,
    pub message: String,
}

/// Versions committed by a successful run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunArtifacts {
    pub model_version: u32,
    pub schema_version: u32,
    pub plan_version: u32,
}

/// One execution (or cache hit) of the pipeline for a site
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: i64,
    pub site_id: String,
    /// Unknown until the snapshot set is known (after fetching, for seed runs)
    pub fingerprint: Option<String>,
    pub status: RunStatus,
    pub stage: PipelineStage,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub failure: Option<RunFailure>,
    pub artifacts: Option<RunArtifacts>,
    /// Set when the run returned the artifacts of an earlier run with the same fingerprint
    pub reused_run: Option<i64>,
}

impl PipelineRun {
    /// Moves the run to `stage`, marking it running
    ///
    /// Returns false (and leaves the run untouched) for transitions the stage
    /// machine does not allow.
    pub fn advance(&mut self, stage: PipelineStage) -> bool {
        if !self.stage.can_transition_to(stage) {
            return false;
        }
        self.stage = stage;
        self.status = RunStatus::Running;
        true
    }

    pub fn succeed(&mut self, artifacts: RunArtifacts) {
        self.stage = PipelineStage::Committed;
        self.status = RunStatus::Succeeded;
        self.artifacts = Some(artifacts);
        self.finished_at = Some(Utc::now());
    }

    /// Records a failure in the current stage
    pub fn fail(&mut self, kind: FailureKind, message: impl Into<String>) {
        self.failure = Some(RunFailure {
            stage: self.stage,
            kind,
            message: message.into(),
        });
        self.stage = PipelineStage::Failed;
        self.status = RunStatus::Failed;
        self.finished_at = Some(Utc::now());
    }
}
