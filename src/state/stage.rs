/// Pipeline stage definitions for tracking run progress
///
/// A run moves through the stages in a fixed order and ends in either
/// `Committed` or `Failed`.
use serde::{Deserialize, Serialize};
use std::fmt;

/// Represents the current stage of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    // ===== Active Stages =====
    /// Run accepted, nothing started yet
    Idle,

    /// Sampling pages into the snapshot store
    Fetching,

    /// Clustering snapshots and inferring fields
    Analyzing,

    /// Deriving the schema and crawl plan
    Deriving,

    // ===== Terminal Stages =====
    /// Model, schema and plan were committed together
    Committed,

    /// The run stopped; prior artifacts are untouched
    Failed,
}

impl PipelineStage {
    /// Returns true if no further transitions are possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Committed | Self::Failed)
    }

    /// Returns true if this is an active stage
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Checks a stage transition
    ///
    /// Active stages advance one step at a time (`Idle` may skip `Fetching` when the
    /// run starts from stored snapshots). Any active stage may fail.
    pub fn can_transition_to(&self, next: PipelineStage) -> bool {
        use PipelineStage::*;
        match (self, next) {
            (from, Failed) => from.is_active(),
            (Idle, Fetching) | (Idle, Analyzing) => true,
            (Fetching, Analyzing) => true,
            (Analyzing, Deriving) => true,
            (Deriving, Committed) => true,
            _ => false,
        }
    }

    /// Converts the stage to a database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Fetching => "fetching",
            Self::Analyzing => "analyzing",
            Self::Deriving => "deriving",
            Self::Committed => "committed",
            Self::Failed => "failed",
        }
    }

    /// Parses a stage from a database string representation
    ///
    /// Returns None if the string doesn't match any known stage.
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(Self::Idle),
            "fetching" => Some(Self::Fetching),
            "analyzing" => Some(Self::Analyzing),
            "deriving" => Some(Self::Deriving),
            "committed" => Some(Self::Committed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Returns all stages in pipeline order
    pub fn all_stages() -> Vec<Self> {
        vec![
            Self::Idle,
            Self::Fetching,
            Self::Analyzing,
            Self::Deriving,
            Self::Committed,
            Self::Failed,
        ]
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_terminal() {
        assert!(PipelineStage::Committed.is_terminal());
        assert!(PipelineStage::Failed.is_terminal());
        assert!(!PipelineStage::Idle.is_terminal());
        assert!(!PipelineStage::Deriving.is_terminal());
    }

    #[test]
    fn test_linear_transitions() {
        use PipelineStage::*;
        assert!(Idle.can_transition_to(Fetching));
        assert!(Fetching.can_transition_to(Analyzing));
        assert!(Analyzing.can_transition_to(Deriving));
        assert!(Deriving.can_transition_to(Committed));

        assert!(!Fetching.can_transition_to(Deriving));
        assert!(!Analyzing.can_transition_to(Committed));
        assert!(!Deriving.can_transition_to(Analyzing));
    }

    #[test]
    fn test_snapshot_runs_skip_fetching() {
        assert!(PipelineStage::Idle.can_transition_to(PipelineStage::Analyzing));
    }

    #[test]
    fn test_failure_from_any_active_stage() {
        for stage in PipelineStage::all_stages() {
            assert_eq!(
                stage.can_transition_to(PipelineStage::Failed),
                stage.is_active(),
                "{}",
                stage
            );
        }
    }

    #[test]
    fn test_terminal_stages_are_final() {
        for next in PipelineStage::all_stages() {
            assert!(!PipelineStage::Committed.can_transition_to(next));
            assert!(!PipelineStage::Failed.can_transition_to(next));
        }
    }

    #[test]
    fn test_roundtrip_db_string() {
        for stage in PipelineStage::all_stages() {
            assert_eq!(PipelineStage::from_db_string(stage.to_db_string()), Some(stage));
        }
        assert_eq!(PipelineStage::from_db_string("paused"), None);
    }
}
