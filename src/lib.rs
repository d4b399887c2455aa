//! Sumi-Strata: infers a site's storage schema and crawl plan
//!
//! This crate samples a website (or a set of already captured responses), clusters
//! the pages by structure, infers the fields each cluster carries, and derives two
//! artifacts that are kept consistent with each other across runs: a versioned
//! database schema and an executable crawl plan.

pub mod analyzer;
pub mod config;
pub mod crawler;
pub mod orchestrator;
pub mod output;
pub mod plan;
pub mod robots;
pub mod schema;
pub mod state;
pub mod storage;
pub mod url;

use thiserror::Error;

/// Main error type for Sumi-Strata operations
#[derive(Debug, Error)]
pub enum StrataError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("URL error: {0}")]
    Url(#[from] UrlError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("{0}")]
    Client(#[from] crawler::ClientBuildError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Inference error: {0}")]
    Inference(#[from] InferenceError),

    #[error("{0}")]
    IncompleteModel(#[from] IncompleteModelError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] orchestrator::PipelineError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// URL-specific errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing host in URL")]
    MissingHost,

    #[error("Malformed URL: {0}")]
    Malformed(String),
}

/// A fetch that could not produce a durable snapshot
///
/// Transient causes (timeouts, connection failures, 429 and 5xx responses) are
/// retried inside the fetcher; this error is only returned once the retry budget
/// is spent or the failure is not retryable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("fetch of {url} failed after {attempts} attempt(s): {kind}")]
pub struct FetchError {
    pub url: String,
    pub kind: FetchErrorKind,
    pub attempts: u32,
}

/// Classification of fetch failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchErrorKind {
    #[error("disallowed by robots.txt")]
    Blocked,

    #[error("request timed out")]
    Timeout,

    #[error("HTTP status {0}")]
    HttpError(u16),

    #[error("network error: {0}")]
    NetworkError(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("snapshot store rejected the response: {0}")]
    Storage(String),
}

impl FetchErrorKind {
    /// Returns true if another attempt may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout | Self::NetworkError(_) => true,
            Self::HttpError(status) => *status == 429 || (500..600).contains(status),
            Self::Blocked | Self::InvalidUrl(_) | Self::Storage(_) => false,
        }
    }
}

/// Failures of the field inference capability
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InferenceError {
    #[error("inference request timed out")]
    Timeout,

    #[error("inference service is rate limiting requests")]
    RateLimited,

    #[error("malformed inference response: {0}")]
    MalformedResponse(String),
}

/// Raised when a structural model carries nothing that can be crawled
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("structural model v{version} for site '{site_id}' has no resolved node patterns")]
pub struct IncompleteModelError {
    pub site_id: String,
    pub version: u32,
}

/// Result type alias for Sumi-Strata operations
pub type Result<T> = std::result::Result<T, StrataError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use analyzer::{Analyzer, FieldInference, StructuralModel};
pub use config::Config;
pub use orchestrator::{Orchestrator, PipelineRun, RunInput};
pub use plan::CrawlPlan;
pub use schema::DatabaseSchema;
pub use state::PipelineStage;
pub use storage::Snapshot;
pub use url::normalize_url;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_fetch_kinds() {
        assert!(FetchErrorKind::Timeout.is_transient());
        assert!(FetchErrorKind::NetworkError("reset".into()).is_transient());
        assert!(FetchErrorKind::HttpError(429).is_transient());
        assert!(FetchErrorKind::HttpError(503).is_transient());
        assert!(!FetchErrorKind::HttpError(404).is_transient());
        assert!(!FetchErrorKind::Blocked.is_transient());
    }

    #[test]
    fn test_fetch_error_message_names_url() {
        let err = FetchError {
            url: "https://example.com/x".to_string(),
            kind: FetchErrorKind::HttpError(404),
            attempts: 1,
        };
        let message = err.to_string();
        assert!(message.contains("https://example.com/x"));
        assert!(message.contains("404"));
    }
}
