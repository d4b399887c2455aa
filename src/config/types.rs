use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Main configuration structure for Sumi-Strata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    #[serde(default)]
    pub fetcher: FetcherConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub analyzer: AnalyzerConfig,
    #[serde(default)]
    pub inference: InferenceConfig,
    #[serde(default)]
    pub planner: PlannerConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    pub storage: StorageConfig,
}

/// User agent identification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAgentConfig {
    /// Name of the crawler, also used as the robots.txt product token
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    /// Version of the crawler
    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the crawler
    #[serde(rename = "contact-url")]
    pub contact_url: String,

    /// Email address for crawler-related contact
    #[serde(rename = "contact-email")]
    pub contact_email: String,
}

impl UserAgentConfig {
    /// Formats the full user agent header: `Name/Version (+ContactURL; ContactEmail)`
    pub fn header_value(&self) -> String {
        format!(
            "{}/{} (+{}; {})",
            self.crawler_name, self.crawler_version, self.contact_url, self.contact_email
        )
    }
}

/// Fetcher politeness and retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct FetcherConfig {
    /// Sustained request rate per host (token refill rate)
    pub requests_per_second: f64,

    /// Number of requests a host may receive back to back
    pub burst: u32,

    /// Total attempts per URL, including the first one
    pub max_attempts: u32,

    /// Delay before the first retry (milliseconds), doubled on each retry
    pub initial_backoff_ms: u64,

    /// Upper bound for a single backoff delay (milliseconds)
    pub max_backoff_ms: u64,

    /// Whole-request timeout (seconds)
    pub request_timeout_secs: u64,

    /// Connection establishment timeout (seconds)
    pub connect_timeout_secs: u64,

    /// Maximum redirect hops followed per request
    pub max_redirects: usize,

    /// Extra headers sent with every request to the site
    pub headers: BTreeMap<String, String>,

    /// Environment variable holding the `Authorization` header value
    ///
    /// The value is read when the HTTP client is built and never written to the
    /// database or logs.
    pub authorization_env: Option<String>,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 1.0,
            burst: 2,
            max_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
            request_timeout_secs: 30,
            connect_timeout_secs: 10,
            max_redirects: 10,
            headers: BTreeMap::new(),
            authorization_env: None,
        }
    }
}

/// Bounds for the sampling crawl that runs from seed URLs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct DiscoveryConfig {
    /// Link hops followed from the seeds
    pub max_depth: u32,

    /// Total pages fetched per run
    pub max_pages: u32,

    /// Fetches in flight at once (across hosts)
    pub max_concurrent_fetches: u32,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            max_depth: 2,
            max_pages: 50,
            max_concurrent_fetches: 4,
        }
    }
}

/// Structural analysis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct AnalyzerConfig {
    /// Minimum skeleton similarity (Jaccard) for a snapshot to join a cluster
    pub cluster_threshold: f64,

    /// Raw examples handed to the inference capability per cluster
    pub examples_per_cluster: usize,

    /// Inference calls in flight at once
    pub inference_concurrency: usize,

    /// Attempts per cluster before it is marked unresolved
    pub inference_max_attempts: u32,

    /// Delay before the first inference retry (milliseconds), doubled on each retry
    pub inference_backoff_ms: u64,

    /// Query parameter names treated as page counters
    pub pagination_params: Vec<String>,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            cluster_threshold: 0.8,
            examples_per_cluster: 3,
            inference_concurrency: 4,
            inference_max_attempts: 3,
            inference_backoff_ms: 250,
            pagination_params: ["page", "p", "pg", "pagenum", "page_num", "page_number"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Field inference backend configuration
///
/// Without an endpoint the built-in heuristic inference is used.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct InferenceConfig {
    /// HTTP endpoint accepting `{"examples": [...]}` and answering `{"fields": [...]}`
    pub endpoint: Option<String>,

    /// Model identifier forwarded to the endpoint
    pub model: Option<String>,

    /// Request timeout (seconds), 0 means the default of 60
    pub timeout_secs: u64,
}

/// Crawl plan generation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct PlannerConfig {
    /// Hard stop for pagination chains
    pub max_pages: u32,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self { max_pages: 100 }
    }
}

/// What a caller experiences when the site already has a run in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictPolicy {
    /// Wait for the in-flight run and share its outcome
    #[default]
    Block,
    /// Fail immediately with `AlreadyRunning`
    Reject,
}

/// Orchestrator configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct OrchestratorConfig {
    pub on_conflict: ConflictPolicy,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,
}
