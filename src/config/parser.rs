use crate::config::types::Config;
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Loads and parses a configuration file from the given path
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(Config)` - Successfully loaded and validated configuration
/// * `Err(ConfigError)` - Failed to load, parse, or validate the configuration
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use sumi_strata::config::load_config;
///
/// let config = load_config(Path::new("strata.toml")).unwrap();
/// println!("Cluster threshold: {}", config.analyzer.cluster_threshold);
/// ```
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parses and validates configuration from TOML text
pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(content)?;
    validate(&config)?;
    Ok(config)
}

/// Computes a SHA-256 hash of the configuration file content
///
/// # Returns
///
/// * `Ok(String)` - Hex-encoded SHA-256 hash of the file content
/// * `Err(ConfigError)` - Failed to read the file
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let result = hasher.finalize();
    Ok(hex::encode(result))
}

/// Loads a configuration and returns both the config and its hash
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let config = load_config(path)?;
    let hash = compute_config_hash(path)?;
    Ok((config, hash))
}

/// Digest of the settings that influence analysis output
///
/// The analyzer and planner sections take part, together with the identity of the
/// inference capability (its endpoint and model). Politeness and storage settings
/// do not, so changing them keeps previously committed artifacts reusable.
pub fn compute_analysis_digest(config: &Config) -> String {
    let mut hasher = Sha256::new();
    let analyzer = serde_json::to_string(&config.analyzer).unwrap_or_default();
    let planner = serde_json::to_string(&config.planner).unwrap_or_default();
    hasher.update(analyzer.as_bytes());
    hasher.update([0u8]);
    hasher.update(planner.as_bytes());
    hasher.update([0u8]);
    let capability = match &config.inference.endpoint {
        Some(endpoint) => format!("http:{}", endpoint),
        None => "heuristic".to_string(),
    };
    hasher.update(capability.as_bytes());
    hasher.update([0u8]);
    hasher.update(config.inference.model.as_deref().unwrap_or("").as_bytes());
    hex::encode(hasher.finalize())
}
