//! Configuration module for Sumi-Strata
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use sumi_strata::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("strata.toml")).unwrap();
//! println!("Fetch attempts per URL: {}", config.fetcher.max_attempts);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    AnalyzerConfig, Config, ConflictPolicy, DiscoveryConfig, FetcherConfig, InferenceConfig,
    OrchestratorConfig, PlannerConfig, StorageConfig, UserAgentConfig,
};

// Re-export parser functions
pub use parser::{
    compute_analysis_digest, compute_config_hash, load_config, load_config_with_hash,
    parse_config,
};
