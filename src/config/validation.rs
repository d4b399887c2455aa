use crate::config::types::{
    AnalyzerConfig, Config, DiscoveryConfig, FetcherConfig, InferenceConfig, PlannerConfig,
    StorageConfig, UserAgentConfig,
};
use crate::ConfigError;
use reqwest::header::{HeaderName, HeaderValue, AUTHORIZATION, USER_AGENT};
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_user_agent_config(&config.user_agent)?;
    validate_fetcher_config(&config.fetcher)?;
    validate_discovery_config(&config.discovery)?;
    validate_analyzer_config(&config.analyzer)?;
    validate_inference_config(&config.inference)?;
    validate_planner_config(&config.planner)?;
    validate_storage_config(&config.storage)?;
    Ok(())
}

/// Validates user agent configuration
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    // Validate crawler name: non-empty, alphanumeric + hyphens only
    if config.crawler_name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler_name cannot be empty".to_string(),
        ));
    }

    if !config
        .crawler_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "crawler_name must contain only alphanumeric characters and hyphens, got '{}'",
            config.crawler_name
        )));
    }

    // Validate contact URL
    Url::parse(&config.contact_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact_url: {}", e)))?;

    // Validate contact email (basic validation)
    validate_email(&config.contact_email)?;

    Ok(())
}

/// Validates fetcher politeness settings
fn validate_fetcher_config(config: &FetcherConfig) -> Result<(), ConfigError> {
    if !(config.requests_per_second > 0.0 && config.requests_per_second <= 100.0) {
        return Err(ConfigError::Validation(format!(
            "requests_per_second must be in (0, 100], got {}",
            config.requests_per_second
        )));
    }

    if config.burst < 1 {
        return Err(ConfigError::Validation(
            "burst must be at least 1".to_string(),
        ));
    }

    if config.max_attempts < 1 || config.max_attempts > 10 {
        return Err(ConfigError::Validation(format!(
            "max_attempts must be between 1 and 10, got {}",
            config.max_attempts
        )));
    }

    if config.initial_backoff_ms > config.max_backoff_ms {
        return Err(ConfigError::Validation(format!(
            "initial_backoff_ms ({}) cannot exceed max_backoff_ms ({})",
            config.initial_backoff_ms, config.max_backoff_ms
        )));
    }

    if config.request_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "request_timeout_secs must be >= 1".to_string(),
        ));
    }

    validate_request_headers(config)
}

/// Validates the per-site request headers
///
/// Names and values must be valid HTTP. The user agent comes from `[user-agent]`
/// and may not be overridden here; `Authorization` is either a literal header or
/// `authorization-env`, never both.
fn validate_request_headers(config: &FetcherConfig) -> Result<(), ConfigError> {
    for (name, value) in &config.headers {
        let parsed = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| ConfigError::Validation(format!("invalid header name '{}'", name)))?;
        HeaderValue::from_str(value)
            .map_err(|_| ConfigError::Validation(format!("invalid value for header '{}'", name)))?;

        if parsed == USER_AGENT {
            return Err(ConfigError::Validation(
                "the user-agent header is set by [user-agent], not [fetcher] headers".to_string(),
            ));
        }
        if parsed == AUTHORIZATION && config.authorization_env.is_some() {
            return Err(ConfigError::Validation(
                "set either an authorization header or authorization-env, not both".to_string(),
            ));
        }
    }

    if let Some(var) = &config.authorization_env {
        if var.is_empty() || var.contains('=') {
            return Err(ConfigError::Validation(format!(
                "authorization-env must name an environment variable, got '{}'",
                var
            )));
        }
    }

    Ok(())
}

fn validate_discovery_config(config: &DiscoveryConfig) -> Result<(), ConfigError> {
    if config.max_pages < 1 {
        return Err(ConfigError::Validation(
            "discovery max_pages must be >= 1".to_string(),
        ));
    }

    if config.max_concurrent_fetches < 1 || config.max_concurrent_fetches > 64 {
        return Err(ConfigError::Validation(format!(
            "max_concurrent_fetches must be between 1 and 64, got {}",
            config.max_concurrent_fetches
        )));
    }

    Ok(())
}

/// Validates analyzer thresholds and inference bounds
fn validate_analyzer_config(config: &AnalyzerConfig) -> Result<(), ConfigError> {
    if !(config.cluster_threshold > 0.0 && config.cluster_threshold <= 1.0) {
        return Err(ConfigError::Validation(format!(
            "cluster_threshold must be in (0, 1], got {}",
            config.cluster_threshold
        )));
    }

    if config.examples_per_cluster < 1 {
        return Err(ConfigError::Validation(
            "examples_per_cluster must be >= 1".to_string(),
        ));
    }

    if config.inference_concurrency < 1 || config.inference_concurrency > 64 {
        return Err(ConfigError::Validation(format!(
            "inference_concurrency must be between 1 and 64, got {}",
            config.inference_concurrency
        )));
    }

    if config.inference_max_attempts < 1 {
        return Err(ConfigError::Validation(
            "inference_max_attempts must be >= 1".to_string(),
        ));
    }

    if config.pagination_params.iter().any(|p| p.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "pagination_params cannot contain empty names".to_string(),
        ));
    }

    Ok(())
}

fn validate_inference_config(config: &InferenceConfig) -> Result<(), ConfigError> {
    if let Some(endpoint) = &config.endpoint {
        let url = Url::parse(endpoint).map_err(|e| {
            ConfigError::InvalidUrl(format!("Invalid inference endpoint '{}': {}", endpoint, e))
        })?;

        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::Validation(format!(
                "Inference endpoint '{}' must use HTTP or HTTPS",
                endpoint
            )));
        }
    }

    Ok(())
}

fn validate_planner_config(config: &PlannerConfig) -> Result<(), ConfigError> {
    if config.max_pages < 1 {
        return Err(ConfigError::Validation(
            "planner max_pages must be >= 1".to_string(),
        ));
    }
    Ok(())
}

fn validate_storage_config(config: &StorageConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }
    Ok(())
}

/// Basic email validation
fn validate_email(email: &str) -> Result<(), ConfigError> {
    if email.is_empty() {
        return Err(ConfigError::Validation(
            "contact_email cannot be empty".to_string(),
        ));
    }

    // Basic email format check: must contain @ and have text on both sides
    let parts: Vec<&str> = email.split('@').collect();
    if parts.len() != 2 {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }

    let local = parts[0];
    let domain = parts[1];

    if local.is_empty() || domain.is_empty() {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }

    // Domain part should contain at least one dot
    if !domain.contains('.') {
        return Err(ConfigError::Validation(format!(
            "Invalid email domain: '{}'",
            email
        )));
    }

    Ok(())
}
