//! State module for tracking pipeline progress
//!
//! # Components
//!
//! - `PipelineStage`: The stage a pipeline run is in (idle, fetching, analyzing, ...)
//! - `TokenBucket`: Per-host request budget used by the fetcher's rate limiter

mod host_state;
mod stage;

// Re-export main types
pub use host_state::TokenBucket;
pub use stage::PipelineStage;
