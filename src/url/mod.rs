//! URL handling module for Sumi-Strata
//!
//! This module provides URL normalization, host keys for politeness bookkeeping,
//! URL templates that describe the shape of a node pattern's URLs, and page
//! counter detection for paginated listings.

mod host;
mod normalize;
pub mod pagination;
mod template;

// Re-export main functions
pub use host::{host_key, origin_of, same_host};
pub use normalize::{normalize_url, resolve_and_normalize};
pub use pagination::{page_location, PageLocation, PageSlot};
pub use template::{path_segments, Segment, UrlTemplate};
