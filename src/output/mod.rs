//! Output module for rendering committed artifacts
//!
//! This module handles:
//! - SQL DDL for a derived schema
//! - Markdown reports of a schema and crawl plan pair

mod ddl;
mod markdown;

pub use ddl::render_ddl;
pub use markdown::{generate_markdown_summary, render_markdown};

use thiserror::Error;

/// Errors that can occur while writing output
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;
