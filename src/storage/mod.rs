//! Storage module for persisting pipeline data
//!
//! This module handles all database operations, including:
//! - SQLite database initialization and schema management
//! - The content-addressed snapshot archive
//! - Versioned structural models, schemas and crawl plans
//! - Pipeline run tracking

mod schema;
mod snapshot_store;
mod sqlite;
mod traits;

pub(crate) use snapshot_store::lock;
pub use snapshot_store::{SharedStorage, SnapshotCursor, SnapshotStore};
pub use sqlite::SqliteStorage;
pub use traits::{Storage, StorageError, StorageResult};

use crate::StrataError;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;

/// Initializes or opens a storage database
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
///
/// # Returns
///
/// * `Ok(SqliteStorage)` - Successfully initialized storage
/// * `Err(StrataError)` - Failed to initialize storage
pub fn open_storage(path: &Path) -> Result<SqliteStorage, StrataError> {
    SqliteStorage::new(path)
}

/// An immutable observation of a URL's response body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub site_id: String,
    pub url: String,
    pub fetch_time: DateTime<Utc>,
    /// SHA-256 of `raw_bytes`, hex encoded
    pub content_hash: String,
    #[serde(skip)]
    pub raw_bytes: Vec<u8>,
    pub content_type: String,
}

impl Snapshot {
    /// Body as text, replacing invalid UTF-8
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.raw_bytes).into_owned()
    }

    /// Media type without parameters, lowercased (`text/html; charset=utf-8` -> `text/html`)
    pub fn mime(&self) -> String {
        self.content_type
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_lowercase()
    }
}

/// Resume point of a snapshot listing
///
/// Listings are ordered by (fetch_time, row id); a position names the last row
/// already handed out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotPosition {
    pub fetch_time: String,
    pub row_id: i64,
}

/// Hex-encoded SHA-256 of a byte string
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Fixed-width RFC 3339 text: lexical order equals chronological order
pub(crate) fn to_db_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn from_db_time(text: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(text).map(|t| t.with_timezone(&Utc))
}
