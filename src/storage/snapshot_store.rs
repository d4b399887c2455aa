//! Content-addressed snapshot archive on top of the shared storage handle

use crate::storage::traits::{Storage, StorageError, StorageResult};
use crate::storage::{Snapshot, SnapshotPosition, SqliteStorage};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

/// Storage handle shared between the fetcher, the orchestrator and callers
pub type SharedStorage = Arc<Mutex<SqliteStorage>>;

/// Rows fetched per round trip by a `SnapshotCursor`
const PAGE_SIZE: usize = 64;

pub(crate) fn lock(storage: &SharedStorage) -> StorageResult<MutexGuard<'_, SqliteStorage>> {
    storage
        .lock()
        .map_err(|e| StorageError::Lock(e.to_string()))
}

/// Append-only archive of raw responses
///
/// Identical bodies are stored once; a repeated `put` for the same site returns
/// the snapshot recorded first.
#[derive(Clone)]
pub struct SnapshotStore {
    storage: SharedStorage,
}

impl SnapshotStore {
    pub fn new(storage: SharedStorage) -> Self {
        Self { storage }
    }

    /// Records a response body, stamped with the current time
    pub fn put(
        &self,
        site_id: &str,
        url: &str,
        raw_bytes: &[u8],
        content_type: &str,
    ) -> StorageResult<Snapshot> {
        lock(&self.storage)?.put_snapshot(site_id, url, raw_bytes, content_type, Utc::now())
    }

    /// Gets the raw bytes stored under a content hash
    pub fn get(&self, content_hash: &str) -> StorageResult<Vec<u8>> {
        lock(&self.storage)?.get_snapshot_bytes(content_hash)
    }

    /// Gets the full snapshot record of a site
    pub fn get_snapshot(&self, site_id: &str, content_hash: &str) -> StorageResult<Snapshot> {
        lock(&self.storage)?.get_snapshot(site_id, content_hash)
    }

    /// Lazily lists a site's snapshots in ascending fetch order
    pub fn list(&self, site_id: &str, since: Option<DateTime<Utc>>) -> SnapshotCursor {
        SnapshotCursor::new(self.storage.clone(), site_id, since, None)
    }

    /// Resumes a listing after a position previously returned by `SnapshotCursor::position`
    pub fn list_from(
        &self,
        site_id: &str,
        since: Option<DateTime<Utc>>,
        position: SnapshotPosition,
    ) -> SnapshotCursor {
        SnapshotCursor::new(self.storage.clone(), site_id, since, Some(position))
    }
}

/// Keyset-paginated iterator over a site's snapshots
///
/// Rows are loaded a page at a time, so the storage lock is only held while a
/// page is read. Snapshots stored after the cursor was created are picked up as
/// long as they sort after the current position.
pub struct SnapshotCursor {
    storage: SharedStorage,
    site_id: String,
    since: Option<DateTime<Utc>>,
    position: Option<SnapshotPosition>,
    buffer: VecDeque<(SnapshotPosition, Snapshot)>,
    exhausted: bool,
}

impl SnapshotCursor {
    fn new(
        storage: SharedStorage,
        site_id: &str,
        since: Option<DateTime<Utc>>,
        position: Option<SnapshotPosition>,
    ) -> Self {
        Self {
            storage,
            site_id: site_id.to_string(),
            since,
            position,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    /// Position of the last snapshot handed out, if any
    pub fn position(&self) -> Option<SnapshotPosition> {
        self.position.clone()
    }

    fn fill(&mut self) -> StorageResult<()> {
        let after = self
            .buffer
            .back()
            .map(|(p, _)| p.clone())
            .or_else(|| self.position.clone());
        let page = lock(&self.storage)?.list_snapshots(
            &self.site_id,
            self.since,
            after.as_ref(),
            PAGE_SIZE,
        )?;
        if page.len() < PAGE_SIZE {
            self.exhausted = true;
        }
        self.buffer.extend(page);
        Ok(())
    }
}

impl Iterator for SnapshotCursor {
    type Item = StorageResult<Snapshot>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(e) = self.fill() {
                self.exhausted = true;
                return Some(Err(e));
            }
        }

        let (position, snapshot) = self.buffer.pop_front()?;
        self.position = Some(position);
        Some(Ok(snapshot))
    }
}
