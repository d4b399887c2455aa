//! Robots.txt caching implementation
//!
//! Entries expire 24 hours after they were fetched.

use crate::robots::ParsedRobots;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

/// Cached robots.txt data for a host
#[derive(Debug, Clone)]
pub struct CachedRobots {
    /// The parsed robots.txt content
    pub content: ParsedRobots,

    /// When the robots.txt was fetched
    pub fetched_at: DateTime<Utc>,
}

impl CachedRobots {
    /// Creates a new CachedRobots instance stamped with the current time
    pub fn new(content: ParsedRobots) -> Self {
        Self {
            content,
            fetched_at: Utc::now(),
        }
    }

    /// Checks if the entry is older than 24 hours at `now`
    pub fn is_stale_at(&self, now: DateTime<Utc>) -> bool {
        now - self.fetched_at > Duration::hours(24)
    }

    /// Checks if the cached robots.txt is stale (older than 24 hours)
    pub fn is_stale(&self) -> bool {
        self.is_stale_at(Utc::now())
    }
}

/// Per-host robots.txt cache shared by concurrent fetches
#[derive(Debug, Default)]
pub struct RobotsCache {
    entries: Mutex<HashMap<String, CachedRobots>>,
}

impl RobotsCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the fresh entry for a host, if any
    pub fn get(&self, host: &str) -> Option<ParsedRobots> {
        let entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        entries
            .get(host)
            .filter(|cached| !cached.is_stale())
            .map(|cached| cached.content.clone())
    }

    /// Stores rules for a host, replacing any previous entry
    pub fn insert(&self, host: &str, robots: ParsedRobots) {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        entries.insert(host.to_string(), CachedRobots::new(robots));
    }

    /// Number of cached hosts, stale entries included
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    fn backdate(&self, host: &str, by: Duration) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.get_mut(host) {
            entry.fetched_at = entry.fetched_at - by;
        }
    }
}
