//! Bounded breadth-first sampling crawl
//!
//! Starting from seed URLs, pages are fetched one depth level at a time. Links are
//! followed only to hosts named by the seeds. Each level is fetched concurrently,
//! bounded by a semaphore; the per-host serialization happens in the fetcher.

use crate::config::DiscoveryConfig;
use crate::crawler::fetcher::Fetcher;
use crate::crawler::parser::{json_links, parse_html};
use crate::storage::Snapshot;
use crate::url::{host_key, normalize_url};
use crate::{FetchError, FetchErrorKind};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use url::Url;

/// Result of a discovery crawl
#[derive(Debug, Default)]
pub struct DiscoveryOutcome {
    /// Fetched snapshots, one per distinct content hash, in crawl order
    pub snapshots: Vec<Snapshot>,

    /// URLs that could not be fetched
    pub failures: Vec<FetchError>,
}

/// Crawls a site from its seeds and returns everything that was fetched
///
/// # Arguments
///
/// * `fetcher` - Shared fetcher; robots, rate limits and retries apply per request
/// * `site_id` - Site the snapshots are recorded under
/// * `seeds` - Starting URLs (depth 0)
/// * `config` - Depth, page and concurrency bounds
pub async fn discover(
    fetcher: Arc<Fetcher>,
    site_id: &str,
    seeds: &[String],
    config: &DiscoveryConfig,
) -> DiscoveryOutcome {
    let mut outcome = DiscoveryOutcome::default();
    let mut seen: HashSet<Url> = HashSet::new();
    let mut hosts: HashSet<String> = HashSet::new();
    let mut frontier: Vec<Url> = Vec::new();

    for seed in seeds {
        match normalize_url(seed) {
            Ok(url) => {
                if let Some(host) = host_key(&url) {
                    hosts.insert(host);
                }
                if seen.insert(url.clone()) {
                    frontier.push(url);
                }
            }
            Err(e) => outcome.failures.push(FetchError {
                url: seed.clone(),
                kind: FetchErrorKind::InvalidUrl(e.to_string()),
                attempts: 0,
            }),
        }
    }

    let max_pages = config.max_pages as usize;
    let semaphore = Arc::new(Semaphore::new(config.max_concurrent_fetches.max(1) as usize));
    let mut seen_hashes: HashSet<String> = HashSet::new();
    let mut fetched = 0usize;
    let mut depth = 0u32;

    while !frontier.is_empty() && fetched < max_pages {
        frontier.truncate(max_pages - fetched);
        fetched += frontier.len();
        debug!("Discovery depth {}: {} URL(s)", depth, frontier.len());

        let results = fetch_level(&fetcher, site_id, &frontier, &semaphore).await;

        let mut next: Vec<Url> = Vec::new();
        for result in results {
            let snapshot = match result {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    warn!("Skipping {}: {}", e.url, e.kind);
                    outcome.failures.push(e);
                    continue;
                }
            };

            if depth < config.max_depth {
                for link in outgoing_links(&snapshot) {
                    let same_site = host_key(&link).map(|h| hosts.contains(&h)).unwrap_or(false);
                    if same_site && seen.insert(link.clone()) {
                        next.push(link);
                    }
                }
            }

            if seen_hashes.insert(snapshot.content_hash.clone()) {
                outcome.snapshots.push(snapshot);
            }
        }

        frontier = next;
        depth += 1;
    }

    info!(
        "Discovery for '{}' fetched {} page(s): {} distinct snapshot(s), {} failure(s)",
        site_id,
        fetched,
        outcome.snapshots.len(),
        outcome.failures.len()
    );

    outcome
}

/// Fetches one level, returning results in frontier order
async fn fetch_level(
    fetcher: &Arc<Fetcher>,
    site_id: &str,
    frontier: &[Url],
    semaphore: &Arc<Semaphore>,
) -> Vec<Result<Snapshot, FetchError>> {
    let mut tasks = JoinSet::new();

    for (index, url) in frontier.iter().enumerate() {
        let fetcher = fetcher.clone();
        let semaphore = semaphore.clone();
        let site_id = site_id.to_string();
        let url = url.to_string();
        tasks.spawn(async move {
            let result = match semaphore.acquire_owned().await {
                Ok(_permit) => fetcher.fetch(&site_id, &url).await,
                Err(e) => Err(FetchError {
                    url,
                    kind: FetchErrorKind::NetworkError(e.to_string()),
                    attempts: 0,
                }),
            };
            (index, result)
        });
    }

    let mut results: Vec<Option<Result<Snapshot, FetchError>>> = frontier.iter().map(|_| None).collect();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, result)) => results[index] = Some(result),
            Err(e) => warn!("Discovery fetch task failed: {}", e),
        }
    }

    results.into_iter().flatten().collect()
}

/// Links worth following out of a snapshot
fn outgoing_links(snapshot: &Snapshot) -> Vec<Url> {
    let Ok(base) = Url::parse(&snapshot.url) else {
        return Vec::new();
    };

    let mime = snapshot.mime();
    if mime.contains("html") {
        let page = parse_html(&snapshot.text(), &base);
        page.links
            .into_iter()
            .chain(page.next_links)
            .chain(page.script_urls)
            .collect()
    } else if mime.contains("json") {
        serde_json::from_slice(&snapshot.raw_bytes)
            .map(|value| json_links(&value, &base))
            .unwrap_or_default()
    } else {
        Vec::new()
    }
}
