//! Navigation edges and pagination hints
//!
//! Edges are derived between clusters from what the pages themselves reference:
//! - anchor links and URLs inside JSON documents (`link`)
//! - `rel="next"` targets and page-counter steps of +1 (`pagination`)
//! - endpoints referenced from inline scripts (`api_call`)
//!
//! Pagination only produces an edge when both pages belong to the same cluster;
//! the first off-pattern page of a listing is recorded in the pattern's
//! [`PaginationHint`] instead.

use crate::analyzer::model::{ContentKind, PaginationHint, RelationKind};
use crate::crawler::{json_links, parse_html};
use crate::storage::Snapshot;
use crate::url::pagination::{page_number_in, same_listing, without_page};
use crate::url::{page_location, PageSlot, UrlTemplate};
use std::collections::{BTreeMap, HashSet};
use url::Url;

/// A clustered snapshot and the URLs it references
#[derive(Debug, Clone)]
pub struct PageNode {
    pub url: Option<Url>,
    pub cluster: usize,
    pub links: Vec<Url>,
    pub next_links: Vec<Url>,
    pub api_urls: Vec<Url>,
}

impl PageNode {
    pub fn from_snapshot(snapshot: &Snapshot, kind: ContentKind, cluster: usize) -> Self {
        let url = Url::parse(&snapshot.url).ok();
        let mut node = Self {
            url: url.clone(),
            cluster,
            links: Vec::new(),
            next_links: Vec::new(),
            api_urls: Vec::new(),
        };
        let Some(base) = url else {
            return node;
        };

        match kind {
            ContentKind::Html => {
                let page = parse_html(&snapshot.text(), &base);
                node.links = page.links;
                node.next_links = page.next_links;
                node.api_urls = page.script_urls;
            }
            ContentKind::Json => {
                if let Ok(value) = serde_json::from_slice(&snapshot.raw_bytes) {
                    node.links = json_links(&value, &base);
                }
            }
            ContentKind::Other => {}
        }
        node
    }
}

/// An edge between two clusters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClusterEdge {
    pub from: usize,
    pub to: usize,
    pub kind: RelationKind,
}

/// Derives edges between clusters, in order of first evidence
///
/// # Arguments
///
/// * `pages` - All clustered pages, in canonical order
/// * `templates` - URL template of each cluster, used for link targets that were never fetched
/// * `params` - Query parameter names treated as page counters
pub fn cluster_edges(pages: &[PageNode], templates: &[Option<UrlTemplate>], params: &[String]) -> Vec<ClusterEdge> {
    let mut edges = Vec::new();
    let mut seen = HashSet::new();
    let mut push = |edge: ClusterEdge| {
        if seen.insert(edge) {
            edges.push(edge);
        }
    };

    for page in pages {
        let Some(from_url) = &page.url else {
            continue;
        };

        let targets = page.links.iter().chain(page.next_links.iter().filter(|u| !page.links.contains(u)));
        for target in targets {
            let Some(to) = resolve_target(target, pages, templates) else {
                continue;
            };
            let paginates = page.next_links.contains(target) || is_page_step(from_url, target, params);
            if paginates {
                if to == page.cluster {
                    push(ClusterEdge {
                        from: page.cluster,
                        to,
                        kind: RelationKind::Pagination,
                    });
                }
            } else {
                push(ClusterEdge {
                    from: page.cluster,
                    to,
                    kind: RelationKind::Link,
                });
            }
        }

        for target in &page.api_urls {
            if let Some(to) = resolve_target(target, pages, templates) {
                push(ClusterEdge {
                    from: page.cluster,
                    to,
                    kind: RelationKind::ApiCall,
                });
            }
        }
    }

    // Consecutive pages of one listing paginate even when they do not link to each other
    for a in pages {
        for b in pages {
            if a.cluster != b.cluster {
                continue;
            }
            if let (Some(ua), Some(ub)) = (&a.url, &b.url) {
                if is_page_step(ua, ub, params) {
                    push(ClusterEdge {
                        from: a.cluster,
                        to: b.cluster,
                        kind: RelationKind::Pagination,
                    });
                }
            }
        }
    }

    edges
}

/// Cluster of a referenced URL: an exact fetched page first, then the first matching template
fn resolve_target(target: &Url, pages: &[PageNode], templates: &[Option<UrlTemplate>]) -> Option<usize> {
    pages
        .iter()
        .find(|p| p.url.as_ref() == Some(target))
        .map(|p| p.cluster)
        .or_else(|| {
            templates
                .iter()
                .position(|t| t.as_ref().map(|t| t.matches(target)).unwrap_or(false))
        })
}

/// True when `to` is the page right after `from` in the same listing
pub fn is_page_step(from: &Url, to: &Url, params: &[String]) -> bool {
    let Some(location) = page_location(to, params).or_else(|| page_location(from, params)) else {
        return false;
    };
    same_listing(from, to, &location.slot)
        && page_number_in(from, &location.slot)
            .checked_add(1)
            .is_some_and(|next| page_number_in(to, &location.slot) == next)
}

/// Derives a pagination hint for every cluster that owns a paginated listing
///
/// Pages are grouped by listing (the URL with its page counter removed). A group
/// belongs to the cluster of its lowest-numbered page; the first later page that
/// falls into another cluster is the listing's terminal page.
pub fn pagination_hints(pages: &[PageNode], params: &[String]) -> BTreeMap<usize, PaginationHint> {
    let mut groups: BTreeMap<(PageSlot, String), Vec<(u32, usize, &Url)>> = BTreeMap::new();

    for page in pages {
        let Some(url) = &page.url else {
            continue;
        };
        if let Some(location) = page_location(url, params) {
            let listing = without_page(url, &location.slot).to_string();
            groups
                .entry((location.slot, listing))
                .or_default()
                .push((location.number, page.cluster, url));
        }
    }

    // A listing's first page often carries no counter at all
    for page in pages {
        let Some(url) = &page.url else {
            continue;
        };
        if page_location(url, params).is_some() {
            continue;
        }
        for ((_, listing), members) in groups.iter_mut() {
            if listing == url.as_str() {
                members.push((1, page.cluster, url));
            }
        }
    }

    let mut hints: BTreeMap<usize, PaginationHint> = BTreeMap::new();
    for ((slot, _), mut members) in groups {
        if members.len() < 2 {
            continue;
        }
        members.sort_by_key(|(number, _, url)| (*number, url.to_string()));

        let (first_number, owner, first_url) = members[0];
        let mut last_matching = first_number;
        let mut terminal = None;
        for (number, cluster, url) in &members[1..] {
            if *cluster == owner {
                last_matching = *number;
            } else if *number > last_matching {
                terminal = Some(url.to_string());
                break;
            }
        }

        if last_matching == first_number && terminal.is_none() {
            continue;
        }

        match hints.get_mut(&owner) {
            Some(hint) => {
                hint.last_matching_page = hint.last_matching_page.max(last_matching);
                if hint.terminal_url.is_none() {
                    hint.terminal_url = terminal;
                }
            }
            None => {
                hints.insert(
                    owner,
                    PaginationHint {
                        slot,
                        first_page_url: first_url.to_string(),
                        last_matching_page: last_matching,
                        terminal_url: terminal,
                    },
                );
            }
        }
    }

    hints
}
