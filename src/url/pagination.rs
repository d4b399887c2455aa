use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// Where a URL carries its page counter
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum PageSlot {
    /// `?page=3`
    Query(String),
    /// `/page/3`; holds the literal segment preceding the number
    Path(String),
}

impl fmt::Display for PageSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Query(name) => write!(f, "?{}=N", name),
            Self::Path(name) => write!(f, "/{}/N", name),
        }
    }
}

/// A page counter found in a URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageLocation {
    pub slot: PageSlot,
    pub number: u32,
}

/// Path segments that introduce a page number, e.g. `/blog/page/2`
const PATH_MARKERS: &[&str] = &["page", "p"];

/// Finds the page counter of a URL
///
/// Query parameters are checked in the order given by `params`, then path
/// markers. Only plain non-negative integers count as page numbers.
pub fn page_location(url: &Url, params: &[String]) -> Option<PageLocation> {
    for param in params {
        let found = url
            .query_pairs()
            .find(|(k, _)| k.eq_ignore_ascii_case(param))
            .and_then(|(_, v)| v.parse::<u32>().ok());
        if let Some(number) = found {
            return Some(PageLocation {
                slot: PageSlot::Query(param.clone()),
                number,
            });
        }
    }

    let segments: Vec<&str> = url.path_segments()?.filter(|s| !s.is_empty()).collect();
    for pair in segments.windows(2) {
        let marker = pair[0].to_lowercase();
        if PATH_MARKERS.contains(&marker.as_str()) {
            if let Ok(number) = pair[1].parse::<u32>() {
                return Some(PageLocation {
                    slot: PageSlot::Path(marker),
                    number,
                });
            }
        }
    }

    None
}

/// Page number of `url` in `slot`; a URL without the counter is page 1
pub fn page_number_in(url: &Url, slot: &PageSlot) -> u32 {
    match slot {
        PageSlot::Query(name) => url
            .query_pairs()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .and_then(|(_, v)| v.parse().ok())
            .unwrap_or(1),
        PageSlot::Path(marker) => {
            let segments: Vec<&str> = url
                .path_segments()
                .map(|s| s.filter(|s| !s.is_empty()).collect())
                .unwrap_or_default();
            segments
                .windows(2)
                .find(|pair| pair[0].eq_ignore_ascii_case(marker))
                .and_then(|pair| pair[1].parse().ok())
                .unwrap_or(1)
        }
    }
}

/// Strips the page counter, leaving the identity of the paginated listing
pub fn without_page(url: &Url, slot: &PageSlot) -> Url {
    let mut stripped = url.clone();
    match slot {
        PageSlot::Query(name) => {
            let kept: Vec<(String, String)> = url
                .query_pairs()
                .filter(|(k, _)| !k.eq_ignore_ascii_case(name))
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
            if kept.is_empty() {
                stripped.set_query(None);
            } else {
                stripped.query_pairs_mut().clear().extend_pairs(kept);
            }
        }
        PageSlot::Path(marker) => {
            let segments: Vec<&str> = url
                .path_segments()
                .map(|s| s.filter(|s| !s.is_empty()).collect())
                .unwrap_or_default();
            let mut kept = Vec::with_capacity(segments.len());
            let mut i = 0;
            while i < segments.len() {
                let is_counter = segments[i].eq_ignore_ascii_case(marker)
                    && segments
                        .get(i + 1)
                        .map(|s| s.parse::<u32>().is_ok())
                        .unwrap_or(false);
                if is_counter {
                    i += 2;
                } else {
                    kept.push(segments[i]);
                    i += 1;
                }
            }
            stripped.set_path(&format!("/{}", kept.join("/")));
        }
    }
    stripped
}

/// True when `a` and `b` address the same listing and differ only in the page counter
pub fn same_listing(a: &Url, b: &Url, slot: &PageSlot) -> bool {
    without_page(a, slot) == without_page(b, slot)
}

/// Rewrites the page counter of `url` to `number`
pub fn with_page(url: &Url, slot: &PageSlot, number: u32) -> Url {
    let mut base = without_page(url, slot);
    match slot {
        PageSlot::Query(name) => {
            let mut pairs: Vec<(String, String)> = base
                .query_pairs()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
            pairs.push((name.clone(), number.to_string()));
            pairs.sort_by(|a, b| a.0.cmp(&b.0));
            base.query_pairs_mut().clear().extend_pairs(pairs);
        }
        PageSlot::Path(marker) => {
            let path = base.path().trim_end_matches('/').to_string();
            base.set_path(&format!("{}/{}/{}", path, marker, number));
        }
    }
    base
}
