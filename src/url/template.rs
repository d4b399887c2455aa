use crate::url::host::host_key;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use url::Url;

/// One component of a URL template
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Segment {
    /// Must match exactly
    Literal(String),
    /// Matches any non-empty value and binds it to the named key
    Placeholder(String),
}

/// URL shape shared by the members of one node pattern
///
/// Built from the URLs of a cluster: components that differ between members, or
/// that are plain numbers, become named placeholders. A template renders as
/// `/product/{id}?page={page}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UrlTemplate {
    /// Host key (`host` or `host:port`)
    pub host: String,
    pub path: Vec<Segment>,
    pub query: Vec<(String, Segment)>,
}

impl UrlTemplate {
    /// Builds a template from the URLs of one cluster
    ///
    /// The first URL is the representative: when members disagree on path depth
    /// the representative's shape wins and only its numeric segments are
    /// generalized.
    ///
    /// # Returns
    ///
    /// * `Some(UrlTemplate)` - The generalized template
    /// * `None` - If `urls` is empty or the representative has no host
    pub fn from_urls(urls: &[Url]) -> Option<Self> {
        let representative = urls.first()?;
        let host = host_key(representative)?;
        let mut names = NameAllocator::default();

        let member_paths: Vec<Vec<String>> = urls.iter().map(path_segments).collect();
        let rep_path = &member_paths[0];
        let same_depth = member_paths.iter().all(|p| p.len() == rep_path.len());

        let path = rep_path
            .iter()
            .enumerate()
            .map(|(i, segment)| {
                let varies = same_depth && member_paths.iter().any(|p| &p[i] != segment);
                let numeric = if same_depth {
                    member_paths.iter().all(|p| is_numeric(&p[i]))
                } else {
                    is_numeric(segment)
                };
                if numeric {
                    Segment::Placeholder(names.allocate("id"))
                } else if varies {
                    Segment::Placeholder(names.allocate("slug"))
                } else {
                    Segment::Literal(segment.clone())
                }
            })
            .collect();

        let member_queries: Vec<BTreeMap<String, String>> =
            urls.iter().map(query_map).collect();
        let query = representative
            .query_pairs()
            .map(|(key, value)| {
                let key = key.to_string();
                let value = value.to_string();
                let varies = member_queries
                    .iter()
                    .any(|q| q.get(&key).map(|v| v != &value).unwrap_or(true));
                let segment = if varies || is_numeric(&value) {
                    Segment::Placeholder(names.allocate(&sanitize_name(&key)))
                } else {
                    Segment::Literal(value)
                };
                (key, segment)
            })
            .collect();

        Some(Self { host, path, query })
    }

    /// Checks whether a URL has this template's shape
    ///
    /// Query placeholders are optional (a first page often omits `?page=1`);
    /// literal query values are required. Extra query parameters are ignored.
    pub fn matches(&self, url: &Url) -> bool {
        self.extract(url).is_some()
    }

    /// Binds placeholder names to the values found in `url`
    pub fn extract(&self, url: &Url) -> Option<BTreeMap<String, String>> {
        if host_key(url)? != self.host {
            return None;
        }

        let segments = path_segments(url);
        if segments.len() != self.path.len() {
            return None;
        }

        let mut bound = BTreeMap::new();
        for (expected, actual) in self.path.iter().zip(segments) {
            match expected {
                Segment::Literal(lit) if *lit == actual => {}
                Segment::Literal(_) => return None,
                Segment::Placeholder(name) => {
                    bound.insert(name.clone(), actual);
                }
            }
        }

        let query = query_map(url);
        for (key, expected) in &self.query {
            match (expected, query.get(key)) {
                (Segment::Literal(lit), Some(actual)) if lit == actual => {}
                (Segment::Literal(_), _) => return None,
                (Segment::Placeholder(name), Some(actual)) if !actual.is_empty() => {
                    bound.insert(name.clone(), actual.clone());
                }
                (Segment::Placeholder(_), _) => {}
            }
        }

        Some(bound)
    }

    /// Placeholder names in path order, then query order
    pub fn placeholders(&self) -> Vec<String> {
        self.path
            .iter()
            .chain(self.query.iter().map(|(_, s)| s))
            .filter_map(|s| match s {
                Segment::Placeholder(name) => Some(name.clone()),
                Segment::Literal(_) => None,
            })
            .collect()
    }

    /// Literal path segments, in order
    pub fn literal_path(&self) -> Vec<&str> {
        self.path
            .iter()
            .filter_map(|s| match s {
                Segment::Literal(lit) => Some(lit.as_str()),
                Segment::Placeholder(_) => None,
            })
            .collect()
    }
}

impl fmt::Display for UrlTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/")?;
        let path: Vec<String> = self.path.iter().map(render_segment).collect();
        write!(f, "{}", path.join("/"))?;
        if !self.query.is_empty() {
            let query: Vec<String> = self
                .query
                .iter()
                .map(|(k, s)| format!("{}={}", k, render_segment(s)))
                .collect();
            write!(f, "?{}", query.join("&"))?;
        }
        Ok(())
    }
}

fn render_segment(segment: &Segment) -> String {
    match segment {
        Segment::Literal(lit) => lit.clone(),
        Segment::Placeholder(name) => format!("{{{}}}", name),
    }
}

/// Non-empty path segments of a URL
pub fn path_segments(url: &Url) -> Vec<String> {
    url.path_segments()
        .map(|segments| {
            segments
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string())
                .collect()
        })
        .unwrap_or_default()
}

fn query_map(url: &Url) -> BTreeMap<String, String> {
    url.query_pairs()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn is_numeric(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
}

fn sanitize_name(raw: &str) -> String {
    let name: String = raw
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if name.is_empty() {
        "param".to_string()
    } else {
        name
    }
}

/// Hands out unique placeholder names: `id`, `id_2`, `id_3`, ...
#[derive(Default)]
struct NameAllocator {
    used: HashSet<String>,
}

impl NameAllocator {
    fn allocate(&mut self, base: &str) -> String {
        let mut candidate = base.to_string();
        let mut n = 2;
        while self.used.contains(&candidate) {
            candidate = format!("{}_{}", base, n);
            n += 1;
        }
        self.used.insert(candidate.clone());
        candidate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn urls(list: &[&str]) -> Vec<Url> {
        list.iter().map(|u| Url::parse(u).unwrap()).collect()
    }

    #[test]
    fn test_numeric_segment_becomes_id() {
        let template = UrlTemplate::from_urls(&urls(&[
            "https://shop.example.com/product/1",
            "https://shop.example.com/product/22",
        ]))
        .unwrap();

        assert_eq!(template.to_string(), "/product/{id}");
        assert_eq!(template.placeholders(), vec!["id"]);
        assert_eq!(template.literal_path(), vec!["product"]);
    }

    #[test]
    fn test_varying_text_segment_becomes_slug() {
        let template = UrlTemplate::from_urls(&urls(&[
            "https://example.com/blog/hello-world",
            "https://example.com/blog/second-post",
        ]))
        .unwrap();
        assert_eq!(template.to_string(), "/blog/{slug}");
    }

    #[test]
    fn test_single_url_generalizes_numbers() {
        let template =
            UrlTemplate::from_urls(&urls(&["https://example.com/product/5?page=1"])).unwrap();
        assert_eq!(template.to_string(), "/product/{id}?page={page}");
    }

    #[test]
    fn test_name_collisions_get_suffixes() {
        let template = UrlTemplate::from_urls(&urls(&[
            "https://example.com/a/1/b/2",
            "https://example.com/a/3/b/4",
        ]))
        .unwrap();
        assert_eq!(template.placeholders(), vec!["id", "id_2"]);
    }

    #[test]
    fn test_matches_and_extracts() {
        let template = UrlTemplate::from_urls(&urls(&[
            "https://example.com/product/1",
            "https://example.com/product/2",
        ]))
        .unwrap();

        let hit = Url::parse("https://example.com/product/77?ref=home").unwrap();
        let bound = template.extract(&hit).unwrap();
        assert_eq!(bound.get("id").map(String::as_str), Some("77"));

        assert!(!template.matches(&Url::parse("https://example.com/category/77").unwrap()));
        assert!(!template.matches(&Url::parse("https://other.com/product/77").unwrap()));
        assert!(!template.matches(&Url::parse("https://example.com/product/77/x").unwrap()));
    }

    #[test]
    fn test_query_placeholder_is_optional() {
        let template = UrlTemplate::from_urls(&urls(&[
            "https://example.com/products?page=2",
            "https://example.com/products?page=3",
        ]))
        .unwrap();
        assert!(template.matches(&Url::parse("https://example.com/products").unwrap()));
    }

    #[test]
    fn test_literal_query_value_required() {
        let template = UrlTemplate::from_urls(&urls(&[
            "https://example.com/list?sort=asc&page=1",
            "https://example.com/list?sort=asc&page=2",
        ]))
        .unwrap();
        assert_eq!(template.to_string(), "/list?sort=asc&page={page}");
        assert!(!template.matches(&Url::parse("https://example.com/list?sort=desc&page=4").unwrap()));
    }

    #[test]
    fn test_root_template() {
        let template = UrlTemplate::from_urls(&urls(&["https://example.com/"])).unwrap();
        assert_eq!(template.to_string(), "/");
        assert!(template.matches(&Url::parse("https://example.com").unwrap()));
    }
}
