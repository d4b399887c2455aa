//! HTML and JSON link extraction
//!
//! This module handles parsing responses to extract:
//! - Links to follow (from <a> tags and canonical links)
//! - `rel="next"` pagination links
//! - API endpoints referenced from inline scripts
//! - URLs carried inside JSON documents

use crate::url::resolve_and_normalize;
use scraper::{Html, Selector};
use serde_json::Value;
use url::Url;

/// Extracted information from an HTML page
#[derive(Debug, Clone, Default)]
pub struct ParsedPage {
    /// The page title (from <title> tag)
    pub title: Option<String>,

    /// All links found on the page, normalized
    pub links: Vec<Url>,

    /// Targets of `<a rel="next">` and `<link rel="next">`
    pub next_links: Vec<Url>,

    /// Endpoints referenced from inline `<script>` blocks
    pub script_urls: Vec<Url>,
}

/// Parses HTML content and extracts links and metadata
///
/// # Link Extraction Rules
///
/// **Include:**
/// - `<a href="...">` tags anywhere in the document
/// - `<link rel="canonical" href="...">`
///
/// **Exclude:**
/// - `<link rel="stylesheet" ...>`
/// - `<script src="...">`
/// - `<img src="...">`
/// - `<a href="..." download>`
/// - `javascript:`, `mailto:`, `tel:` links
/// - Data URIs
///
/// `rel="nofollow"` links are followed: discovery samples structure, it does not
/// pass ranking signals.
///
/// # Arguments
///
/// * `html` - The HTML content to parse
/// * `base_url` - The base URL for resolving relative links
///
/// # Example
///
/// ```
/// use sumi_strata::crawler::parse_html;
/// use url::Url;
///
/// let html = r#"<html><head><title>Test</title></head><body><a href="/page">Link</a></body></html>"#;
/// let base_url = Url::parse("https://example.com/").unwrap();
/// let parsed = parse_html(html, &base_url);
/// assert_eq!(parsed.title, Some("Test".to_string()));
/// assert_eq!(parsed.links[0].as_str(), "https://example.com/page");
/// ```
pub fn parse_html(html: &str, base_url: &Url) -> ParsedPage {
    let document = Html::parse_document(html);

    ParsedPage {
        title: extract_title(&document),
        links: extract_links(&document, base_url),
        next_links: extract_next_links(&document, base_url),
        script_urls: extract_script_urls(&document, base_url),
    }
}

/// Extracts the page title from the HTML document
fn extract_title(document: &Html) -> Option<String> {
    let title_selector = Selector::parse("title").ok()?;

    document
        .select(&title_selector)
        .next()
        .map(|element| element.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
}

fn extract_links(document: &Html, base_url: &Url) -> Vec<Url> {
    let mut links = Vec::new();

    if let Ok(a_selector) = Selector::parse("a[href]") {
        for element in document.select(&a_selector) {
            if element.value().attr("download").is_some() {
                continue;
            }
            if let Some(url) = element.value().attr("href").and_then(|h| resolve_link(h, base_url)) {
                push_unique(&mut links, url);
            }
        }
    }

    if let Ok(canonical_selector) = Selector::parse("link[rel='canonical'][href]") {
        for element in document.select(&canonical_selector) {
            if let Some(url) = element.value().attr("href").and_then(|h| resolve_link(h, base_url)) {
                push_unique(&mut links, url);
            }
        }
    }

    links
}

fn extract_next_links(document: &Html, base_url: &Url) -> Vec<Url> {
    let mut links = Vec::new();
    let Ok(selector) = Selector::parse("a[href][rel], link[href][rel]") else {
        return links;
    };

    for element in document.select(&selector) {
        let is_next = element
            .value()
            .attr("rel")
            .map(|rel| rel.split_whitespace().any(|r| r.eq_ignore_ascii_case("next")))
            .unwrap_or(false);
        if !is_next {
            continue;
        }
        if let Some(url) = element.value().attr("href").and_then(|h| resolve_link(h, base_url)) {
            push_unique(&mut links, url);
        }
    }

    links
}

fn extract_script_urls(document: &Html, base_url: &Url) -> Vec<Url> {
    let mut urls = Vec::new();
    let Ok(selector) = Selector::parse("script:not([src])") else {
        return urls;
    };

    for element in document.select(&selector) {
        let source = element.text().collect::<String>();
        for literal in string_literals(&source) {
            if !looks_like_endpoint(literal) {
                continue;
            }
            if let Some(url) = resolve_link(literal, base_url) {
                push_unique(&mut urls, url);
            }
        }
    }

    urls
}

/// Contents of the quoted literals in a script, escapes left as written
fn string_literals(source: &str) -> Vec<&str> {
    let mut literals = Vec::new();
    let mut chars = source.char_indices();

    while let Some((start, c)) = chars.next() {
        if c != '"' && c != '\'' && c != '`' {
            continue;
        }
        let mut escaped = false;
        for (i, d) in chars.by_ref() {
            if escaped {
                escaped = false;
            } else if d == '\\' {
                escaped = true;
            } else if d == c {
                literals.push(&source[start + 1..i]);
                break;
            } else if d == '\n' && c != '`' {
                break;
            }
        }
    }

    literals
}

/// Heuristic for script literals that name a data endpoint
fn looks_like_endpoint(literal: &str) -> bool {
    let literal = literal.trim();
    if literal.is_empty() || literal.contains(char::is_whitespace) || literal.contains("${") {
        return false;
    }
    let rooted = literal.starts_with('/') || literal.starts_with("http://") || literal.starts_with("https://");
    if !rooted || literal.starts_with("//") {
        return false;
    }

    let path = literal.split(['?', '#']).next().unwrap_or("").to_lowercase();
    path.contains("/api/") || path.ends_with("/api") || path.ends_with(".json") || path.contains("/graphql")
}

/// Collects URLs carried as string values anywhere in a JSON document
///
/// Only absolute `http(s)` URLs and root-relative paths are taken; bare words are
/// left alone so that ordinary text fields do not turn into links.
pub fn json_links(value: &Value, base_url: &Url) -> Vec<Url> {
    let mut links = Vec::new();
    collect_json_links(value, base_url, &mut links);
    links
}

fn collect_json_links(value: &Value, base_url: &Url, links: &mut Vec<Url>) {
    match value {
        Value::String(s) => {
            let s = s.trim();
            let candidate = s.starts_with("http://")
                || s.starts_with("https://")
                || (s.starts_with('/') && !s.starts_with("//") && !s.contains(char::is_whitespace));
            if candidate {
                if let Some(url) = resolve_link(s, base_url) {
                    push_unique(links, url);
                }
            }
        }
        Value::Array(items) => items.iter().for_each(|v| collect_json_links(v, base_url, links)),
        Value::Object(map) => map.values().for_each(|v| collect_json_links(v, base_url, links)),
        _ => {}
    }
}

/// Resolves a link href to a normalized absolute URL
///
/// Returns None if the link should be excluded:
/// - javascript:, mailto:, tel: schemes
/// - data: URIs
/// - fragment-only links
/// - Invalid URLs
/// - Non-HTTP(S) URLs after resolution
fn resolve_link(href: &str, base_url: &Url) -> Option<Url> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let lowered = href.to_ascii_lowercase();
    if lowered.starts_with("javascript:")
        || lowered.starts_with("mailto:")
        || lowered.starts_with("tel:")
        || lowered.starts_with("data:")
    {
        return None;
    }

    resolve_and_normalize(base_url, href)
}

fn push_unique(urls: &mut Vec<Url>, url: Url) {
    if !urls.contains(&url) {
        urls.push(url);
    }
}

/// Convenience function for extracting just the links from HTML
pub fn extract_links_simple(html: &str, base_url: &Url) -> Vec<Url> {
    parse_html(html, base_url).links
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn base_url() -> Url {
        Url::parse("https://example.com/page").unwrap()
    }

    fn links(html: &str) -> Vec<String> {
        parse_html(html, &base_url())
            .links
            .into_iter()
            .map(|u| u.to_string())
            .collect()
    }

    #[test]
    fn test_extract_title() {
        let html = r#"<html><head><title>  Test Page  </title></head><body></body></html>"#;
        assert_eq!(parse_html(html, &base_url()).title, Some("Test Page".to_string()));
    }

    #[test]
    fn test_no_title() {
        let html = r#"<html><head></head><body></body></html>"#;
        assert_eq!(parse_html(html, &base_url()).title, None);
    }

    #[test]
    fn test_extract_absolute_and_relative_links() {
        let html = r#"<body><a href="https://other.com/page">A</a><a href="other">B</a><a href="/x">C</a></body>"#;
        assert_eq!(
            links(html),
            vec![
                "https://other.com/page",
                "https://example.com/other",
                "https://example.com/x"
            ]
        );
    }

    #[test]
    fn test_links_are_normalized_and_deduplicated() {
        let html = r##"<body><a href="/p?b=2&a=1#top">A</a><a href="/p?a=1&b=2&utm_source=x">B</a></body>"##;
        assert_eq!(links(html), vec!["https://example.com/p?a=1&b=2"]);
    }

    #[test]
    fn test_skip_special_schemes() {
        let html = r#"
            <body>
                <a href="javascript:void(0)">J</a>
                <a href="mailto:test@example.com">M</a>
                <a href="tel:+1234567890">T</a>
                <a href="data:text/html,<h1>x</h1>">D</a>
                <a href="/valid">V</a>
            </body>"#;
        assert_eq!(links(html), vec!["https://example.com/valid"]);
    }

    #[test]
    fn test_skip_download_and_fragment_links() {
        let html = r##"<body><a href="/file.pdf" download>F</a><a href="#section">S</a></body>"##;
        assert!(links(html).is_empty());
    }

    #[test]
    fn test_follow_nofollow_links() {
        let html = r#"<body><a href="/page2" rel="nofollow">Link</a></body>"#;
        assert_eq!(links(html), vec!["https://example.com/page2"]);
    }

    #[test]
    fn test_extract_canonical_link() {
        let html = r#"<head><link rel="canonical" href="https://example.com/canonical" /></head>"#;
        assert_eq!(links(html), vec!["https://example.com/canonical"]);
    }

    #[test]
    fn test_next_links() {
        let html = r#"
            <head><link rel="next" href="/list?page=2"></head>
            <body><a rel="prev" href="/list">Prev</a><a rel="next nofollow" href="/list?page=2">Next</a></body>"#;
        let parsed = parse_html(html, &base_url());
        assert_eq!(parsed.next_links.len(), 1);
        assert_eq!(parsed.next_links[0].as_str(), "https://example.com/list?page=2");
    }

    #[test]
    fn test_script_urls() {
        let html = r#"
            <script src="/static/app.js"></script>
            <script>
                fetch("/api/products?page=1").then(r => r.json());
                const cfg = { feed: '/data/feed.json', label: "Hello there", img: "/img/logo.png" };
                const tpl = `/api/items/${id}`;
            </script>"#;
        let urls: Vec<String> = parse_html(html, &base_url())
            .script_urls
            .into_iter()
            .map(|u| u.to_string())
            .collect();
        assert_eq!(
            urls,
            vec![
                "https://example.com/api/products?page=1",
                "https://example.com/data/feed.json"
            ]
        );
    }

    #[test]
    fn test_string_literals_handle_escapes() {
        let literals = string_literals(r#"a = "x\"y"; b = 'z';"#);
        assert_eq!(literals, vec![r#"x\"y"#, "z"]);
    }

    #[test]
    fn test_json_links() {
        let value = json!({
            "items": [
                {"url": "/product/1", "name": "One"},
                {"url": "https://example.com/product/2", "name": "Two words"}
            ],
            "next": "/api/products?page=2",
            "count": 2
        });
        let found: Vec<String> = json_links(&value, &base_url())
            .into_iter()
            .map(|u| u.to_string())
            .collect();
        assert_eq!(found.len(), 3);
        assert!(found.contains(&"https://example.com/product/1".to_string()));
        assert!(found.contains(&"https://example.com/product/2".to_string()));
        assert!(found.contains(&"https://example.com/api/products?page=2".to_string()));
    }
}
