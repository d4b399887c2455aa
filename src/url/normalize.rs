use crate::UrlError;
use url::Url;

/// List of tracking query parameters to remove during normalization
const TRACKING_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "fbclid",
    "gclid",
    "mc_eid",
];

/// Normalizes a URL into the identity used for snapshots and link matching
///
/// # Normalization Steps
///
/// 1. Parse the URL; reject if malformed
/// 2. Require an HTTP(S) scheme and a host
/// 3. Lowercase the host (the `url` crate already lowercases and resolves dot segments)
/// 4. Remove fragment (everything after #)
/// 5. Remove tracking query parameters
/// 6. Sort remaining query parameters by key (stable for repeated keys)
/// 7. Remove empty query string (trailing ?)
///
/// Path and `www.` prefixes are kept untouched: the normalized URL is still the URL
/// that gets fetched, and servers are free to treat `/a` and `/a/` differently.
///
/// # Examples
///
/// ```
/// use sumi_strata::url::normalize_url;
///
/// let url = normalize_url("HTTPS://Example.COM/list?utm_source=x&page=2#top").unwrap();
/// assert_eq!(url.as_str(), "https://example.com/list?page=2");
/// ```
pub fn normalize_url(url_str: &str) -> Result<Url, UrlError> {
    let mut url = Url::parse(url_str.trim()).map_err(|e| UrlError::Parse(e.to_string()))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(format!(
            "Only HTTP and HTTPS schemes are supported, got: {}",
            url.scheme()
        )));
    }

    let host = url
        .host_str()
        .map(|h| h.to_lowercase())
        .ok_or(UrlError::MissingHost)?;
    url.set_host(Some(&host))
        .map_err(|e| UrlError::Malformed(format!("Failed to set host: {}", e)))?;

    url.set_fragment(None);

    if url.query().is_some() {
        let params = filter_and_sort_query_params(&url);
        if params.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(params);
        }
    }

    Ok(url)
}

/// Resolves `href` against `base` and normalizes the result
///
/// Returns None for links that cannot identify a fetchable page.
pub fn resolve_and_normalize(base: &Url, href: &str) -> Option<Url> {
    let joined = base.join(href.trim()).ok()?;
    normalize_url(joined.as_str()).ok()
}

/// Filters out tracking parameters and sorts remaining query parameters
fn filter_and_sort_query_params(url: &Url) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !is_tracking_param(key))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    params.sort_by(|a, b| a.0.cmp(&b.0));

    params
}

/// Checks if a query parameter is a tracking parameter
fn is_tracking_param(key: &str) -> bool {
    TRACKING_PARAMS.contains(&key) || key.starts_with("utm_")
}
