use url::Url;

/// Returns the key used to group requests and robots rules by host
///
/// The key is the lowercase host plus an explicit port when the URL carries one,
/// so two services on the same machine keep separate politeness budgets.
///
/// # Arguments
///
/// * `url` - The URL to extract the host key from
///
/// # Returns
///
/// * `Some(String)` - `host` or `host:port`
/// * `None` - If the URL has no host
///
/// # Examples
///
/// ```
/// use url::Url;
/// use sumi_strata::url::host_key;
///
/// let url = Url::parse("https://EXAMPLE.COM/path").unwrap();
/// assert_eq!(host_key(&url), Some("example.com".to_string()));
///
/// let url = Url::parse("http://127.0.0.1:8080/").unwrap();
/// assert_eq!(host_key(&url), Some("127.0.0.1:8080".to_string()));
/// ```
pub fn host_key(url: &Url) -> Option<String> {
    let host = url.host_str()?.to_lowercase();
    match url.port() {
        Some(port) => Some(format!("{}:{}", host, port)),
        None => Some(host),
    }
}

/// Returns the `scheme://host[:port]` origin of a URL, without trailing slash
pub fn origin_of(url: &Url) -> Option<String> {
    let key = host_key(url)?;
    Some(format!("{}://{}", url.scheme(), key))
}

/// True when both URLs target the same host key
pub fn same_host(a: &Url, b: &Url) -> bool {
    match (host_key(a), host_key(b)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}
