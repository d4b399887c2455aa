//! HTTP transport boundary
//!
//! Everything that leaves the process for a site goes through [`Transport`]:
//! page fetches and robots.txt lookups alike. The production implementation wraps
//! a `reqwest::Client`; tests substitute canned responses.

use crate::config::{FetcherConfig, UserAgentConfig};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use reqwest::{redirect::Policy, Client};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// A response as seen by the fetcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    /// Header names are lowercased
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl RawResponse {
    /// Content-Type header, or `application/octet-stream` when absent
    pub fn content_type(&self) -> &str {
        self.headers
            .get("content-type")
            .map(String::as_str)
            .unwrap_or("application/octet-stream")
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Failures below the HTTP layer
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("transport error: {0}")]
    Other(String),
}

/// Issues a GET request and returns the complete response
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &Url) -> Result<RawResponse, TransportError>;
}

/// Failures while building the production HTTP client
#[derive(Debug, Error)]
pub enum ClientBuildError {
    #[error("invalid request header '{0}'")]
    Header(String),

    #[error("environment variable {0} holding the authorization value is not set")]
    MissingCredential(String),

    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),
}

/// Builds an HTTP client with proper configuration
///
/// The user agent has the form `CrawlerName/Version (+ContactURL; ContactEmail)`.
/// The configured site headers, and the `Authorization` value read from
/// `authorization-env`, are sent with every request.
///
/// # Arguments
///
/// * `user_agent` - The user agent configuration
/// * `fetcher` - Timeouts, redirect bound and request headers
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(ClientBuildError)` - A header is invalid, the credential is missing or
///   reqwest refused the settings
pub fn build_http_client(
    user_agent: &UserAgentConfig,
    fetcher: &FetcherConfig,
) -> Result<Client, ClientBuildError> {
    let client = Client::builder()
        .user_agent(user_agent.header_value())
        .default_headers(request_headers(fetcher)?)
        .timeout(Duration::from_secs(fetcher.request_timeout_secs))
        .connect_timeout(Duration::from_secs(fetcher.connect_timeout_secs))
        .redirect(Policy::limited(fetcher.max_redirects))
        .gzip(true)
        .brotli(true)
        .build()?;
    Ok(client)
}

fn request_headers(fetcher: &FetcherConfig) -> Result<HeaderMap, ClientBuildError> {
    let mut headers = HeaderMap::new();
    for (name, value) in &fetcher.headers {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| ClientBuildError::Header(name.clone()))?;
        let value = HeaderValue::from_str(value).map_err(|_| ClientBuildError::Header(name.as_str().to_string()))?;
        headers.insert(name, value);
    }

    if let Some(var) = &fetcher.authorization_env {
        let secret = std::env::var(var).map_err(|_| ClientBuildError::MissingCredential(var.clone()))?;
        let mut value =
            HeaderValue::from_str(&secret).map_err(|_| ClientBuildError::Header(AUTHORIZATION.as_str().to_string()))?;
        value.set_sensitive(true);
        headers.insert(AUTHORIZATION, value);
    }

    Ok(headers)
}

/// `Transport` backed by reqwest
#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Builds the client from configuration
    pub fn from_config(
        user_agent: &UserAgentConfig,
        fetcher: &FetcherConfig,
    ) -> Result<Self, ClientBuildError> {
        Ok(Self::new(build_http_client(user_agent, fetcher)?))
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(&self, url: &Url) -> Result<RawResponse, TransportError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_lowercase(), v.to_string()))
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(classify_reqwest_error)?
            .to_vec();

        Ok(RawResponse {
            status,
            headers,
            body,
        })
    }
}

/// Maps reqwest failures onto the transport error kinds
pub(crate) fn classify_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else if err.is_connect() {
        TransportError::Connect(err.to_string())
    } else {
        TransportError::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, header_regex, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn user_agent() -> UserAgentConfig {
        UserAgentConfig {
            crawler_name: "StrataBot".to_string(),
            crawler_version: "0.1".to_string(),
            contact_url: "https://example.com/bot".to_string(),
            contact_email: "bot@example.com".to_string(),
        }
    }

    #[test]
    fn test_content_type_default() {
        let response = RawResponse {
            status: 200,
            headers: HashMap::new(),
            body: vec![],
        };
        assert_eq!(response.content_type(), "application/octet-stream");
        assert!(response.is_success());
    }

    #[tokio::test]
    async fn test_reqwest_transport_sends_user_agent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .and(header_regex("user-agent", "^StrataBot/0.1 "))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Type", "text/html")
                    .set_body_string("<html></html>"),
            )
            .mount(&server)
            .await;

        let transport =
            ReqwestTransport::from_config(&user_agent(), &FetcherConfig::default()).unwrap();
        let url = Url::parse(&format!("{}/page", server.uri())).unwrap();
        let response = transport.get(&url).await.unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.content_type(), "text/html");
        assert_eq!(response.body, b"<html></html>");
    }

    #[tokio::test]
    async fn test_site_headers_and_authorization_are_sent() {
        std::env::set_var("STRATA_TRANSPORT_TEST_TOKEN", "Bearer t0k3n");
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/private"))
            .and(header("x-api-key", "abc123"))
            .and(header("authorization", "Bearer t0k3n"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let mut fetcher = FetcherConfig::default();
        fetcher.headers.insert("X-Api-Key".to_string(), "abc123".to_string());
        fetcher.authorization_env = Some("STRATA_TRANSPORT_TEST_TOKEN".to_string());
        let transport = ReqwestTransport::from_config(&user_agent(), &fetcher).unwrap();

        let url = Url::parse(&format!("{}/private", server.uri())).unwrap();
        let response = transport.get(&url).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, b"ok");
    }

    #[test]
    fn test_missing_authorization_variable() {
        let fetcher = FetcherConfig {
            authorization_env: Some("STRATA_TRANSPORT_TEST_UNSET".to_string()),
            ..FetcherConfig::default()
        };
        let err = build_http_client(&user_agent(), &fetcher).unwrap_err();
        assert!(matches!(err, ClientBuildError::MissingCredential(var) if var == "STRATA_TRANSPORT_TEST_UNSET"));
    }

    #[tokio::test]
    async fn test_reqwest_transport_reports_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let transport =
            ReqwestTransport::from_config(&user_agent(), &FetcherConfig::default()).unwrap();
        let url = Url::parse(&format!("{}/x", server.uri())).unwrap();
        assert_eq!(transport.get(&url).await.unwrap().status, 503);
    }

    #[tokio::test]
    async fn test_connection_refused_is_connect_error() {
        let transport =
            ReqwestTransport::from_config(&user_agent(), &FetcherConfig::default()).unwrap();
        // Port 9 (discard) is closed on test hosts
        let url = Url::parse("http://127.0.0.1:9/").unwrap();
        let err = transport.get(&url).await.unwrap_err();
        assert!(matches!(
            err,
            TransportError::Connect(_) | TransportError::Timeout
        ));
    }
}
