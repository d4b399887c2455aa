//! Crawler module for page fetching and link discovery
//!
//! This module contains the retrieval side of the pipeline, including:
//! - The transport boundary and its reqwest implementation
//! - Per-host rate limiting
//! - HTTP fetching with robots.txt checks and retry logic
//! - HTML/JSON link extraction
//! - The bounded discovery crawl run from seed URLs

mod discovery;
mod fetcher;
mod parser;
mod rate_limit;
mod transport;

pub use discovery::{discover, DiscoveryOutcome};
pub use fetcher::Fetcher;
pub use parser::{extract_links_simple, json_links, parse_html, ParsedPage};
pub use rate_limit::{HostPermit, RateLimiter};
pub(crate) use transport::classify_reqwest_error;
pub use transport::{build_http_client, ClientBuildError, RawResponse, ReqwestTransport, Transport, TransportError};
