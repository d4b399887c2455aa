//! Robots.txt handling module
//!
//! This module provides functionality for fetching, parsing, and caching robots.txt files.
//! Robots files are fetched through the same [`Transport`] as pages.

mod cache;
mod parser;

pub use cache::{CachedRobots, RobotsCache};
pub use parser::ParsedRobots;

use crate::crawler::Transport;
use tracing::{debug, warn};
use url::Url;

/// Outcome of a robots.txt lookup
#[derive(Debug, Clone)]
pub struct RobotsLookup {
    pub robots: ParsedRobots,
    /// False when the rules are a stand-in for an unreachable robots.txt
    pub cacheable: bool,
}

/// Fetches robots.txt for the origin of `url`
///
/// | Response | Rules | Cached |
/// |----------|-------|--------|
/// | 2xx | parsed body | yes |
/// | 4xx | allow all | yes |
/// | 5xx, network failure | disallow all | no |
///
/// # Arguments
///
/// * `transport` - The transport used for page fetches
/// * `url` - Any URL on the host whose robots.txt is wanted
pub async fn fetch_robots(transport: &dyn Transport, url: &Url) -> RobotsLookup {
    let mut robots_url = url.clone();
    robots_url.set_path("/robots.txt");
    robots_url.set_query(None);
    robots_url.set_fragment(None);

    match transport.get(&robots_url).await {
        Ok(response) if response.is_success() => {
            let content = String::from_utf8_lossy(&response.body);
            debug!("Fetched {} ({} bytes)", robots_url, response.body.len());
            RobotsLookup {
                robots: ParsedRobots::from_content(&content),
                cacheable: true,
            }
        }
        Ok(response) if (400..500).contains(&response.status) => {
            debug!("{} answered {}, allowing all", robots_url, response.status);
            RobotsLookup {
                robots: ParsedRobots::allow_all(),
                cacheable: true,
            }
        }
        Ok(response) => {
            warn!(
                "{} answered {}, treating host as disallowed",
                robots_url, response.status
            );
            RobotsLookup {
                robots: ParsedRobots::disallow_all(),
                cacheable: false,
            }
        }
        Err(e) => {
            warn!("Failed to fetch {}: {}, treating host as disallowed", robots_url, e);
            RobotsLookup {
                robots: ParsedRobots::disallow_all(),
                cacheable: false,
            }
        }
    }
}
