//! Robots.txt parser implementation
//!
//! Allow/disallow matching is delegated to the robotstxt crate; the crate does
//! not expose `Crawl-delay`, so that directive is read here.

use robotstxt::DefaultMatcher;
use std::time::Duration;

/// Longest crawl delay honored; matches the robots cache lifetime
pub const MAX_CRAWL_DELAY: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Policy {
    AllowAll,
    DisallowAll,
    Rules,
}

/// Parsed robots.txt data
///
/// This is a wrapper around the robotstxt crate's matcher, providing a simplified
/// interface for checking if URLs are allowed.
#[derive(Debug, Clone)]
pub struct ParsedRobots {
    content: String,
    policy: Policy,
}

impl ParsedRobots {
    /// Creates a new ParsedRobots from raw robots.txt content
    pub fn from_content(content: &str) -> Self {
        Self {
            content: content.to_string(),
            policy: Policy::Rules,
        }
    }

    /// Permissive rules, used when the site has no robots.txt (4xx)
    pub fn allow_all() -> Self {
        Self {
            content: String::new(),
            policy: Policy::AllowAll,
        }
    }

    /// Blocking rules, used while robots.txt is unreachable (5xx, network failure)
    pub fn disallow_all() -> Self {
        Self {
            content: String::new(),
            policy: Policy::DisallowAll,
        }
    }

    /// Returns the raw robots.txt content
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Checks if a URL is allowed for the given product token
    ///
    /// # Arguments
    ///
    /// * `url` - The absolute URL to check
    /// * `product_token` - The crawler name as it appears in `User-agent` lines
    ///
    /// # Returns
    ///
    /// * `true` - If the URL is allowed
    /// * `false` - If the URL is disallowed
    pub fn is_allowed(&self, url: &str, product_token: &str) -> bool {
        match self.policy {
            Policy::AllowAll => true,
            Policy::DisallowAll => false,
            Policy::Rules if self.content.trim().is_empty() => true,
            Policy::Rules => {
                let mut matcher = DefaultMatcher::default();
                matcher.one_agent_allowed_by_robots(&self.content, product_token, url)
            }
        }
    }

    /// Gets the crawl delay requested for a product token
    ///
    /// A group naming the token wins over the `*` group. Delays above
    /// [`MAX_CRAWL_DELAY`] are clamped to it.
    ///
    /// # Returns
    ///
    /// * `Some(Duration)` - The requested delay between requests
    /// * `None` - If no usable crawl delay is specified
    pub fn crawl_delay(&self, product_token: &str) -> Option<Duration> {
        if self.policy != Policy::Rules {
            return None;
        }

        let token = product_token.to_lowercase();
        let mut group_agents: Vec<String> = Vec::new();
        let mut in_rules = false;
        let mut for_agent: Option<f64> = None;
        let mut for_wildcard: Option<f64> = None;

        for line in self.content.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim().to_lowercase();
            let value = value.trim();

            match key.as_str() {
                "user-agent" => {
                    // A user-agent line after rules opens a new group
                    if in_rules {
                        group_agents.clear();
                        in_rules = false;
                    }
                    group_agents.push(value.to_lowercase());
                }
                "crawl-delay" => {
                    in_rules = true;
                    let Ok(delay) = value.parse::<f64>() else {
                        continue;
                    };
                    if !delay.is_finite() || delay < 0.0 {
                        continue;
                    }
                    let names_us = group_agents
                        .iter()
                        .any(|a| !a.is_empty() && a != "*" && token.contains(a.as_str()));
                    if names_us {
                        for_agent = Some(delay);
                    } else if group_agents.iter().any(|a| a == "*") {
                        for_wildcard = Some(delay);
                    }
                }
                _ => in_rules = true,
            }
        }

        let delay = for_agent.or(for_wildcard)?;
        Duration::try_from_secs_f64(delay.min(MAX_CRAWL_DELAY.as_secs_f64())).ok()
    }
}
