//! Crawl plans
//!
//! A [`CrawlPlan`] tells a crawler where to start, which pages to extract into
//! which table, which links to follow from each page, and when to stop following
//! a paginated listing. A plan always shares its version with the schema it was
//! generated against.

mod generate;
mod termination;

pub use generate::generate;
pub use termination::TerminationCondition;

use crate::analyzer::{Locator, NavigationEdge};
use crate::schema::DatabaseSchema;
use crate::url::UrlTemplate;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// Where a crawl starts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seed {
    /// A concrete URL observed during analysis
    pub url: String,
    /// Template of the entry pattern, e.g. `/category/{slug}`
    pub template: Option<String>,
    pub pattern: String,
}

/// Which pages a rule applies to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchPattern {
    pub signature: String,
    pub url_template: Option<UrlTemplate>,
}

impl MatchPattern {
    /// True if `url` has the pattern's URL shape; patterns without a template match nothing
    pub fn matches_url(&self, url: &Url) -> bool {
        self.url_template
            .as_ref()
            .map(|t| t.matches(url))
            .unwrap_or(false)
    }
}

/// Where a column's value comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "from", rename_all = "snake_case")]
pub enum FieldSource {
    /// Read from the page itself
    Page { locator: Locator },
    /// Key of the page the crawler arrived from
    Parent { table: String, field: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub field: String,
    pub source: FieldSource,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionRule {
    pub match_pattern: MatchPattern,
    pub emits_table: String,
    pub field_mappings: Vec<FieldMapping>,
    /// Every outgoing navigation edge of the pattern
    pub follow_edges: Vec<NavigationEdge>,
    pub termination_condition: TerminationCondition,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlPlan {
    pub site_id: String,
    /// Equals the version of the paired schema
    pub version: u32,
    pub model_version: u32,
    pub created_at: DateTime<Utc>,
    pub seeds: Vec<Seed>,
    pub rules: Vec<ExtractionRule>,
}

impl CrawlPlan {
    pub fn rule_for(&self, signature: &str) -> Option<&ExtractionRule> {
        self.rules
            .iter()
            .find(|r| r.match_pattern.signature == signature)
    }

    /// First rule whose URL template matches `url`
    pub fn rule_for_url(&self, url: &Url) -> Option<&ExtractionRule> {
        self.rules.iter().find(|r| r.match_pattern.matches_url(url))
    }

    /// Checks the plan against its schema
    ///
    /// # Returns
    ///
    /// Descriptions of every emitted table or mapped field the schema lacks;
    /// empty when the pair is consistent.
    pub fn missing_in(&self, schema: &DatabaseSchema) -> Vec<String> {
        let mut problems = Vec::new();
        if schema.version != self.version {
            problems.push(format!(
                "plan v{} paired with schema v{}",
                self.version, schema.version
            ));
        }
        for rule in &self.rules {
            let Some(table) = schema.table(&rule.emits_table) else {
                problems.push(format!("table '{}'", rule.emits_table));
                continue;
            };
            for mapping in &rule.field_mappings {
                if table.field(&mapping.field).is_none() {
                    problems.push(format!("field '{}.{}'", table.name, mapping.field));
                }
            }
        }
        problems
    }
}
