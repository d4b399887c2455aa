//! Structural model types
//!
//! A [`StructuralModel`] is what the analyzer learns about a site: the distinct
//! page shapes it serves ([`NodePattern`]) and how those shapes link to each
//! other ([`NavigationEdge`]). Models are versioned and persisted as JSON.

use crate::url::{PageSlot, UrlTemplate};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Broad content family of a snapshot; only snapshots of the same kind cluster together
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Html,
    Json,
    Other,
}

impl ContentKind {
    /// Classifies a media type (parameters already stripped)
    pub fn from_mime(mime: &str) -> Self {
        if mime.contains("html") || mime.contains("xhtml") {
            Self::Html
        } else if mime.contains("json") {
            Self::Json
        } else {
            Self::Other
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Html => "html",
            Self::Json => "json",
            Self::Other => "other",
        }
    }
}

/// Reference to a snapshot that exemplifies a pattern
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRef {
    pub content_hash: String,
    pub url: String,
}

/// Where a field's value is found inside a page of its pattern
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Locator {
    /// The `index`-th element matching `selector`; its own text, or `attribute` when set
    Css {
        selector: String,
        index: usize,
        attribute: Option<String>,
    },
    /// RFC 6901 pointer into a JSON document
    JsonPointer { pointer: String },
    /// A placeholder of the pattern's URL template
    UrlParam { name: String },
    /// The whole response body
    RawContent,
}

/// A value read from one member snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ObservedValue {
    Text(String),
    Json(serde_json::Value),
    Missing,
}

/// One observation of a field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Content hash of the member snapshot
    pub snapshot: String,
    pub value: ObservedValue,
}

/// A field the inference capability proposed for a pattern, located in its pages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldCandidate {
    pub name: String,
    /// Free-form type hint from inference (`string`, `integer`, `price`, ...)
    pub semantic_type: String,
    pub example_value: String,
    /// None when the example value could not be found in any member
    pub locator: Option<Locator>,
    pub observations: Vec<Observation>,
}

impl FieldCandidate {
    /// True if some member lacks the field
    pub fn has_missing(&self) -> bool {
        self.observations
            .iter()
            .any(|o| o.value == ObservedValue::Missing)
    }
}

/// Outcome of field inference for a pattern
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FieldResolution {
    Resolved { fields: Vec<FieldCandidate> },
    Unresolved { reason: String },
}

/// Observed pagination of a pattern
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationHint {
    pub slot: PageSlot,
    /// URL of the lowest-numbered page seen
    pub first_page_url: String,
    /// Highest page number whose snapshot matched the pattern
    pub last_matching_page: u32,
    /// First page past `last_matching_page` whose snapshot fell outside the pattern
    pub terminal_url: Option<String>,
}

/// A distinct page shape of the site
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodePattern {
    pub signature: String,
    pub kind: ContentKind,
    pub skeleton: BTreeSet<String>,
    pub url_template: Option<UrlTemplate>,
    pub examples: Vec<SnapshotRef>,
    pub fields: FieldResolution,
    /// Set when the latest analysis saw no page of this shape
    pub stale: bool,
    /// Model version that first contained this signature
    pub first_seen_version: u32,
    pub pagination: Option<PaginationHint>,
}

impl NodePattern {
    pub fn is_resolved(&self) -> bool {
        matches!(self.fields, FieldResolution::Resolved { .. })
    }

    /// Located fields; empty for unresolved patterns
    pub fn resolved_fields(&self) -> &[FieldCandidate] {
        match &self.fields {
            FieldResolution::Resolved { fields } => fields,
            FieldResolution::Unresolved { .. } => &[],
        }
    }

    /// URL template placeholder names, in template order
    pub fn key_names(&self) -> Vec<String> {
        self.url_template
            .as_ref()
            .map(|t| t.placeholders())
            .unwrap_or_default()
    }
}

/// How one pattern leads to another
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    Link,
    Pagination,
    ApiCall,
}

impl RelationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Link => "link",
            Self::Pagination => "pagination",
            Self::ApiCall => "api_call",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NavigationEdge {
    pub from: String,
    pub to: String,
    pub kind: RelationKind,
    /// Key of the source pattern that identifies the target's parent row
    pub shared_key: Option<String>,
}

impl NavigationEdge {
    pub fn is_self_edge(&self) -> bool {
        self.from == self.to
    }
}

/// Everything learned about a site in one analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuralModel {
    pub site_id: String,
    pub version: u32,
    pub created_at: DateTime<Utc>,
    /// Ordered by first appearance
    pub node_patterns: Vec<NodePattern>,
    pub navigation_edges: Vec<NavigationEdge>,
}

impl StructuralModel {
    pub fn pattern(&self, signature: &str) -> Option<&NodePattern> {
        self.node_patterns.iter().find(|p| p.signature == signature)
    }

    pub fn resolved_patterns(&self) -> impl Iterator<Item = &NodePattern> {
        self.node_patterns.iter().filter(|p| p.is_resolved())
    }

    pub fn edges_from<'a>(&'a self, signature: &'a str) -> impl Iterator<Item = &'a NavigationEdge> {
        self.navigation_edges.iter().filter(move |e| e.from == signature)
    }

    /// True if another pattern links or paginates into `signature`
    pub fn has_incoming_edge(&self, signature: &str) -> bool {
        self.navigation_edges.iter().any(|e| {
            e.to == signature
                && !e.is_self_edge()
                && matches!(e.kind, RelationKind::Link | RelationKind::Pagination)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(signature: &str, fields: FieldResolution) -> NodePattern {
        NodePattern {
            signature: signature.to_string(),
            kind: ContentKind::Html,
            skeleton: BTreeSet::new(),
            url_template: None,
            examples: vec![],
            fields,
            stale: false,
            first_seen_version: 1,
            pagination: None,
        }
    }

    #[test]
    fn test_content_kind_from_mime() {
        assert_eq!(ContentKind::from_mime("text/html"), ContentKind::Html);
        assert_eq!(ContentKind::from_mime("application/xhtml+xml"), ContentKind::Html);
        assert_eq!(ContentKind::from_mime("application/ld+json"), ContentKind::Json);
        assert_eq!(ContentKind::from_mime("image/png"), ContentKind::Other);
    }

    #[test]
    fn test_incoming_edges_ignore_self_and_api_calls() {
        let model = StructuralModel {
            site_id: "s".to_string(),
            version: 1,
            created_at: Utc::now(),
            node_patterns: vec![
                pattern("a", FieldResolution::Resolved { fields: vec![] }),
                pattern("b", FieldResolution::Unresolved { reason: "timeout".to_string() }),
                pattern("c", FieldResolution::Resolved { fields: vec![] }),
            ],
            navigation_edges: vec![
                NavigationEdge {
                    from: "a".to_string(),
                    to: "a".to_string(),
                    kind: RelationKind::Pagination,
                    shared_key: None,
                },
                NavigationEdge {
                    from: "a".to_string(),
                    to: "b".to_string(),
                    kind: RelationKind::Link,
                    shared_key: None,
                },
                NavigationEdge {
                    from: "a".to_string(),
                    to: "c".to_string(),
                    kind: RelationKind::ApiCall,
                    shared_key: None,
                },
            ],
        };

        assert!(!model.has_incoming_edge("a"));
        assert!(model.has_incoming_edge("b"));
        assert!(!model.has_incoming_edge("c"));
        assert_eq!(model.resolved_patterns().count(), 2);
        assert_eq!(model.edges_from("a").count(), 3);
    }

    #[test]
    fn test_model_json_shape() {
        let p = pattern("html:0011223344556677", FieldResolution::Unresolved { reason: "x".to_string() });
        let value = serde_json::to_value(&p).unwrap();
        assert_eq!(value["kind"], "html");
        assert_eq!(value["fields"]["status"], "unresolved");
    }
}
