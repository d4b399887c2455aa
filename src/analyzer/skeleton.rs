//! Structural skeletons and their similarity
//!
//! A skeleton is the set of structural paths of a document with all content
//! removed:
//! - HTML: tag paths from the root (`html > body > div > h1`)
//! - JSON: key paths with array indices collapsed (`$.items[].name`)
//! - anything else: a single `content-type:<mime>` entry

use crate::analyzer::model::ContentKind;
use crate::storage::Snapshot;
use scraper::{ElementRef, Html};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

pub type Skeleton = BTreeSet<String>;

/// Computes the content kind and skeleton of a snapshot
///
/// JSON that does not parse is treated as opaque content.
pub fn skeleton_of(snapshot: &Snapshot) -> (ContentKind, Skeleton) {
    let mime = snapshot.mime();
    match ContentKind::from_mime(&mime) {
        ContentKind::Html => (ContentKind::Html, html_skeleton(&snapshot.text())),
        ContentKind::Json => match serde_json::from_slice::<Value>(&snapshot.raw_bytes) {
            Ok(value) => (ContentKind::Json, json_skeleton(&value)),
            Err(_) => (ContentKind::Other, other_skeleton(&mime)),
        },
        ContentKind::Other => (ContentKind::Other, other_skeleton(&mime)),
    }
}

pub fn html_skeleton(html: &str) -> Skeleton {
    let document = Html::parse_document(html);
    document
        .root_element()
        .descendants()
        .filter_map(ElementRef::wrap)
        .map(|el| tag_path(&el))
        .collect()
}

/// Tag names from the document root down to `el`, joined as a CSS child chain
pub fn tag_path(el: &ElementRef) -> String {
    let mut names: Vec<&str> = el
        .ancestors()
        .filter_map(ElementRef::wrap)
        .map(|e| e.value().name())
        .collect();
    names.reverse();
    names.push(el.value().name());
    names.join(" > ")
}

pub fn json_skeleton(value: &Value) -> Skeleton {
    let mut paths = Skeleton::new();
    collect_json_paths(value, "$".to_string(), &mut paths);
    paths
}

fn collect_json_paths(value: &Value, path: String, paths: &mut Skeleton) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                collect_json_paths(child, format!("{}.{}", path, key), paths);
            }
        }
        Value::Array(items) => {
            let item_path = format!("{}[]", path);
            for item in items {
                collect_json_paths(item, item_path.clone(), paths);
            }
        }
        _ => {}
    }
    paths.insert(path);
}

fn other_skeleton(mime: &str) -> Skeleton {
    let mut paths = Skeleton::new();
    paths.insert(format!("content-type:{}", mime));
    paths
}

/// Jaccard similarity of two skeletons
///
/// Two empty skeletons are identical.
pub fn jaccard(a: &Skeleton, b: &Skeleton) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    intersection as f64 / union as f64
}

/// Similarity that never matches across content kinds
pub fn similarity(kind_a: ContentKind, a: &Skeleton, kind_b: ContentKind, b: &Skeleton) -> f64 {
    if kind_a != kind_b {
        return 0.0;
    }
    jaccard(a, b)
}

/// Stable identifier of a skeleton: `<kind>:<16 hex digits>`
pub fn signature(kind: ContentKind, skeleton: &Skeleton) -> String {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_str().as_bytes());
    for path in skeleton {
        hasher.update(b"\n");
        hasher.update(path.as_bytes());
    }
    let digest = hex::encode(hasher.finalize());
    format!("{}:{}", kind.as_str(), &digest[..16])
}
