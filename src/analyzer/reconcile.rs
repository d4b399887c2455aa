//! Reconciliation of a fresh analysis with the previous model
//!
//! Patterns keep their identity across runs: a new cluster that closely resembles
//! a prior pattern takes over that pattern's signature. Prior patterns nobody
//! claimed are kept and flagged stale; nothing is ever dropped.

use crate::analyzer::model::{NavigationEdge, NodePattern, RelationKind, StructuralModel};
use crate::analyzer::skeleton::similarity;
use std::collections::HashSet;
use tracing::{debug, warn};

/// Minimum skeleton similarity for a new cluster to inherit a prior signature
pub const RECONCILE_THRESHOLD: f64 = 0.75;

/// Merges freshly built patterns into the prior model's patterns
///
/// Matching is greedy over all (new, prior) pairs, most similar first, so an
/// exact skeleton match always wins its prior pattern.
///
/// # Arguments
///
/// * `fresh` - Patterns built in this analysis, signatures computed from their skeletons
/// * `prior` - The previous model, if any
/// * `version` - Version of the model being built
///
/// # Returns
///
/// The reconciled patterns (prior order first, then new patterns) and, for each
/// entry of `fresh`, the signature it ended up with.
pub fn reconcile(
    fresh: Vec<NodePattern>,
    prior: Option<&StructuralModel>,
    version: u32,
) -> (Vec<NodePattern>, Vec<String>) {
    let Some(prior) = prior else {
        let signatures = fresh.iter().map(|p| p.signature.clone()).collect();
        let patterns = fresh
            .into_iter()
            .map(|mut p| {
                p.first_seen_version = version;
                p
            })
            .collect();
        return (patterns, signatures);
    };

    let mut pairs: Vec<(f64, usize, usize)> = Vec::new();
    for (i, new) in fresh.iter().enumerate() {
        for (j, old) in prior.node_patterns.iter().enumerate() {
            let score = similarity(new.kind, &new.skeleton, old.kind, &old.skeleton);
            if score >= RECONCILE_THRESHOLD {
                pairs.push((score, i, j));
            }
        }
    }
    pairs.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));

    let mut claimed_by: Vec<Option<usize>> = vec![None; prior.node_patterns.len()];
    let mut matched: Vec<Option<usize>> = vec![None; fresh.len()];
    for (score, i, j) in pairs {
        if matched[i].is_some() || claimed_by[j].is_some() {
            continue;
        }
        debug!(
            "Pattern {} continues {} (similarity {:.2})",
            fresh[i].signature, prior.node_patterns[j].signature, score
        );
        matched[i] = Some(j);
        claimed_by[j] = Some(i);
    }

    let mut signatures: Vec<String> = Vec::with_capacity(fresh.len());
    let mut fresh: Vec<Option<NodePattern>> = fresh.into_iter().map(Some).collect();
    for (i, slot) in fresh.iter_mut().enumerate() {
        let Some(pattern) = slot.as_mut() else {
            continue;
        };
        match matched[i] {
            Some(j) => {
                let old = &prior.node_patterns[j];
                inherit(pattern, old);
            }
            None => pattern.first_seen_version = version,
        }
        signatures.push(pattern.signature.clone());
    }

    let mut patterns = Vec::with_capacity(prior.node_patterns.len() + fresh.len());
    for (j, old) in prior.node_patterns.iter().enumerate() {
        match claimed_by[j].and_then(|i| fresh[i].take()) {
            Some(pattern) => patterns.push(pattern),
            None => {
                let mut kept = old.clone();
                if !kept.stale {
                    debug!("Pattern {} not seen this run, marking stale", kept.signature);
                }
                kept.stale = true;
                patterns.push(kept);
            }
        }
    }
    patterns.extend(fresh.into_iter().flatten());

    (patterns, signatures)
}

/// Gives `pattern` the identity of `old`, keeping prior knowledge the new run lacks
fn inherit(pattern: &mut NodePattern, old: &NodePattern) {
    pattern.signature = old.signature.clone();
    pattern.first_seen_version = old.first_seen_version;
    pattern.stale = false;

    if !pattern.is_resolved() && old.is_resolved() {
        warn!(
            "Inference unresolved for {}, keeping fields from version {}",
            old.signature, old.first_seen_version
        );
        pattern.fields = old.fields.clone();
    }
    if pattern.pagination.is_none() {
        pattern.pagination = old.pagination.clone();
    }
    if pattern.url_template.is_none() {
        pattern.url_template = old.url_template.clone();
    }
}

/// New edges followed by prior edges not rediscovered
///
/// Edges are identified by (from, to, kind); the new edge wins on conflicts.
pub fn merge_edges(fresh: Vec<NavigationEdge>, prior: Option<&StructuralModel>) -> Vec<NavigationEdge> {
    let mut seen: HashSet<(String, String, RelationKind)> =
        fresh.iter().map(|e| (e.from.clone(), e.to.clone(), e.kind)).collect();
    let mut edges = fresh;

    if let Some(prior) = prior {
        for edge in &prior.navigation_edges {
            if seen.insert((edge.from.clone(), edge.to.clone(), edge.kind)) {
                edges.push(edge.clone());
            }
        }
    }

    edges
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::model::{ContentKind, FieldResolution};
    use crate::analyzer::skeleton::{signature, Skeleton};
    use chrono::Utc;

    fn sk(paths: &[&str]) -> Skeleton {
        paths.iter().map(|s| s.to_string()).collect()
    }

    fn pattern(paths: &[&str], fields: FieldResolution) -> NodePattern {
        let skeleton = sk(paths);
        NodePattern {
            signature: signature(ContentKind::Html, &skeleton),
            kind: ContentKind::Html,
            skeleton,
            url_template: None,
            examples: vec![],
            fields,
            stale: false,
            first_seen_version: 0,
            pagination: None,
        }
    }

    fn resolved() -> FieldResolution {
        FieldResolution::Resolved { fields: vec![] }
    }

    fn model(patterns: Vec<NodePattern>, version: u32) -> StructuralModel {
        StructuralModel {
            site_id: "s".to_string(),
            version,
            created_at: Utc::now(),
            node_patterns: patterns,
            navigation_edges: vec![],
        }
    }

    #[test]
    fn test_without_prior_everything_is_new() {
        let (patterns, signatures) = reconcile(vec![pattern(&["a"], resolved())], None, 1);
        assert_eq!(patterns[0].first_seen_version, 1);
        assert_eq!(signatures, vec![patterns[0].signature.clone()]);
    }

    #[test]
    fn test_similar_cluster_keeps_prior_signature() {
        let (first, _) = reconcile(vec![pattern(&["a", "b", "c", "d"], resolved())], None, 1);
        let prior = model(first, 1);

        // 4 of 5 paths shared: 0.8
        let (patterns, signatures) = reconcile(vec![pattern(&["a", "b", "c", "d", "e"], resolved())], Some(&prior), 2);

        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].signature, prior.node_patterns[0].signature);
        assert_eq!(patterns[0].first_seen_version, 1);
        assert_eq!(patterns[0].skeleton.len(), 5);
        assert_eq!(signatures[0], prior.node_patterns[0].signature);
    }

    #[test]
    fn test_unmatched_prior_is_kept_stale_and_new_is_appended() {
        let (first, _) = reconcile(vec![pattern(&["a", "b"], resolved())], None, 1);
        let prior = model(first, 1);

        let (patterns, _) = reconcile(vec![pattern(&["x", "y"], resolved())], Some(&prior), 2);

        assert_eq!(patterns.len(), 2);
        assert!(patterns[0].stale);
        assert_eq!(patterns[0].signature, prior.node_patterns[0].signature);
        assert!(!patterns[1].stale);
        assert_eq!(patterns[1].first_seen_version, 2);
    }

    #[test]
    fn test_exact_match_wins_contested_prior() {
        let (first, _) = reconcile(vec![pattern(&["a", "b", "c", "d"], resolved())], None, 1);
        let prior = model(first, 1);

        let near = pattern(&["a", "b", "c", "d", "e"], resolved());
        let exact = pattern(&["a", "b", "c", "d"], resolved());
        let near_signature = near.signature.clone();
        let (patterns, signatures) = reconcile(vec![near, exact], Some(&prior), 2);

        assert_eq!(signatures[1], prior.node_patterns[0].signature);
        assert_eq!(signatures[0], near_signature);
        assert_eq!(patterns.len(), 2);
    }

    #[test]
    fn test_unresolved_rerun_keeps_prior_fields() {
        let (first, _) = reconcile(vec![pattern(&["a"], resolved())], None, 1);
        let prior = model(first, 1);

        let failed = pattern(
            &["a"],
            FieldResolution::Unresolved {
                reason: "timeout".to_string(),
            },
        );
        let (patterns, _) = reconcile(vec![failed], Some(&prior), 2);
        assert!(patterns[0].is_resolved());
    }

    #[test]
    fn test_merge_edges_keeps_prior_edges() {
        let edge = |from: &str, to: &str| NavigationEdge {
            from: from.to_string(),
            to: to.to_string(),
            kind: RelationKind::Link,
            shared_key: None,
        };
        let mut prior = model(vec![], 1);
        prior.navigation_edges = vec![edge("a", "b"), edge("b", "c")];

        let mut fresh_ab = edge("a", "b");
        fresh_ab.shared_key = Some("id".to_string());
        let edges = merge_edges(vec![fresh_ab.clone()], Some(&prior));

        assert_eq!(edges, vec![fresh_ab, edge("b", "c")]);
    }
}
