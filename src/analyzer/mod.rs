//! Structural analyzer
//!
//! Turns a set of snapshots into a [`StructuralModel`]:
//! 1. Cluster snapshots by structural skeleton
//! 2. Ask the inference capability for each cluster's fields (concurrently)
//! 3. Locate every field in the cluster's pages
//! 4. Derive navigation edges and pagination hints
//! 5. Reconcile with the previous model

mod cluster;
mod inference;
mod locate;
mod model;
mod navigation;
mod reconcile;
mod skeleton;

pub use cluster::{cluster, Cluster};
pub use inference::{
    guess_semantic_type, infer_with_retry, inference_from_config, FieldInference, HeuristicInference,
    HttpInference, InferredField,
};
pub use model::{
    ContentKind, FieldCandidate, FieldResolution, Locator, NavigationEdge, NodePattern, Observation,
    ObservedValue, PaginationHint, RelationKind, SnapshotRef, StructuralModel,
};
pub use reconcile::RECONCILE_THRESHOLD;
pub use skeleton::{jaccard, signature, skeleton_of, Skeleton};

use crate::config::AnalyzerConfig;
use crate::storage::Snapshot;
use crate::url::UrlTemplate;
use crate::InferenceError;
use chrono::Utc;
use locate::Document;
use navigation::{cluster_edges, pagination_hints, PageNode};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use url::Url;

/// Builds structural models from snapshots
pub struct Analyzer {
    inference: Arc<dyn FieldInference>,
    config: AnalyzerConfig,
}

impl Analyzer {
    pub fn new(inference: Arc<dyn FieldInference>, config: &AnalyzerConfig) -> Self {
        Self {
            inference,
            config: config.clone(),
        }
    }

    /// Analyzes a site's snapshots
    ///
    /// Never fails: clusters whose inference keeps failing are recorded as
    /// unresolved. The result is always a new version: `prior.version + 1`, or 1.
    ///
    /// # Arguments
    ///
    /// * `site_id` - Site the snapshots belong to
    /// * `snapshots` - Input in any order; duplicates by content hash are ignored
    /// * `prior` - The site's previous model, reconciled into the new one
    pub async fn analyze(
        &self,
        site_id: &str,
        snapshots: &[Snapshot],
        prior: Option<&StructuralModel>,
    ) -> StructuralModel {
        let version = prior.map(|p| p.version + 1).unwrap_or(1);
        let ordered = canonical_order(snapshots);
        let items: Vec<(ContentKind, Skeleton)> = ordered.iter().map(|s| skeleton_of(s)).collect();
        let clusters = cluster(&items, self.config.cluster_threshold);
        debug!(
            "Site '{}': {} snapshot(s) in {} cluster(s)",
            site_id,
            ordered.len(),
            clusters.len()
        );

        let inferred = self.infer_all(&ordered, &clusters).await;

        let mut fresh: Vec<NodePattern> = clusters
            .iter()
            .zip(inferred)
            .map(|(c, result)| build_pattern(&ordered, c, result))
            .collect();

        let mut cluster_of = vec![0; ordered.len()];
        for (ci, c) in clusters.iter().enumerate() {
            for &m in &c.members {
                cluster_of[m] = ci;
            }
        }
        let pages: Vec<PageNode> = ordered
            .iter()
            .enumerate()
            .map(|(m, s)| PageNode::from_snapshot(s, clusters[cluster_of[m]].kind, cluster_of[m]))
            .collect();

        let templates: Vec<Option<UrlTemplate>> = fresh.iter().map(|p| p.url_template.clone()).collect();
        let params = &self.config.pagination_params;
        let edges = cluster_edges(&pages, &templates, params);
        for (ci, hint) in pagination_hints(&pages, params) {
            fresh[ci].pagination = Some(hint);
        }

        let (node_patterns, signatures) = reconcile::reconcile(fresh, prior, version);
        let new_edges = edges
            .into_iter()
            .map(|e| NavigationEdge {
                from: signatures[e.from].clone(),
                to: signatures[e.to].clone(),
                kind: e.kind,
                shared_key: match e.kind {
                    RelationKind::Pagination => None,
                    _ if e.from == e.to => None,
                    _ => templates[e.from]
                        .as_ref()
                        .and_then(|t| t.placeholders().into_iter().next()),
                },
            })
            .collect();
        let navigation_edges = reconcile::merge_edges(new_edges, prior);

        let model = StructuralModel {
            site_id: site_id.to_string(),
            version,
            created_at: Utc::now(),
            node_patterns,
            navigation_edges,
        };

        let unresolved = model.node_patterns.iter().filter(|p| !p.stale && !p.is_resolved()).count();
        let stale = model.node_patterns.iter().filter(|p| p.stale).count();
        info!(
            "Structural model v{} for '{}': {} pattern(s) ({} unresolved, {} stale), {} edge(s)",
            model.version,
            site_id,
            model.node_patterns.len(),
            unresolved,
            stale,
            model.navigation_edges.len()
        );

        model
    }

    /// Runs inference for every cluster, bounded by the configured concurrency
    async fn infer_all(
        &self,
        ordered: &[&Snapshot],
        clusters: &[Cluster],
    ) -> Vec<Result<Vec<InferredField>, String>> {
        let semaphore = Arc::new(Semaphore::new(self.config.inference_concurrency.max(1)));
        let max_attempts = self.config.inference_max_attempts;
        let backoff = Duration::from_millis(self.config.inference_backoff_ms);
        let mut tasks = JoinSet::new();

        for (ci, c) in clusters.iter().enumerate() {
            let examples: Vec<String> = c
                .members
                .iter()
                .take(self.config.examples_per_cluster.max(1))
                .map(|&m| ordered[m].text())
                .collect();
            let inference = self.inference.clone();
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => infer_with_retry(inference.as_ref(), &examples, max_attempts, backoff).await,
                    Err(_) => Err(InferenceError::MalformedResponse("inference pool closed".to_string())),
                };
                (ci, result)
            });
        }

        let mut results: Vec<Result<Vec<InferredField>, String>> = clusters
            .iter()
            .map(|_| Err("inference task did not complete".to_string()))
            .collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((ci, result)) => results[ci] = result.map_err(|e| e.to_string()),
                Err(e) => warn!("Inference task failed: {}", e),
            }
        }
        results
    }
}

/// Sorts by (fetch_time, content_hash) and drops repeated content
fn canonical_order(snapshots: &[Snapshot]) -> Vec<&Snapshot> {
    let mut ordered: Vec<&Snapshot> = snapshots.iter().collect();
    ordered.sort_by(|a, b| {
        a.fetch_time
            .cmp(&b.fetch_time)
            .then_with(|| a.content_hash.cmp(&b.content_hash))
    });
    let mut seen = HashSet::new();
    ordered.retain(|s| seen.insert(s.content_hash.clone()));
    ordered
}

/// Builds the pattern of one cluster from its inference result
fn build_pattern(ordered: &[&Snapshot], c: &Cluster, inferred: Result<Vec<InferredField>, String>) -> NodePattern {
    let members: Vec<&Snapshot> = c.members.iter().map(|&m| ordered[m]).collect();
    let urls: Vec<Url> = members.iter().filter_map(|s| Url::parse(&s.url).ok()).collect();
    let signature = signature(c.kind, &c.skeleton);

    let fields = match inferred {
        Ok(inferred) => {
            let documents: Vec<Document> = members.iter().map(|s| Document::parse(c.kind, s)).collect();
            FieldResolution::Resolved {
                fields: locate_fields(&members, &documents, inferred),
            }
        }
        Err(reason) => {
            warn!("Cluster {} left unresolved: {}", signature, reason);
            FieldResolution::Unresolved { reason }
        }
    };

    NodePattern {
        signature,
        kind: c.kind,
        skeleton: c.skeleton.clone(),
        url_template: UrlTemplate::from_urls(&urls),
        examples: members
            .iter()
            .map(|s| SnapshotRef {
                content_hash: s.content_hash.clone(),
                url: s.url.clone(),
            })
            .collect(),
        fields,
        stale: false,
        first_seen_version: 0,
        pagination: None,
    }
}

/// Finds each inferred field in the cluster's documents and reads it from all of them
fn locate_fields(members: &[&Snapshot], documents: &[Document], inferred: Vec<InferredField>) -> Vec<FieldCandidate> {
    let mut names = HashSet::new();
    let mut fields = Vec::new();

    for field in inferred {
        let name = field.field_name.trim().to_string();
        if !names.insert(name.clone()) {
            debug!("Ignoring repeated field name '{}'", name);
            continue;
        }

        let locator = documents.iter().find_map(|d| d.find(&field.example_value));
        let observations = members
            .iter()
            .zip(documents)
            .map(|(snapshot, document)| Observation {
                snapshot: snapshot.content_hash.clone(),
                value: locator
                    .as_ref()
                    .map(|l| document.read(l))
                    .unwrap_or(ObservedValue::Missing),
            })
            .collect();
        if locator.is_none() {
            debug!("Example value of '{}' not found in any page", name);
        }

        fields.push(FieldCandidate {
            name,
            semantic_type: field.semantic_type,
            example_value: field.example_value,
            locator,
            observations,
        });
    }

    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap()
    }

    fn snapshot(url: &str, content_type: &str, body: &str, seconds: i64) -> Snapshot {
        Snapshot {
            site_id: "shop".to_string(),
            url: url.to_string(),
            fetch_time: at(seconds),
            content_hash: crate::storage::content_hash(body.as_bytes()),
            raw_bytes: body.as_bytes().to_vec(),
            content_type: content_type.to_string(),
        }
    }

    fn product(id: u32, title: &str, price: &str) -> Snapshot {
        let body = format!(
            r#"<html><body><div class="product"><h1>{}</h1><span class="price">{}</span></div></body></html>"#,
            title, price
        );
        snapshot(&format!("https://shop.test/product/{}", id), "text/html", &body, id as i64)
    }

    fn home() -> Snapshot {
        snapshot(
            "https://shop.test/",
            "text/html",
            r#"<html><body><nav><a href="/product/1">One</a><a href="/product/2">Two</a></nav><footer><p>Shop</p></footer></body></html>"#,
            0,
        )
    }

    fn analyzer(inference: Arc<dyn FieldInference>) -> Analyzer {
        Analyzer::new(
            inference,
            &AnalyzerConfig {
                inference_backoff_ms: 1,
                ..AnalyzerConfig::default()
            },
        )
    }

    struct Failing(AtomicU32);

    #[async_trait]
    impl FieldInference for Failing {
        async fn infer_fields(&self, _examples: &[String]) -> Result<Vec<InferredField>, InferenceError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(InferenceError::Timeout)
        }
    }

    #[tokio::test]
    async fn test_products_cluster_and_fields_are_located() {
        let snapshots = vec![product(2, "Red Gadget", "5.00"), home(), product(1, "Blue Widget", "19.99")];
        let model = analyzer(Arc::new(HeuristicInference)).analyze("shop", &snapshots, None).await;

        assert_eq!(model.version, 1);
        assert_eq!(model.node_patterns.len(), 2);

        let products = &model.node_patterns[1];
        assert_eq!(products.examples.len(), 2);
        assert_eq!(products.url_template.as_ref().unwrap().to_string(), "/product/{id}");
        let names: Vec<&str> = products.resolved_fields().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["h1", "price"]);

        let price = products
            .resolved_fields()
            .iter()
            .find(|f| f.name == "price")
            .unwrap();
        assert_eq!(price.observations.len(), 2);
        assert!(!price.has_missing());

        let home_sig = &model.node_patterns[0].signature;
        assert!(model.navigation_edges.iter().any(|e| &e.from == home_sig
            && e.to == products.signature
            && e.kind == RelationKind::Link));
    }

    #[tokio::test]
    async fn test_document_title_and_bare_price_become_product_columns() {
        let page = |id: u32, title: &str, price: &str| {
            snapshot(
                &format!("https://shop.test/product/{}", id),
                "text/html",
                &format!(
                    "<html><head><title>{}</title></head><body><price>{}</price></body></html>",
                    title, price
                ),
                id as i64,
            )
        };
        let snapshots = vec![page(1, "Blue Widget", "10"), page(2, "Red Gadget", "25")];
        let model = analyzer(Arc::new(HeuristicInference)).analyze("shop", &snapshots, None).await;

        assert_eq!(model.node_patterns.len(), 1);
        let title = model.node_patterns[0]
            .resolved_fields()
            .iter()
            .find(|f| f.name == "title")
            .expect("title candidate");
        assert!(!title.has_missing());

        let schema = crate::schema::derive(&model, None);
        let products = schema.table("product").expect("product table");
        assert_eq!(products.field("title").unwrap().field_type, crate::schema::FieldType::String);
        assert_eq!(products.field("price").unwrap().field_type, crate::schema::FieldType::Float);
    }

    #[tokio::test]
    async fn test_input_order_does_not_matter() {
        let a = vec![home(), product(1, "Blue Widget", "19.99"), product(2, "Red Gadget", "5.00")];
        let b = vec![product(2, "Red Gadget", "5.00"), product(1, "Blue Widget", "19.99"), home(), home()];
        let analyzer = analyzer(Arc::new(HeuristicInference));

        let first = analyzer.analyze("shop", &a, None).await;
        let second = analyzer.analyze("shop", &b, None).await;

        assert_eq!(first.node_patterns, second.node_patterns);
        assert_eq!(first.navigation_edges, second.navigation_edges);
    }

    #[tokio::test]
    async fn test_inference_failure_marks_cluster_unresolved() {
        let failing = Arc::new(Failing(AtomicU32::new(0)));
        let model = analyzer(failing.clone()).analyze("shop", &[home()], None).await;

        assert_eq!(model.node_patterns.len(), 1);
        assert!(matches!(
            &model.node_patterns[0].fields,
            FieldResolution::Unresolved { reason } if reason.contains("timed out")
        ));
        assert_eq!(failing.0.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_reanalysis_bumps_version_and_keeps_signatures() {
        let analyzer = analyzer(Arc::new(HeuristicInference));
        let first = analyzer
            .analyze("shop", &[home(), product(1, "Blue Widget", "19.99")], None)
            .await;
        let second = analyzer
            .analyze("shop", &[product(3, "Green Thing", "7.50")], Some(&first))
            .await;

        assert_eq!(second.version, 2);
        assert_eq!(second.node_patterns.len(), 2);
        assert!(second.node_patterns[0].stale);
        assert!(!second.node_patterns[1].stale);
        assert_eq!(second.node_patterns[1].signature, first.node_patterns[1].signature);
        assert_eq!(second.node_patterns[1].first_seen_version, 1);
    }
}
