use crate::analyzer::{Locator, NodePattern, RelationKind, StructuralModel};
use crate::config::PlannerConfig;
use crate::plan::{CrawlPlan, ExtractionRule, FieldMapping, FieldSource, MatchPattern, Seed, TerminationCondition};
use crate::schema::{DatabaseSchema, FieldOrigin, Table};
use crate::url::pagination::page_number_in;
use crate::IncompleteModelError;
use chrono::Utc;
use tracing::{debug, warn};
use url::Url;

/// Generates the crawl plan for a model and the schema derived from it
///
/// Stale patterns keep their tables but get no rule. A model in which some
/// patterns are unresolved still yields a plan; those rules only capture the raw
/// page body.
///
/// # Arguments
///
/// * `model` - The structural model
/// * `schema` - The schema derived from `model`; the plan takes its version
/// * `config` - Planner settings (pagination bound)
///
/// # Returns
///
/// * `Ok(CrawlPlan)` - The plan
/// * `Err(IncompleteModelError)` - If no pattern seen in this analysis is resolved
pub fn generate(
    model: &StructuralModel,
    schema: &DatabaseSchema,
    config: &PlannerConfig,
) -> Result<CrawlPlan, IncompleteModelError> {
    let live: Vec<&NodePattern> = model.node_patterns.iter().filter(|p| !p.stale).collect();
    if !live.iter().any(|p| p.is_resolved()) {
        return Err(IncompleteModelError {
            site_id: model.site_id.clone(),
            version: model.version,
        });
    }

    let mut rules = Vec::with_capacity(live.len());
    for pattern in &live {
        let Some(table) = schema.table_for_pattern(&pattern.signature) else {
            warn!("No table for pattern {}, skipping its rule", pattern.signature);
            continue;
        };
        rules.push(ExtractionRule {
            match_pattern: MatchPattern {
                signature: pattern.signature.clone(),
                url_template: pattern.url_template.clone(),
            },
            emits_table: table.name.clone(),
            field_mappings: field_mappings(pattern, table),
            follow_edges: model.edges_from(&pattern.signature).cloned().collect(),
            termination_condition: termination(model, pattern, config),
        });
    }

    let plan = CrawlPlan {
        site_id: model.site_id.clone(),
        version: schema.version,
        model_version: model.version,
        created_at: Utc::now(),
        seeds: seeds(model, &live),
        rules,
    };
    debug!(
        "Generated plan v{} for '{}': {} seed(s), {} rule(s)",
        plan.version,
        plan.site_id,
        plan.seeds.len(),
        plan.rules.len()
    );
    Ok(plan)
}

/// Entry patterns: nothing else links or paginates into them
///
/// When every live pattern is reachable from another (a cycle through the home
/// page, say), the first live pattern is the entry.
fn seeds(model: &StructuralModel, live: &[&NodePattern]) -> Vec<Seed> {
    let mut entries: Vec<&NodePattern> = live
        .iter()
        .copied()
        .filter(|p| !model.has_incoming_edge(&p.signature))
        .collect();
    if entries.is_empty() {
        entries.extend(live.first().copied());
    }

    entries
        .into_iter()
        .filter_map(|pattern| {
            let url = match &pattern.pagination {
                Some(hint) => hint.first_page_url.clone(),
                None => pattern.examples.first()?.url.clone(),
            };
            Some(Seed {
                url,
                template: pattern.url_template.as_ref().map(|t| t.to_string()),
                pattern: pattern.signature.clone(),
            })
        })
        .collect()
}

/// One mapping per table column the page can supply
///
/// Columns carried forward from earlier versions that the pattern no longer
/// locates get no mapping and stay null.
fn field_mappings(pattern: &NodePattern, table: &Table) -> Vec<FieldMapping> {
    table
        .fields
        .iter()
        .filter_map(|field| {
            let source = match field.origin {
                FieldOrigin::Key => pattern
                    .key_names()
                    .contains(&field.name)
                    .then(|| FieldSource::Page {
                        locator: Locator::UrlParam {
                            name: field.name.clone(),
                        },
                    }),
                FieldOrigin::Content => pattern
                    .resolved_fields()
                    .iter()
                    .find(|c| c.name == field.name)
                    .and_then(|c| c.locator.clone())
                    .map(|locator| FieldSource::Page { locator }),
                FieldOrigin::Reference => field.references.as_ref().map(|r| FieldSource::Parent {
                    table: r.table.clone(),
                    field: r.field.clone(),
                }),
                FieldOrigin::Raw => Some(FieldSource::Page {
                    locator: Locator::RawContent,
                }),
            }?;
            Some(FieldMapping {
                field: field.name.clone(),
                source,
            })
        })
        .collect()
}

fn termination(model: &StructuralModel, pattern: &NodePattern, config: &PlannerConfig) -> TerminationCondition {
    let paginates = model
        .edges_from(&pattern.signature)
        .any(|e| e.kind == RelationKind::Pagination);

    let Some(hint) = &pattern.pagination else {
        if paginates {
            debug!(
                "Pattern {} paginates without a detected page counter",
                pattern.signature
            );
        }
        return TerminationCondition::SinglePage;
    };

    let stop_at_page = hint
        .terminal_url
        .as_deref()
        .and_then(|u| Url::parse(u).ok())
        .map(|u| page_number_in(&u, &hint.slot));

    TerminationCondition::Pagination {
        expected_signature: pattern.signature.clone(),
        slot: hint.slot.clone(),
        max_pages: config.max_pages,
        stop_at_page,
        stop_at_url: hint.terminal_url.clone(),
        last_known_page: Some(hint.last_matching_page),
    }
}
