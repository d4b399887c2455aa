//! Markdown summary generation
//!
//! This module renders a committed schema and crawl plan pair as a
//! human-readable report.

use crate::output::OutputResult;
use crate::plan::{CrawlPlan, FieldSource, TerminationCondition};
use crate::schema::DatabaseSchema;
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Writes the markdown report of a schema and plan to a file
///
/// # Arguments
///
/// * `schema` - The schema
/// * `plan` - The plan generated against `schema`
/// * `output_path` - Path where the markdown file should be written
///
/// # Returns
///
/// * `Ok(())` - Successfully wrote the report
/// * `Err(OutputError)` - Failed to write it
pub fn generate_markdown_summary(
    schema: &DatabaseSchema,
    plan: &CrawlPlan,
    output_path: &Path,
) -> OutputResult<()> {
    let markdown = render_markdown(schema, plan);

    let mut file = File::create(output_path)?;
    file.write_all(markdown.as_bytes())?;

    Ok(())
}

/// Formats a schema and plan as markdown
pub fn render_markdown(schema: &DatabaseSchema, plan: &CrawlPlan) -> String {
    let mut md = String::new();

    md.push_str(&format!("# Sumi-Strata: {}\n\n", schema.site_id));
    md.push_str(&format!("- **Schema version**: {}\n", schema.version));
    md.push_str(&format!(
        "- **Plan version**: {} (model v{})\n",
        plan.version, plan.model_version
    ));
    md.push_str(&format!("- **Generated**: {}\n\n", plan.created_at.to_rfc3339()));

    // Tables
    md.push_str("## Tables\n\n");
    for table in &schema.tables {
        md.push_str(&format!("### {}\n\n", table.name));
        md.push_str("| Field | Type | Nullable | References |\n");
        md.push_str("|-------|------|----------|------------|\n");
        for field in &table.fields {
            let references = field
                .references
                .as_ref()
                .map(|r| format!("{}.{}", r.table, r.field))
                .unwrap_or_default();
            md.push_str(&format!(
                "| {} | {} | {} | {} |\n",
                field.name,
                field.field_type,
                if field.nullable { "yes" } else { "no" },
                references
            ));
        }
        md.push('\n');
    }

    // Seeds
    md.push_str("## Seeds\n\n");
    for seed in &plan.seeds {
        match &seed.template {
            Some(template) => md.push_str(&format!("- {} (`{}`)\n", seed.url, template)),
            None => md.push_str(&format!("- {}\n", seed.url)),
        }
    }
    md.push('\n');

    // Rules
    md.push_str("## Extraction Rules\n\n");
    md.push_str("| Pages | Table | Fields | Follows | Stops |\n");
    md.push_str("|-------|-------|--------|---------|-------|\n");
    for rule in &plan.rules {
        let pages = rule
            .match_pattern
            .url_template
            .as_ref()
            .map(|t| format!("`{}`", t))
            .unwrap_or_else(|| rule.match_pattern.signature.clone());
        let inherited = rule
            .field_mappings
            .iter()
            .filter(|m| matches!(m.source, FieldSource::Parent { .. }))
            .count();
        let fields = if inherited > 0 {
            format!("{} ({} from parent)", rule.field_mappings.len(), inherited)
        } else {
            rule.field_mappings.len().to_string()
        };
        md.push_str(&format!(
            "| {} | {} | {} | {} | {} |\n",
            pages,
            rule.emits_table,
            fields,
            rule.follow_edges.len(),
            describe_termination(&rule.termination_condition)
        ));
    }

    md
}

fn describe_termination(condition: &TerminationCondition) -> String {
    match condition {
        TerminationCondition::SinglePage => "single page".to_string(),
        TerminationCondition::Pagination {
            slot,
            max_pages,
            stop_at_page,
            ..
        } => match stop_at_page {
            Some(page) => format!("{} until page {} (max {})", slot, page, max_pages),
            None => format!("{} off-pattern (max {})", slot, max_pages),
        },
    }
}
