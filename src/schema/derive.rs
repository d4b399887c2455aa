use crate::analyzer::{NodePattern, RelationKind, StructuralModel};
use crate::schema::{DatabaseSchema, Field, FieldOrigin, FieldReference, FieldType, Table};
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use tracing::debug;
use url::Url;

/// The only column of a table whose pattern could not be resolved
pub const RAW_CONTENT_FIELD: &str = "raw_content";

/// Derives the database schema of a structural model
///
/// # Derivation Rules
///
/// - One table per node pattern; stale patterns keep their tables
/// - A pattern that already had a table keeps its name; new tables are named
///   after the URL template's literal path (`/product/{id}` -> `product`),
///   `index` for the root page, or `pattern_<hash>`; clashes get `_2`, `_3`, ...
/// - Columns: URL template placeholders first, then the located fields
/// - Column type: least upper bound of every observed value, the semantic type
///   hint and the prior column type
/// - Link and pagination edges carrying a shared key add a reference column to
///   the target table (`<source table>_<key>`)
/// - Unresolved patterns get a single `raw_content` column
/// - Prior tables and columns are carried forward; columns missing from this
///   run become nullable
///
/// # Arguments
///
/// * `model` - The structural model; the schema takes its version
/// * `prior` - The previously committed schema of the site
pub fn derive(model: &StructuralModel, prior: Option<&DatabaseSchema>) -> DatabaseSchema {
    let mut names = TableNames::new(prior);

    // Pattern signature -> table name
    let mut table_names: HashMap<&str, String> = HashMap::new();
    for pattern in &model.node_patterns {
        let name = names.name_for(pattern);
        table_names.insert(pattern.signature.as_str(), name);
    }

    let mut fresh: Vec<Table> = model
        .node_patterns
        .iter()
        .map(|pattern| Table {
            name: table_names[pattern.signature.as_str()].clone(),
            source_pattern: pattern.signature.clone(),
            fields: pattern_fields(pattern),
        })
        .collect();

    add_reference_fields(model, &table_names, &mut fresh);

    let tables = merge_with_prior(fresh, prior);
    let schema = DatabaseSchema {
        site_id: model.site_id.clone(),
        version: model.version,
        created_at: Utc::now(),
        tables,
    };
    debug!(
        "Derived schema v{} for '{}' with {} table(s)",
        schema.version,
        schema.site_id,
        schema.tables.len()
    );
    schema
}

fn pattern_fields(pattern: &NodePattern) -> Vec<Field> {
    let field = |name: &str, field_type, nullable, origin| Field {
        name: name.to_string(),
        field_type,
        nullable,
        source_pattern: pattern.signature.clone(),
        origin,
        references: None,
    };

    if !pattern.is_resolved() {
        return vec![field(RAW_CONTENT_FIELD, FieldType::String, true, FieldOrigin::Raw)];
    }

    let mut fields: Vec<Field> = Vec::new();

    if let Some(template) = &pattern.url_template {
        let bindings: Vec<_> = pattern
            .examples
            .iter()
            .filter_map(|e| Url::parse(&e.url).ok())
            .filter_map(|u| template.extract(&u))
            .collect();
        for key in template.placeholders() {
            let values: Vec<&String> = bindings.iter().filter_map(|b| b.get(&key)).collect();
            let field_type = values
                .iter()
                .fold(FieldType::Unknown, |acc, v| acc.join(FieldType::of_text(v)));
            let nullable = values.len() < bindings.len() || bindings.is_empty();
            fields.push(field(&key, field_type, nullable, FieldOrigin::Key));
        }
    }

    let mut used: HashSet<String> = fields.iter().map(|f| f.name.clone()).collect();
    for candidate in pattern.resolved_fields() {
        if !used.insert(candidate.name.clone()) {
            continue;
        }
        let observed = candidate
            .observations
            .iter()
            .filter_map(|o| FieldType::of_observed(&o.value))
            .fold(FieldType::Unknown, FieldType::join);
        let field_type = observed.join(FieldType::from_semantic_hint(&candidate.semantic_type));
        let field_type = promote_by_name(field_type, &candidate.name);
        let nullable = candidate.locator.is_none() || candidate.has_missing();
        fields.push(field(&candidate.name, field_type, nullable, FieldOrigin::Content));
    }

    fields
}

/// Widens whole numbers to float when the field name says the column is decimal
///
/// Names only ever promote within numbers; a name never turns a field into text.
fn promote_by_name(field_type: FieldType, name: &str) -> FieldType {
    match (field_type, FieldType::from_semantic_hint(name)) {
        (FieldType::Int, FieldType::Float) => FieldType::Float,
        _ => field_type,
    }
}

fn add_reference_fields(model: &StructuralModel, table_names: &HashMap<&str, String>, tables: &mut [Table]) {
    for edge in &model.navigation_edges {
        if edge.is_self_edge() || !matches!(edge.kind, RelationKind::Link | RelationKind::Pagination) {
            continue;
        }
        let Some(key) = &edge.shared_key else {
            continue;
        };
        let (Some(source_name), Some(target_name)) =
            (table_names.get(edge.from.as_str()), table_names.get(edge.to.as_str()))
        else {
            continue;
        };

        let Some(key_type) = tables
            .iter()
            .find(|t| &t.name == source_name)
            .and_then(|t| t.field(key))
            .map(|f| f.field_type)
        else {
            continue;
        };

        let Some(target) = tables.iter_mut().find(|t| &t.name == target_name) else {
            continue;
        };
        if target.field(RAW_CONTENT_FIELD).is_some() {
            continue;
        }
        let already = target.fields.iter().any(|f| {
            f.references.as_ref().map(|r| (&r.table, &r.field)) == Some((source_name, key))
        });
        if already {
            continue;
        }

        let base = format!("{}_{}", source_name, key);
        let mut name = base.clone();
        let mut n = 2;
        while target.field(&name).is_some() {
            name = format!("{}_{}", base, n);
            n += 1;
        }
        target.fields.push(Field {
            name,
            field_type: key_type,
            nullable: true,
            source_pattern: edge.from.clone(),
            origin: FieldOrigin::Reference,
            references: Some(FieldReference {
                table: source_name.clone(),
                field: key.clone(),
            }),
        });
    }
}

/// Prior tables first (widened), then tables new to this version
fn merge_with_prior(fresh: Vec<Table>, prior: Option<&DatabaseSchema>) -> Vec<Table> {
    let Some(prior) = prior else {
        return fresh;
    };

    let mut fresh: Vec<Option<Table>> = fresh.into_iter().map(Some).collect();
    let mut tables = Vec::with_capacity(prior.tables.len() + fresh.len());

    for old in &prior.tables {
        let matching = fresh
            .iter_mut()
            .find(|t| t.as_ref().map(|t| t.name == old.name).unwrap_or(false))
            .and_then(Option::take);
        match matching {
            Some(new) => tables.push(widen(old, new)),
            None => tables.push(carry_forward(old)),
        }
    }
    tables.extend(fresh.into_iter().flatten());
    tables
}

/// Prior columns first, each widened by its new counterpart; new columns appended
fn widen(old: &Table, new: Table) -> Table {
    let mut new_fields: Vec<Option<Field>> = new.fields.into_iter().map(Some).collect();
    let mut fields = Vec::with_capacity(old.fields.len() + new_fields.len());

    for prior_field in &old.fields {
        let counterpart = new_fields
            .iter_mut()
            .find(|f| f.as_ref().map(|f| f.name == prior_field.name).unwrap_or(false))
            .and_then(Option::take);
        match counterpart {
            Some(field) => fields.push(Field {
                field_type: prior_field.field_type.join(field.field_type),
                nullable: prior_field.nullable || field.nullable,
                references: field.references.or_else(|| prior_field.references.clone()),
                ..field
            }),
            None => fields.push(Field {
                nullable: true,
                ..prior_field.clone()
            }),
        }
    }
    fields.extend(new_fields.into_iter().flatten().map(|f| Field {
        // Rows stored under the prior version have no value for it
        nullable: true,
        ..f
    }));

    Table {
        name: old.name.clone(),
        source_pattern: new.source_pattern,
        fields,
    }
}

fn carry_forward(old: &Table) -> Table {
    Table {
        fields: old
            .fields
            .iter()
            .map(|f| Field {
                nullable: true,
                ..f.clone()
            })
            .collect(),
        ..old.clone()
    }
}

/// Allocates table names, honoring names already given by the prior schema
struct TableNames<'a> {
    prior: Option<&'a DatabaseSchema>,
    used: HashSet<String>,
}

impl<'a> TableNames<'a> {
    fn new(prior: Option<&'a DatabaseSchema>) -> Self {
        let used = prior
            .map(|p| p.tables.iter().map(|t| t.name.clone()).collect())
            .unwrap_or_default();
        Self { prior, used }
    }

    fn name_for(&mut self, pattern: &NodePattern) -> String {
        if let Some(existing) = self.prior.and_then(|p| p.table_for_pattern(&pattern.signature)) {
            return existing.name.clone();
        }

        let base = base_table_name(pattern);
        let mut candidate = base.clone();
        let mut n = 2;
        while self.used.contains(&candidate) {
            candidate = format!("{}_{}", base, n);
            n += 1;
        }
        self.used.insert(candidate.clone());
        candidate
    }
}

fn base_table_name(pattern: &NodePattern) -> String {
    if let Some(template) = &pattern.url_template {
        let literals = template.literal_path();
        if template.path.is_empty() {
            return "index".to_string();
        }
        let joined = sanitize(&literals.join("_"));
        if !joined.is_empty() {
            return joined;
        }
    }
    let hash = pattern
        .signature
        .split_once(':')
        .map(|(_, h)| h)
        .unwrap_or(&pattern.signature);
    format!("pattern_{}", &hash[..hash.len().min(8)])
}

fn sanitize(raw: &str) -> String {
    let mapped: String = raw
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    let collapsed = mapped
        .split('_')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("_");
    if collapsed.starts_with(|c: char| c.is_ascii_digit()) {
        format!("t_{}", collapsed)
    } else {
        collapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::{
        ContentKind, FieldCandidate, FieldResolution, Locator, NavigationEdge, Observation, ObservedValue,
        SnapshotRef,
    };
    use crate::url::UrlTemplate;
    use std::collections::BTreeSet;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn candidate(name: &str, hint: &str, values: &[Option<&str>]) -> FieldCandidate {
        FieldCandidate {
            name: name.to_string(),
            semantic_type: hint.to_string(),
            example_value: values.iter().flatten().next().unwrap_or(&"").to_string(),
            locator: Some(Locator::Css {
                selector: format!("html > body > {}", name),
                index: 0,
                attribute: None,
            }),
            observations: values
                .iter()
                .enumerate()
                .map(|(i, v)| Observation {
                    snapshot: format!("h{}", i),
                    value: v
                        .map(|t| ObservedValue::Text(t.to_string()))
                        .unwrap_or(ObservedValue::Missing),
                })
                .collect(),
        }
    }

    fn pattern(signature: &str, urls: &[&str], fields: FieldResolution) -> NodePattern {
        let parsed: Vec<Url> = urls.iter().map(|u| url(u)).collect();
        NodePattern {
            signature: signature.to_string(),
            kind: ContentKind::Html,
            skeleton: BTreeSet::new(),
            url_template: UrlTemplate::from_urls(&parsed),
            examples: urls
                .iter()
                .map(|u| SnapshotRef {
                    content_hash: format!("hash-{}", u),
                    url: u.to_string(),
                })
                .collect(),
            fields,
            stale: false,
            first_seen_version: 1,
            pagination: None,
        }
    }

    fn model(version: u32, patterns: Vec<NodePattern>, edges: Vec<NavigationEdge>) -> StructuralModel {
        StructuralModel {
            site_id: "shop".to_string(),
            version,
            created_at: Utc::now(),
            node_patterns: patterns,
            navigation_edges: edges,
        }
    }

    fn products(values: &[(&str, Option<&str>)]) -> NodePattern {
        let titles: Vec<Option<&str>> = values.iter().map(|(t, _)| Some(*t)).collect();
        let prices: Vec<Option<&str>> = values.iter().map(|(_, p)| *p).collect();
        pattern(
            "html:products",
            &["https://shop.test/product/1", "https://shop.test/product/2"],
            FieldResolution::Resolved {
                fields: vec![candidate("title", "string", &titles), candidate("price", "price", &prices)],
            },
        )
    }

    #[test]
    fn test_product_table() {
        let schema = derive(
            &model(1, vec![products(&[("Blue Widget", Some("19.99")), ("Red Gadget", Some("5"))])], vec![]),
            None,
        );

        assert_eq!(schema.version, 1);
        let table = schema.table("product").unwrap();
        let names: Vec<&str> = table.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["id", "title", "price"]);
        assert_eq!(table.field("id").unwrap().field_type, FieldType::Int);
        assert_eq!(table.field("id").unwrap().origin, FieldOrigin::Key);
        assert_eq!(table.field("title").unwrap().field_type, FieldType::String);
        assert_eq!(table.field("price").unwrap().field_type, FieldType::Float);
        assert!(!table.field("price").unwrap().nullable);
    }

    #[test]
    fn test_missing_values_make_field_nullable() {
        let schema = derive(
            &model(1, vec![products(&[("A", Some("1.5")), ("B", None)])], vec![]),
            None,
        );
        assert!(schema.table("product").unwrap().field("price").unwrap().nullable);
    }

    #[test]
    fn test_decimal_field_names_promote_whole_numbers() {
        let p = pattern(
            "html:products",
            &["https://shop.test/product/1", "https://shop.test/product/2"],
            FieldResolution::Resolved {
                fields: vec![
                    candidate("price", "integer", &[Some("10"), Some("25")]),
                    candidate("stock", "integer", &[Some("3"), Some("0")]),
                    candidate("label", "integer", &[Some("7"), Some("9")]),
                ],
            },
        );
        let schema = derive(&model(1, vec![p], vec![]), None);
        let table = schema.table("product").unwrap();

        assert_eq!(table.field("price").unwrap().field_type, FieldType::Float);
        assert_eq!(table.field("stock").unwrap().field_type, FieldType::Int);
        assert_eq!(table.field("label").unwrap().field_type, FieldType::Int);
    }

    #[test]
    fn test_unresolved_pattern_gets_raw_content_only() {
        let p = pattern(
            "html:broken",
            &["https://shop.test/about"],
            FieldResolution::Unresolved {
                reason: "timeout".to_string(),
            },
        );
        let schema = derive(&model(1, vec![p], vec![]), None);
        let table = schema.table("about").unwrap();
        assert_eq!(table.fields.len(), 1);
        assert_eq!(table.fields[0].name, RAW_CONTENT_FIELD);
        assert_eq!(table.fields[0].origin, FieldOrigin::Raw);
    }

    #[test]
    fn test_table_names() {
        let root = pattern("html:root", &["https://shop.test/"], FieldResolution::Resolved { fields: vec![] });
        let a = pattern(
            "html:aaaa1111bbbb2222",
            &["https://shop.test/1", "https://shop.test/2"],
            FieldResolution::Resolved { fields: vec![] },
        );
        let listing = pattern("html:list", &["https://shop.test/list"], FieldResolution::Resolved { fields: vec![] });
        let listing_json = pattern("json:list", &["https://shop.test/list"], FieldResolution::Resolved { fields: vec![] });

        let schema = derive(&model(1, vec![root, a, listing, listing_json], vec![]), None);
        let names: Vec<&str> = schema.tables.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["index", "pattern_aaaa1111", "list", "list_2"]);
    }

    #[test]
    fn test_reference_field_on_link_target() {
        let category = pattern(
            "html:category",
            &["https://shop.test/category/lamps", "https://shop.test/category/desks"],
            FieldResolution::Resolved { fields: vec![] },
        );
        let edges = vec![
            NavigationEdge {
                from: "html:category".to_string(),
                to: "html:products".to_string(),
                kind: RelationKind::Link,
                shared_key: Some("slug".to_string()),
            },
            NavigationEdge {
                from: "html:products".to_string(),
                to: "html:products".to_string(),
                kind: RelationKind::Link,
                shared_key: Some("id".to_string()),
            },
        ];
        let schema = derive(
            &model(1, vec![category, products(&[("A", Some("1")), ("B", Some("2"))])], edges),
            None,
        );

        let table = schema.table("product").unwrap();
        let reference = table.field("category_slug").unwrap();
        assert_eq!(
            reference.references,
            Some(FieldReference {
                table: "category".to_string(),
                field: "slug".to_string()
            })
        );
        assert_eq!(reference.field_type, FieldType::String);
        assert_eq!(table.fields.iter().filter(|f| f.references.is_some()).count(), 1);
        assert!(schema.dangling_references().is_empty());
    }

    #[test]
    fn test_types_only_widen_and_prior_fields_survive() {
        let v1 = derive(
            &model(1, vec![products(&[("A", Some("1.5")), ("B", Some("2"))])], vec![]),
            None,
        );

        // Next run: price now looks textual, title vanished
        let narrow = pattern(
            "html:products",
            &["https://shop.test/product/3"],
            FieldResolution::Resolved {
                fields: vec![candidate("price", "integer", &[Some("3")]), candidate("sku", "string", &[Some("X1")])],
            },
        );
        let v2 = derive(&model(2, vec![narrow], vec![]), Some(&v1));

        let table = v2.table("product").unwrap();
        let names: Vec<&str> = table.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["id", "title", "price", "sku"]);
        assert_eq!(table.field("price").unwrap().field_type, FieldType::Float);
        assert!(table.field("title").unwrap().nullable);
        assert!(table.field("sku").unwrap().nullable);

        for old in &v1.tables {
            let new = v2.table(&old.name).unwrap();
            for f in &old.fields {
                assert!(new.field(&f.name).unwrap().field_type.covers(f.field_type));
            }
        }
    }

    #[test]
    fn test_prior_table_name_is_reused() {
        let v1 = derive(
            &model(1, vec![products(&[("A", Some("1")), ("B", Some("2"))])], vec![]),
            None,
        );
        let mut renamed = v1.clone();
        renamed.tables[0].name = "items".to_string();

        let v2 = derive(
            &model(2, vec![products(&[("A", Some("1")), ("B", Some("2"))])], vec![]),
            Some(&renamed),
        );
        assert_eq!(v2.tables.len(), 1);
        assert_eq!(v2.tables[0].name, "items");
    }
}
