//! SQL rendering of a derived schema (SQLite dialect)

use crate::schema::{DatabaseSchema, Table};

/// Renders `CREATE TABLE` statements for every table of the schema
///
/// Every table gets a surrogate `_row_id` primary key. Reference fields carry a
/// `REFERENCES` clause; since a URL key is not guaranteed unique, the referenced
/// column is not declared as a key.
pub fn render_ddl(schema: &DatabaseSchema) -> String {
    let mut sql = format!(
        "-- Schema v{} for site '{}'\n",
        schema.version,
        schema.site_id.replace('\n', " ")
    );
    for table in &schema.tables {
        sql.push('\n');
        sql.push_str(&render_table(table));
    }
    sql
}

fn render_table(table: &Table) -> String {
    let mut columns = vec!["    \"_row_id\" INTEGER PRIMARY KEY".to_string()];
    for field in &table.fields {
        let mut column = format!("    {} {}", quote(&field.name), field.field_type.sql_type());
        if !field.nullable {
            column.push_str(" NOT NULL");
        }
        if let Some(reference) = &field.references {
            column.push_str(&format!(
                " REFERENCES {} ({})",
                quote(&reference.table),
                quote(&reference.field)
            ));
        }
        columns.push(column);
    }
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n{}\n);\n",
        quote(&table.name),
        columns.join(",\n")
    )
}

fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Field, FieldOrigin, FieldReference, FieldType};
    use chrono::Utc;

    fn field(name: &str, field_type: FieldType, nullable: bool) -> Field {
        Field {
            name: name.to_string(),
            field_type,
            nullable,
            source_pattern: "html:p".to_string(),
            origin: FieldOrigin::Content,
            references: None,
        }
    }

    fn schema() -> DatabaseSchema {
        let mut parent = field("category_slug", FieldType::String, true);
        parent.origin = FieldOrigin::Reference;
        parent.references = Some(FieldReference {
            table: "category".to_string(),
            field: "slug".to_string(),
        });
        DatabaseSchema {
            site_id: "shop".to_string(),
            version: 2,
            created_at: Utc::now(),
            tables: vec![
                Table {
                    name: "category".to_string(),
                    source_pattern: "html:c".to_string(),
                    fields: vec![field("slug", FieldType::String, false)],
                },
                Table {
                    name: "product".to_string(),
                    source_pattern: "html:p".to_string(),
                    fields: vec![field("price", FieldType::Float, false), parent],
                },
            ],
        }
    }

    #[test]
    fn test_render_ddl() {
        let sql = render_ddl(&schema());

        assert!(sql.starts_with("-- Schema v2 for site 'shop'"));
        assert!(sql.contains("CREATE TABLE IF NOT EXISTS \"category\" ("));
        assert!(sql.contains("\"price\" REAL NOT NULL"));
        assert!(sql.contains("\"category_slug\" TEXT REFERENCES \"category\" (\"slug\")"));
        assert_eq!(sql.matches("CREATE TABLE").count(), 2);
    }

    #[test]
    fn test_ddl_is_valid_sqlite() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch(&render_ddl(&schema())).unwrap();
        let columns: i64 = conn
            .query_row("SELECT COUNT(*) FROM pragma_table_info('product')", [], |r| r.get(0))
            .unwrap();
        assert_eq!(columns, 3);
    }

    #[test]
    fn test_identifiers_are_quoted() {
        assert_eq!(quote("order"), "\"order\"");
        assert_eq!(quote("a\"b"), "\"a\"\"b\"");
    }
}
