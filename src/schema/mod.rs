//! Database schema derivation
//!
//! A [`DatabaseSchema`] has one table per node pattern of a structural model.
//! Schemas are versioned with the model they were derived from, and each new
//! version only ever adds tables and fields or widens field types.

mod derive;
mod types;

pub use derive::{derive, RAW_CONTENT_FIELD};
pub use types::FieldType;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Target of a reference field
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldReference {
    pub table: String,
    pub field: String,
}

/// Where a field's values come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldOrigin {
    /// A placeholder of the pattern's URL template
    Key,
    /// An inferred, located field
    Content,
    /// The key of the page that linked here
    Reference,
    /// The opaque body of an unresolved pattern
    Raw,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub field_type: FieldType,
    pub nullable: bool,
    /// Signature of the pattern the field was derived from
    pub source_pattern: String,
    pub origin: FieldOrigin,
    pub references: Option<FieldReference>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    pub source_pattern: String,
    /// Ordered; names are unique within the table
    pub fields: Vec<Field>,
}

impl Table {
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSchema {
    pub site_id: String,
    /// Equals the version of the structural model it was derived from
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub tables: Vec<Table>,
}

impl DatabaseSchema {
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn table_for_pattern(&self, signature: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.source_pattern == signature)
    }

    /// Checks that every reference names an existing table and field
    ///
    /// # Returns
    ///
    /// Descriptions of the dangling references; empty when the schema is consistent.
    pub fn dangling_references(&self) -> Vec<String> {
        let mut problems = Vec::new();
        for table in &self.tables {
            for field in &table.fields {
                let Some(reference) = &field.references else {
                    continue;
                };
                let resolves = self
                    .table(&reference.table)
                    .and_then(|t| t.field(&reference.field))
                    .is_some();
                if !resolves {
                    problems.push(format!(
                        "{}.{} -> {}.{}",
                        table.name, field.name, reference.table, reference.field
                    ));
                }
            }
        }
        problems
    }
}
