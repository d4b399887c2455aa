//! Column type lattice
//!
//! `unknown < bool < int < float < string < json`. Every value widens to the
//! least upper bound of everything seen so far; a column never narrows.

use crate::analyzer::ObservedValue;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    #[default]
    Unknown,
    Bool,
    Int,
    Float,
    String,
    Json,
}

impl FieldType {
    /// Least upper bound
    pub fn join(self, other: Self) -> Self {
        self.max(other)
    }

    /// True if a column of type `self` can hold every value of `other`
    pub fn covers(self, other: Self) -> bool {
        self >= other
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::String => "string",
            Self::Json => "json",
        }
    }

    /// SQLite column type
    pub fn sql_type(&self) -> &'static str {
        match self {
            Self::Bool => "BOOLEAN",
            Self::Int => "INTEGER",
            Self::Float => "REAL",
            Self::Unknown | Self::String => "TEXT",
            Self::Json => "JSON",
        }
    }

    /// Narrowest type of a scraped text value
    ///
    /// Currency symbols and thousands separators are ignored when checking for
    /// numbers, so `$1,299.00` is a float.
    pub fn of_text(text: &str) -> Self {
        let t = text.trim();
        if t.is_empty() {
            return Self::Unknown;
        }
        if t.eq_ignore_ascii_case("true") || t.eq_ignore_ascii_case("false") {
            return Self::Bool;
        }
        if t.parse::<i64>().is_ok() {
            return Self::Int;
        }
        let numeric = t
            .trim_start_matches(['$', '€', '£', '¥'])
            .trim_end_matches(['$', '€', '£', '¥'])
            .trim()
            .replace(',', "");
        if numeric.parse::<f64>().map(|n| n.is_finite()).unwrap_or(false) {
            return Self::Float;
        }
        Self::String
    }

    pub fn of_json(value: &Value) -> Self {
        match value {
            Value::Null => Self::Unknown,
            Value::Bool(_) => Self::Bool,
            Value::Number(n) if n.is_i64() || n.is_u64() => Self::Int,
            Value::Number(_) => Self::Float,
            Value::String(s) => Self::of_text(s),
            Value::Array(_) | Value::Object(_) => Self::Json,
        }
    }

    /// Type evidence of one observation; None when the field was missing
    pub fn of_observed(value: &ObservedValue) -> Option<Self> {
        match value {
            ObservedValue::Text(text) => Some(Self::of_text(text)),
            ObservedValue::Json(value) => Some(Self::of_json(value)),
            ObservedValue::Missing => None,
        }
    }

    /// Maps a free-form semantic type hint onto the lattice
    pub fn from_semantic_hint(hint: &str) -> Self {
        let hint = hint.to_lowercase();
        let words: Vec<&str> = hint
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        let any = |names: &[&str]| words.iter().any(|w| names.contains(w));

        if words.is_empty() || any(&["unknown", "null", "none"]) {
            Self::Unknown
        } else if any(&["json", "object", "array", "list", "map"]) {
            Self::Json
        } else if any(&["bool", "boolean", "flag"]) {
            Self::Bool
        } else if any(&["int", "integer", "count", "quantity", "id"]) {
            Self::Int
        } else if any(&["float", "number", "numeric", "decimal", "double", "price", "currency", "amount", "rating"]) {
            Self::Float
        } else {
            Self::String
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_join_is_least_upper_bound() {
        assert_eq!(FieldType::Int.join(FieldType::Float), FieldType::Float);
        assert_eq!(FieldType::Float.join(FieldType::Int), FieldType::Float);
        assert_eq!(FieldType::Unknown.join(FieldType::Bool), FieldType::Bool);
        assert_eq!(FieldType::String.join(FieldType::Json), FieldType::Json);
        assert!(FieldType::String.covers(FieldType::Int));
        assert!(!FieldType::Int.covers(FieldType::Float));
    }

    #[test]
    fn test_of_text() {
        assert_eq!(FieldType::of_text(" 42 "), FieldType::Int);
        assert_eq!(FieldType::of_text("19.99"), FieldType::Float);
        assert_eq!(FieldType::of_text("$1,299.00"), FieldType::Float);
        assert_eq!(FieldType::of_text("False"), FieldType::Bool);
        assert_eq!(FieldType::of_text("Blue Widget"), FieldType::String);
        assert_eq!(FieldType::of_text(""), FieldType::Unknown);
        assert_eq!(FieldType::of_text("NaN"), FieldType::String);
    }

    #[test]
    fn test_of_json() {
        assert_eq!(FieldType::of_json(&json!(3)), FieldType::Int);
        assert_eq!(FieldType::of_json(&json!(3.5)), FieldType::Float);
        assert_eq!(FieldType::of_json(&json!("7")), FieldType::Int);
        assert_eq!(FieldType::of_json(&json!([1])), FieldType::Json);
        assert_eq!(FieldType::of_json(&json!(null)), FieldType::Unknown);
    }

    #[test]
    fn test_semantic_hints() {
        assert_eq!(FieldType::from_semantic_hint("price"), FieldType::Float);
        assert_eq!(FieldType::from_semantic_hint("Integer"), FieldType::Int);
        assert_eq!(FieldType::from_semantic_hint("product id"), FieldType::Int);
        assert_eq!(FieldType::from_semantic_hint("boolean"), FieldType::Bool);
        assert_eq!(FieldType::from_semantic_hint("list of tags"), FieldType::Json);
        assert_eq!(FieldType::from_semantic_hint("url"), FieldType::String);
        assert_eq!(FieldType::from_semantic_hint("point"), FieldType::String);
        assert_eq!(FieldType::from_semantic_hint(""), FieldType::Unknown);
    }

    #[test]
    fn test_sql_types() {
        assert_eq!(FieldType::Float.sql_type(), "REAL");
        assert_eq!(FieldType::Unknown.sql_type(), "TEXT");
    }
}
