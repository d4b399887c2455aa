//! Field inference capability
//!
//! The analyzer hands a few raw example documents of one cluster to a
//! [`FieldInference`] implementation and gets back the fields those documents
//! carry. Two implementations are provided:
//!
//! - **[`HeuristicInference`]** works offline from leaf text nodes and JSON scalars.
//! - **[`HttpInference`]** posts the examples to an inference endpoint.
//!
//! # Retry Strategy
//!
//! [`infer_with_retry`] retries every [`InferenceError`] kind with exponential
//! backoff; the caller decides what exhaustion means.

use crate::analyzer::locate::{collapse_whitespace, indexed_elements, own_text};
use crate::config::InferenceConfig;
use crate::crawler::{classify_reqwest_error, TransportError};
use crate::{InferenceError, StrataError};
use async_trait::async_trait;
use reqwest::Client;
use scraper::Html;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Fields proposed per example set, at most
const MAX_FIELDS: usize = 32;

/// A field proposed by an inference capability
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InferredField {
    #[serde(alias = "name")]
    pub field_name: String,
    #[serde(alias = "example")]
    pub example_value: String,
    #[serde(alias = "type")]
    pub semantic_type: String,
}

/// Names the fields carried by a set of example documents
#[async_trait]
pub trait FieldInference: Send + Sync {
    /// # Arguments
    ///
    /// * `examples` - Raw bodies of documents that share one structure
    async fn infer_fields(&self, examples: &[String]) -> Result<Vec<InferredField>, InferenceError>;
}

/// Calls `inference`, retrying failures with exponential backoff
///
/// # Returns
///
/// * `Ok(fields)` - From the first successful attempt
/// * `Err(InferenceError)` - The last error once `max_attempts` attempts failed
pub async fn infer_with_retry(
    inference: &dyn FieldInference,
    examples: &[String],
    max_attempts: u32,
    initial_backoff: Duration,
) -> Result<Vec<InferredField>, InferenceError> {
    let max_attempts = max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match inference.infer_fields(examples).await {
            Ok(fields) => return Ok(fields),
            Err(e) if attempt >= max_attempts => return Err(e),
            Err(e) => {
                let delay = initial_backoff.saturating_mul(1 << (attempt - 1).min(16));
                warn!(
                    "Inference failed ({}), retrying in {:?} (attempt {}/{})",
                    e, delay, attempt, max_attempts
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Builds the configured inference capability
///
/// An endpoint selects [`HttpInference`]; otherwise [`HeuristicInference`] is used.
pub fn inference_from_config(config: &InferenceConfig) -> Result<Arc<dyn FieldInference>, StrataError> {
    match &config.endpoint {
        Some(endpoint) => Ok(Arc::new(HttpInference::new(
            endpoint,
            config.model.clone(),
            Duration::from_secs(if config.timeout_secs == 0 { 60 } else { config.timeout_secs }),
        )?)),
        None => Ok(Arc::new(HeuristicInference)),
    }
}

/// Offline inference from document structure
///
/// HTML: one field per leaf element with text (or image source), named after
/// its first class, its id, or its tag. Text that is identical in every example
/// is treated as boilerplate and skipped. JSON: one field per scalar value,
/// named after its key. Other content yields a single `content` field.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicInference;

#[async_trait]
impl FieldInference for HeuristicInference {
    async fn infer_fields(&self, examples: &[String]) -> Result<Vec<InferredField>, InferenceError> {
        let Some(first) = examples.first() else {
            return Ok(Vec::new());
        };

        let trimmed = first.trim_start();
        if trimmed.starts_with('{') || trimmed.starts_with('[') {
            if let Ok(value) = serde_json::from_str::<Value>(first) {
                return Ok(json_fields(&value));
            }
        }
        if trimmed.starts_with('<') {
            return Ok(html_fields(first, &examples[1..]));
        }

        let mut preview: String = collapse_whitespace(first).chars().take(64).collect();
        if preview.is_empty() {
            preview = first.chars().take(64).collect();
        }
        Ok(vec![InferredField {
            field_name: "content".to_string(),
            example_value: preview,
            semantic_type: "string".to_string(),
        }])
    }
}

fn html_fields(first: &str, others: &[String]) -> Vec<InferredField> {
    let document = Html::parse_document(first);
    let other_texts: Vec<HashSet<String>> = others
        .iter()
        .map(|html| {
            let doc = Html::parse_document(html);
            indexed_elements(&doc)
                .iter()
                .map(|(el, _, _)| own_text(el))
                .filter(|t| !t.is_empty())
                .collect()
        })
        .collect();

    let mut names = FieldNames::default();
    let mut fields = Vec::new();

    for (el, _, _) in indexed_elements(&document) {
        if fields.len() >= MAX_FIELDS {
            break;
        }
        let tag = el.value().name();
        if matches!(tag, "html" | "head" | "body") {
            continue;
        }

        if tag == "img" {
            if let Some(src) = el.value().attr("src") {
                fields.push(InferredField {
                    field_name: names.allocate("image"),
                    example_value: src.to_string(),
                    semantic_type: "url".to_string(),
                });
            }
            continue;
        }

        let text = own_text(&el);
        if text.is_empty() {
            continue;
        }
        let boilerplate = !other_texts.is_empty() && other_texts.iter().all(|texts| texts.contains(&text));
        if boilerplate {
            continue;
        }

        let base = el
            .value()
            .classes()
            .next()
            .or_else(|| el.value().id())
            .unwrap_or(tag);
        fields.push(InferredField {
            field_name: names.allocate(base),
            semantic_type: guess_semantic_type(&text).to_string(),
            example_value: text,
        });
    }

    fields
}

fn json_fields(value: &Value) -> Vec<InferredField> {
    let mut names = FieldNames::default();
    let mut fields = Vec::new();
    collect_json_fields(value, "value", &mut names, &mut fields);
    fields
}

fn collect_json_fields(value: &Value, key: &str, names: &mut FieldNames, fields: &mut Vec<InferredField>) {
    if fields.len() >= MAX_FIELDS {
        return;
    }
    let (example, semantic_type) = match value {
        Value::Object(map) => {
            for (child_key, child) in map {
                collect_json_fields(child, child_key, names, fields);
            }
            return;
        }
        // Only the first element stands for the array
        Value::Array(items) => {
            if let Some(first) = items.first() {
                collect_json_fields(first, key, names, fields);
            }
            return;
        }
        Value::Null => return,
        Value::Bool(b) => (b.to_string(), "boolean"),
        Value::Number(n) if n.is_i64() || n.is_u64() => (n.to_string(), "integer"),
        Value::Number(n) => (n.to_string(), "number"),
        Value::String(s) => (s.clone(), guess_semantic_type(s)),
    };
    if example.trim().is_empty() {
        return;
    }
    fields.push(InferredField {
        field_name: names.allocate(key),
        example_value: example,
        semantic_type: semantic_type.to_string(),
    });
}

/// Coarse type hint for a text value
pub fn guess_semantic_type(text: &str) -> &'static str {
    let t = text.trim();
    if t.eq_ignore_ascii_case("true") || t.eq_ignore_ascii_case("false") {
        return "boolean";
    }
    if t.parse::<i64>().is_ok() {
        return "integer";
    }
    let numeric: String = t
        .trim_start_matches(['$', '€', '£', '¥'])
        .trim_end_matches(['$', '€', '£', '¥'])
        .replace(',', "");
    if numeric.parse::<f64>().map(|n| n.is_finite()).unwrap_or(false) {
        return "number";
    }
    if t.starts_with("http://") || t.starts_with("https://") {
        return "url";
    }
    "string"
}

/// Unique, column-safe field names
#[derive(Default)]
struct FieldNames {
    used: HashSet<String>,
}

impl FieldNames {
    fn allocate(&mut self, raw: &str) -> String {
        let mut base: String = raw
            .trim()
            .to_lowercase()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        base = base.trim_matches('_').to_string();
        if base.is_empty() || base.starts_with(|c: char| c.is_ascii_digit()) {
            base = format!("field_{}", base);
        }

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

/// Inference served over HTTP
///
/// The endpoint receives `{"model": ..., "examples": [...]}` and answers
/// `{"fields": [{"field_name", "example_value", "semantic_type"}, ...]}`.
///
/// | Outcome | Error |
/// |---------|-------|
/// | Timeout, connection failure, HTTP 408/504 | `Timeout` |
/// | HTTP 429 | `RateLimited` |
/// | Any other status or undecodable body | `MalformedResponse` |
pub struct HttpInference {
    client: Client,
    endpoint: String,
    model: Option<String>,
}

#[derive(Serialize)]
struct InferenceRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    examples: &'a [String],
}

#[derive(Deserialize)]
struct InferenceResponse {
    fields: Vec<InferredField>,
}

impl HttpInference {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(endpoint: &str, model: Option<String>, timeout: Duration) -> Result<Self, StrataError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            model,
        })
    }
}

#[async_trait]
impl FieldInference for HttpInference {
    async fn infer_fields(&self, examples: &[String]) -> Result<Vec<InferredField>, InferenceError> {
        let body = InferenceRequest {
            model: self.model.as_deref(),
            examples,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        debug!("Inference endpoint answered {}", status);
        match status.as_u16() {
            429 => return Err(InferenceError::RateLimited),
            408 | 504 => return Err(InferenceError::Timeout),
            _ if !status.is_success() => {
                return Err(InferenceError::MalformedResponse(format!("HTTP status {}", status)))
            }
            _ => {}
        }

        let bytes = response.bytes().await.map_err(request_error)?;
        let parsed: InferenceResponse =
            serde_json::from_slice(&bytes).map_err(|e| InferenceError::MalformedResponse(e.to_string()))?;

        if let Some(bad) = parsed.fields.iter().find(|f| f.field_name.trim().is_empty()) {
            return Err(InferenceError::MalformedResponse(format!(
                "field with empty name (example {:?})",
                bad.example_value
            )));
        }
        Ok(parsed.fields)
    }
}

fn request_error(err: reqwest::Error) -> InferenceError {
    match classify_reqwest_error(err) {
        TransportError::Timeout | TransportError::Connect(_) => InferenceError::Timeout,
        TransportError::Other(msg) => InferenceError::MalformedResponse(msg),
    }
}
