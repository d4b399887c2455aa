//! Field locators
//!
//! Inference only names a field and gives one example value. This module finds
//! where that value sits in a page so it can be read from every other page of
//! the same pattern.

use crate::analyzer::model::{ContentKind, Locator, ObservedValue};
use crate::analyzer::skeleton::tag_path;
use crate::storage::Snapshot;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use std::collections::HashMap;

/// Elements whose text is never page content
const SKIPPED_TAGS: &[&str] = &["script", "style", "noscript", "template"];

/// A parsed response body
pub enum Document {
    Html(Html),
    Json(Value),
    Raw(String),
}

impl Document {
    pub fn parse(kind: ContentKind, snapshot: &Snapshot) -> Self {
        match kind {
            ContentKind::Html => Self::Html(Html::parse_document(&snapshot.text())),
            ContentKind::Json => serde_json::from_slice(&snapshot.raw_bytes)
                .map(Self::Json)
                .unwrap_or_else(|_| Self::Raw(snapshot.text())),
            ContentKind::Other => Self::Raw(snapshot.text()),
        }
    }

    /// Finds the position of `example` in this document
    ///
    /// HTML is searched in document order, first for an element whose own text
    /// equals the example, then for an attribute value equal to it, then for own
    /// text containing it. JSON is searched for a scalar whose text equals it.
    pub fn find(&self, example: &str) -> Option<Locator> {
        let example = collapse_whitespace(example);
        match self {
            Self::Html(html) => find_in_html(html, &example),
            Self::Json(value) => {
                if example.is_empty() {
                    return None;
                }
                find_in_json(value, &example, String::new())
                    .map(|pointer| Locator::JsonPointer { pointer })
            }
            Self::Raw(_) => Some(Locator::RawContent),
        }
    }

    /// Reads the value at `locator`
    pub fn read(&self, locator: &Locator) -> ObservedValue {
        match (self, locator) {
            (
                Self::Html(html),
                Locator::Css {
                    selector,
                    index,
                    attribute,
                },
            ) => read_html(html, selector, *index, attribute.as_deref()),
            (Self::Json(value), Locator::JsonPointer { pointer }) => match value.pointer(pointer) {
                None | Some(Value::Null) => ObservedValue::Missing,
                Some(found) => ObservedValue::Json(found.clone()),
            },
            (Self::Raw(text), Locator::RawContent) => ObservedValue::Text(text.clone()),
            (Self::Html(html), Locator::RawContent) => ObservedValue::Text(html.html()),
            (Self::Json(value), Locator::RawContent) => ObservedValue::Json(value.clone()),
            _ => ObservedValue::Missing,
        }
    }
}

/// Text of an element's direct text children, whitespace collapsed
pub fn own_text(el: &ElementRef) -> String {
    let raw: String = el
        .children()
        .filter_map(|child| child.value().as_text())
        .map(|text| text.to_string())
        .collect::<Vec<_>>()
        .join(" ");
    collapse_whitespace(&raw)
}

pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Content elements in document order with their tag path and match index
pub fn indexed_elements(html: &Html) -> Vec<(ElementRef<'_>, String, usize)> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut elements = Vec::new();

    for el in html.root_element().descendants().filter_map(ElementRef::wrap) {
        let path = tag_path(&el);
        let counter = seen.entry(path.clone()).or_insert(0);
        let index = *counter;
        *counter += 1;

        let skipped = el
            .ancestors()
            .filter_map(ElementRef::wrap)
            .chain(std::iter::once(el))
            .any(|e| SKIPPED_TAGS.contains(&e.value().name()));
        if !skipped {
            elements.push((el, path, index));
        }
    }

    elements
}

fn find_in_html(html: &Html, example: &str) -> Option<Locator> {
    if example.is_empty() {
        return None;
    }
    let elements = indexed_elements(html);
    let css = |path: &String, index: usize, attribute: Option<&str>| Locator::Css {
        selector: path.clone(),
        index,
        attribute: attribute.map(str::to_string),
    };

    if let Some((_, path, index)) = elements.iter().find(|(el, _, _)| own_text(el) == example) {
        return Some(css(path, *index, None));
    }

    for (el, path, index) in &elements {
        for (name, value) in el.value().attrs() {
            if collapse_whitespace(value) == example {
                return Some(css(path, *index, Some(name)));
            }
        }
    }

    elements
        .iter()
        .find(|(el, _, _)| own_text(el).contains(example))
        .map(|(_, path, index)| css(path, *index, None))
}

fn read_html(html: &Html, selector: &str, index: usize, attribute: Option<&str>) -> ObservedValue {
    let Ok(parsed) = Selector::parse(selector) else {
        return ObservedValue::Missing;
    };
    let Some(el) = html.select(&parsed).nth(index) else {
        return ObservedValue::Missing;
    };

    let text = match attribute {
        Some(name) => el.value().attr(name).map(collapse_whitespace),
        None => Some(own_text(&el)),
    };
    match text {
        Some(t) if !t.is_empty() => ObservedValue::Text(t),
        _ => ObservedValue::Missing,
    }
}

fn find_in_json(value: &Value, example: &str, pointer: String) -> Option<String> {
    match value {
        Value::Object(map) => map
            .iter()
            .find_map(|(key, child)| find_in_json(child, example, format!("{}/{}", pointer, escape_pointer(key)))),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .find_map(|(i, child)| find_in_json(child, example, format!("{}/{}", pointer, i))),
        Value::String(s) if collapse_whitespace(s) == example => Some(pointer),
        Value::Number(n) if n.to_string() == example => Some(pointer),
        Value::Bool(b) if b.to_string() == example => Some(pointer),
        _ => None,
    }
}

fn escape_pointer(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn snapshot(content_type: &str, body: &str) -> Snapshot {
        Snapshot {
            site_id: "s".to_string(),
            url: "https://s.test/".to_string(),
            fetch_time: Utc::now(),
            content_hash: crate::storage::content_hash(body.as_bytes()),
            raw_bytes: body.as_bytes().to_vec(),
            content_type: content_type.to_string(),
        }
    }

    const PRODUCT_ONE: &str = r#"<html><body>
        <div class="product"><h1>Blue   Widget</h1><span class="price">$19.99</span></div>
        <ul><li>first</li><li>second</li></ul>
        <a href="/cart" data-sku="A-1">Add</a>
        <script>var title = "Blue Widget";</script>
    </body></html>"#;

    const PRODUCT_TWO: &str = r#"<html><body>
        <div class="product"><h1>Red Gadget</h1><span class="price">$5.00</span></div>
        <ul><li>one</li><li>two</li></ul>
        <a href="/cart" data-sku="B-2">Add</a>
    </body></html>"#;

    #[test]
    fn test_html_own_text_match_reads_across_pages() {
        let one = Document::parse(ContentKind::Html, &snapshot("text/html", PRODUCT_ONE));
        let two = Document::parse(ContentKind::Html, &snapshot("text/html", PRODUCT_TWO));

        let locator = one.find("Blue Widget").unwrap();
        assert_eq!(
            locator,
            Locator::Css {
                selector: "html > body > div > h1".to_string(),
                index: 0,
                attribute: None
            }
        );
        assert_eq!(two.read(&locator), ObservedValue::Text("Red Gadget".to_string()));
    }

    #[test]
    fn test_html_match_index_and_containment() {
        let one = Document::parse(ContentKind::Html, &snapshot("text/html", PRODUCT_ONE));
        let two = Document::parse(ContentKind::Html, &snapshot("text/html", PRODUCT_TWO));

        let second_item = one.find("second").unwrap();
        assert_eq!(two.read(&second_item), ObservedValue::Text("two".to_string()));

        let price = one.find("19.99").unwrap();
        assert_eq!(two.read(&price), ObservedValue::Text("$5.00".to_string()));
    }

    #[test]
    fn test_html_attribute_match() {
        let one = Document::parse(ContentKind::Html, &snapshot("text/html", PRODUCT_ONE));
        let two = Document::parse(ContentKind::Html, &snapshot("text/html", PRODUCT_TWO));

        let sku = one.find("A-1").unwrap();
        assert!(matches!(&sku, Locator::Css { attribute: Some(a), .. } if a == "data-sku"));
        assert_eq!(two.read(&sku), ObservedValue::Text("B-2".to_string()));
    }

    #[test]
    fn test_html_missing_value() {
        let one = Document::parse(ContentKind::Html, &snapshot("text/html", PRODUCT_ONE));
        assert!(one.find("not on the page").is_none());

        let empty = Document::parse(ContentKind::Html, &snapshot("text/html", "<html><body></body></html>"));
        let locator = one.find("Blue Widget").unwrap();
        assert_eq!(empty.read(&locator), ObservedValue::Missing);
    }

    #[test]
    fn test_json_pointer_match() {
        let body = json!({"data": {"items": [{"name": "a/b", "price": 4.5}], "ok": true}}).to_string();
        let doc = Document::parse(ContentKind::Json, &snapshot("application/json", &body));

        assert_eq!(
            doc.find("4.5"),
            Some(Locator::JsonPointer {
                pointer: "/data/items/0/price".to_string()
            })
        );
        let name = doc.find("a/b").unwrap();
        assert_eq!(doc.read(&name), ObservedValue::Json(json!("a/b")));

        let absent = Locator::JsonPointer {
            pointer: "/data/missing".to_string(),
        };
        assert_eq!(doc.read(&absent), ObservedValue::Missing);
    }

    #[test]
    fn test_raw_content() {
        let doc = Document::parse(ContentKind::Other, &snapshot("text/plain", "hello"));
        assert_eq!(doc.find("anything"), Some(Locator::RawContent));
        assert_eq!(doc.read(&Locator::RawContent), ObservedValue::Text("hello".to_string()));
    }
}
