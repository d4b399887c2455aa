//! Integration tests for the pipeline
//!
//! These tests drive the orchestrator through its public API: a full run against
//! a wiremock site, and runs over prepared snapshots that exercise pagination,
//! schema widening across versions and fingerprint reuse.

use chrono::{DateTime, TimeZone, Utc};
use std::sync::{Arc, Mutex};
use sumi_strata::analyzer::{HeuristicInference, Locator};
use sumi_strata::config::{parse_config, Config};
use sumi_strata::crawler::ReqwestTransport;
use sumi_strata::orchestrator::{Orchestrator, PipelineError, RunInput, RunStatus};
use sumi_strata::output::render_ddl;
use sumi_strata::plan::FieldSource;
use sumi_strata::schema::{FieldOrigin, FieldType};
use sumi_strata::storage::{content_hash, SqliteStorage};
use sumi_strata::{PipelineStage, Snapshot};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Creates a test configuration writing to the given database
fn test_config(db_path: &str) -> Config {
    parse_config(&format!(
        r#"
[user-agent]
crawler-name = "TestBot"
crawler-version = "1.0.0"
contact-url = "https://example.com/contact"
contact-email = "test@example.com"

[fetcher]
requests-per-second = 1000.0
burst = 100
initial-backoff-ms = 1
max-backoff-ms = 2

[analyzer]
inference-backoff-ms = 1

[storage]
database-path = "{}"
"#,
        db_path
    ))
    .expect("test config is valid")
}

fn in_memory_orchestrator() -> Orchestrator {
    let config = test_config(":memory:");
    let transport = ReqwestTransport::from_config(&config.user_agent, &config.fetcher).unwrap();
    Orchestrator::new(
        config,
        Arc::new(Mutex::new(SqliteStorage::open_in_memory().unwrap())),
        Arc::new(transport),
        Arc::new(HeuristicInference),
    )
}

fn at(seconds: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap()
}

fn html(url: &str, body: &str, seconds: i64) -> Snapshot {
    Snapshot {
        site_id: "shop".to_string(),
        url: url.to_string(),
        fetch_time: at(seconds),
        content_hash: content_hash(body.as_bytes()),
        raw_bytes: body.as_bytes().to_vec(),
        content_type: "text/html; charset=utf-8".to_string(),
    }
}

fn product_page(title: &str, price: &str) -> String {
    format!(
        r#"<html><body><div class="product"><h1 class="title">{}</h1><span class="price">{}</span></div></body></html>"#,
        title, price
    )
}

fn product(id: u32, title: &str, price: &str) -> Snapshot {
    html(
        &format!("https://shop.test/product/{}", id),
        &product_page(title, price),
        id as i64,
    )
}

fn list_page(page: u32) -> Snapshot {
    let body = format!(
        r#"<html><body><ul class="items"><li><a href="/item/{a}">Item {a}</a></li><li><a href="/item/{b}">Item {b}</a></li></ul><a class="next" href="/list?page={next}">Next</a></body></html>"#,
        a = page * 2 - 1,
        b = page * 2,
        next = page + 1
    );
    html(&format!("https://shop.test/list?page={}", page), &body, page as i64)
}

#[tokio::test]
async fn test_products_site_end_to_end() {
    // Start a mock server
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("User-agent: *\nAllow: /"))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(
                    r#"<html><body><nav><a href="/product/1">One</a><a href="/product/2">Two</a></nav></body></html>"#,
                )
                .insert_header("content-type", "text/html"),
        )
        .mount(&mock_server)
        .await;

    for (id, title, price) in [(1, "Blue Widget", "19.99"), (2, "Red Gadget", "5.00")] {
        Mock::given(method("GET"))
            .and(path(format!("/product/{}", id)))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(product_page(title, price))
                    .insert_header("content-type", "text/html"),
            )
            .mount(&mock_server)
            .await;
    }

    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("strata.db");
    let orchestrator = Orchestrator::from_config(test_config(db_path.to_str().unwrap())).unwrap();

    let run = orchestrator
        .run("shop", RunInput::Seeds(vec![format!("{}/", base_url)]))
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Succeeded);
    assert_eq!(run.stage, PipelineStage::Committed);
    assert_eq!(
        orchestrator.snapshot_store().list("shop", None).count(),
        3,
        "home page and both products are archived"
    );

    let schema = orchestrator.latest_schema("shop").unwrap().unwrap();
    let plan = orchestrator.latest_plan("shop").unwrap().unwrap();
    assert!(plan.missing_in(&schema).is_empty());

    let products = schema.table("product").expect("product table");
    let id = products.field("id").unwrap();
    assert_eq!(id.field_type, FieldType::Int);
    assert_eq!(id.origin, FieldOrigin::Key);
    assert!(!id.nullable);
    assert_eq!(products.field("title").unwrap().field_type, FieldType::String);
    assert_eq!(products.field("price").unwrap().field_type, FieldType::Float);

    let product_url = url::Url::parse(&format!("{}/product/7", base_url)).unwrap();
    let rule = plan.rule_for_url(&product_url).expect("product rule");
    assert_eq!(rule.emits_table, "product");
    let id_mapping = rule.field_mappings.iter().find(|m| m.field == "id").unwrap();
    assert_eq!(
        id_mapping.source,
        FieldSource::Page {
            locator: Locator::UrlParam { name: "id".to_string() }
        }
    );
    assert_eq!(plan.seeds[0].url, format!("{}/", base_url));

    let ddl = render_ddl(&schema);
    assert!(ddl.contains("CREATE TABLE IF NOT EXISTS \"product\""));
}

#[tokio::test]
async fn test_pagination_stops_at_off_pattern_page() {
    let orchestrator = in_memory_orchestrator();
    let mut snapshots: Vec<Snapshot> = (1..=3).map(list_page).collect();
    snapshots.push(html(
        "https://shop.test/list?page=4",
        r#"<html><body><p class="empty">No more items</p></body></html>"#,
        4,
    ));

    orchestrator
        .run("shop", RunInput::Snapshots(snapshots))
        .await
        .unwrap();
    let plan = orchestrator.latest_plan("shop").unwrap().unwrap();

    let listing = plan
        .rules
        .iter()
        .find(|r| r.termination_condition.is_paginated())
        .expect("paginated rule");
    let signature = listing.match_pattern.signature.as_str();
    assert!(!listing.termination_condition.should_stop(3, Some(signature)));
    assert!(listing.termination_condition.should_stop(4, Some(signature)));
    assert!(plan
        .seeds
        .iter()
        .any(|s| s.url == "https://shop.test/list?page=1"));
}

#[tokio::test]
async fn test_schema_only_widens_across_runs() {
    let orchestrator = in_memory_orchestrator();

    let first = orchestrator
        .run(
            "shop",
            RunInput::Snapshots(vec![product(1, "Blue Widget", "19.99"), product(2, "Red Gadget", "5.00")]),
        )
        .await
        .unwrap();
    let second = orchestrator
        .run(
            "shop",
            RunInput::Snapshots(vec![product(3, "Green Gizmo", "call us"), product(4, "Gray Gear", "12.50")]),
        )
        .await
        .unwrap();

    assert_eq!(first.artifacts.unwrap().schema_version, 1);
    assert_eq!(second.artifacts.unwrap().schema_version, 2);

    let v1 = orchestrator.schema_version("shop", 1).unwrap();
    let v2 = orchestrator.latest_schema("shop").unwrap().unwrap();
    assert_eq!(v1.table("product").unwrap().field("price").unwrap().field_type, FieldType::Float);
    assert_eq!(v2.table("product").unwrap().field("price").unwrap().field_type, FieldType::String);

    // Every v1 column survives in v2
    for table in &v1.tables {
        let widened = v2.table(&table.name).expect("table kept");
        for field in &table.fields {
            let kept = widened.field(&field.name).expect("field kept");
            assert_eq!(kept.field_type.join(field.field_type), kept.field_type);
            assert!(kept.nullable || !field.nullable);
        }
    }

    let plan = orchestrator.latest_plan("shop").unwrap().unwrap();
    assert_eq!(plan.version, 2);
    assert!(plan.missing_in(&v2).is_empty());
}

#[tokio::test]
async fn test_identical_input_reuses_committed_run() {
    let orchestrator = in_memory_orchestrator();
    let snapshots = vec![product(1, "Blue Widget", "19.99"), product(2, "Red Gadget", "5.00")];

    let first = orchestrator
        .run("shop", RunInput::Snapshots(snapshots.clone()))
        .await
        .unwrap();
    let again = orchestrator.run("shop", RunInput::Snapshots(snapshots)).await.unwrap();
    let stored = orchestrator.run("shop", RunInput::Stored).await.unwrap();

    assert_eq!(again.reused_run, Some(first.id));
    assert_eq!(stored.reused_run, Some(first.id));
    assert_eq!(again.artifacts, first.artifacts);
    assert_eq!(orchestrator.latest_model("shop").unwrap().unwrap().version, 1);
}

#[tokio::test]
async fn test_concurrent_callers_produce_one_model() {
    let orchestrator = in_memory_orchestrator();
    let snapshots = vec![product(1, "Blue Widget", "19.99"), product(2, "Red Gadget", "5.00")];

    let (a, b) = tokio::join!(
        orchestrator.run("shop", RunInput::Snapshots(snapshots.clone())),
        orchestrator.run("shop", RunInput::Snapshots(snapshots)),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    // The second caller either shared the in-flight run or was answered from it
    assert!(b.id == a.id || b.reused_run == Some(a.id));
    assert_eq!(orchestrator.latest_model("shop").unwrap().unwrap().version, 1);
    assert!(!orchestrator.is_running("shop"));
}

#[tokio::test]
async fn test_empty_site_id_is_rejected() {
    let orchestrator = in_memory_orchestrator();
    let result = orchestrator.run("", RunInput::Stored).await;
    assert!(matches!(result, Err(PipelineError::InvalidInput(_))));
}
