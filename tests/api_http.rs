// tests/api_http.rs
//
// HTTP-level tests for the public API Router without opening sockets.
// We exercise the router directly via tower::ServiceExt::oneshot.
//
// Covered:
// - GET /health
// - POST /proposals (happy path, skip mode, reject mode, error mapping)
// - POST /proposals/category + GET /proposals/history
// - POST /anomalies/detect + GET /anomalies
// - POST /sources/health, POST /coverage/gaps, POST /report
// - GET /metrics

use std::sync::Arc;

use serde_json::json;
use serde_json::Value as Json;
use shuttle_axum::axum::{
    body::{self, Body},
    http::{Request, StatusCode},
    Router,
};
use tower::ServiceExt as _; // for `oneshot`

use market_evidence_engine::api;
use market_evidence_engine::audit::{AuditSink, MemoryAuditSink};
use market_evidence_engine::config::{EngineConfig, ValidationMode};
use market_evidence_engine::reliability::PublisherGrades;

const BODY_LIMIT: usize = 1024 * 1024; // 1MB, safe for tests

fn test_router_with(cfg: EngineConfig) -> (Router, Arc<MemoryAuditSink>) {
    let sink = Arc::new(MemoryAuditSink::default());
    let state = api::AppState::new(
        cfg,
        PublisherGrades::default_seed(),
        sink.clone() as Arc<dyn AuditSink>,
    );
    (api::router(state), sink)
}

fn test_router() -> Router {
    test_router_with(EngineConfig::default()).0
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    payload: Option<Json>,
) -> (StatusCode, Vec<u8>) {
    let builder = Request::builder().method(method).uri(uri);
    let req = match payload {
        Some(p) => builder
            .header("content-type", "application/json")
            .body(Body::from(p.to_string())),
        None => builder.body(Body::empty()),
    }
    .expect("build request");

    let resp = app.clone().oneshot(req).await.expect("oneshot");
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body")
        .to_vec();
    (status, bytes)
}

async fn send_json(
    app: &Router,
    method: &str,
    uri: &str,
    payload: Option<Json>,
) -> (StatusCode, Json) {
    let (status, bytes) = send(app, method, uri, payload).await;
    let v: Json = serde_json::from_slice(&bytes).expect("parse json body");
    (status, v)
}

fn reference_set() -> Json {
    json!([
        { "id": "e1", "category": "flooring", "item_key": "oak-plank", "price_typical": 120.0,
          "reliability_grade": "A", "source_publisher": "RSMeans",
          "captured_at": "2026-10-01T00:00:00Z" },
        { "id": "e2", "category": "flooring", "item_key": "oak-plank", "price_typical": 150.0,
          "reliability_grade": "B", "source_publisher": "Home Depot",
          "captured_at": "2026-10-02T00:00:00Z" },
        { "id": "e3", "category": "flooring", "item_key": "oak-plank", "price_typical": 180.0,
          "reliability_grade": "C", "source_publisher": "Craigslist",
          "captured_at": "2026-10-03T00:00:00Z" }
    ])
}

#[tokio::test]
async fn api_health_returns_200_and_ok_body() {
    let app = test_router();
    let (status, bytes) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK, "health should be 200");
    assert_eq!(String::from_utf8(bytes).expect("utf8").trim(), "OK");
}

#[tokio::test]
async fn api_proposal_reference_set() {
    let (app, sink) = test_router_with(EngineConfig::default());
    let (status, v) = send_json(&app, "POST", "/proposals", Some(reference_set())).await;
    assert_eq!(status, StatusCode::OK, "body: {v}");

    let p = &v["proposal"];
    assert_eq!(p["p25"], 120.0);
    assert_eq!(p["p50"], 150.0);
    assert_eq!(p["p75"], 180.0);
    assert_eq!(p["weighted_mean"], 140.0);
    assert_eq!(p["source_diversity"], 3);
    assert_eq!(p["confidence_score"], 50);
    assert_eq!(p["evidence_count"], 3);
    assert_eq!(v["rejected"].as_array().map(Vec::len), Some(0));

    // One audit entry per generation
    let entries = sink.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].item_key, "oak-plank");
    assert_eq!(entries[0].evidence_ids, vec!["e1", "e2", "e3"]);
}

#[tokio::test]
async fn api_proposal_fills_missing_grade_from_publisher_registry() {
    let app = test_router();
    let payload = json!([
        { "id": "r1", "category": "rent", "item_key": "studio", "price_typical": 1500.0,
          "source_publisher": "CoStar", "captured_at": "2026-10-01T00:00:00Z" },
        { "id": "r2", "category": "rent", "item_key": "studio", "price_typical": 1500.0,
          "source_publisher": "unknown blog", "captured_at": "2026-10-01T00:00:00Z" }
    ]);
    let (status, v) = send_json(&app, "POST", "/proposals", Some(payload)).await;
    assert_eq!(status, StatusCode::OK, "body: {v}");
    // A(3) + C(1) over 2 records → grade part 4/6
    let grade = v["proposal"]["confidence"]["grade_score"].as_f64().unwrap();
    assert!((grade - 4.0 / 6.0).abs() < 1e-9, "grade_score = {grade}");
}

#[tokio::test]
async fn api_proposal_skips_malformed_in_skip_mode() {
    let app = test_router();
    let mut payload = reference_set();
    payload.as_array_mut().unwrap().push(json!({
        "id": "bad", "category": "flooring", "item_key": "oak-plank", "price_typical": -5.0,
        "reliability_grade": "A", "source_publisher": "RSMeans",
        "captured_at": "2026-10-03T00:00:00Z"
    }));

    let (status, v) = send_json(&app, "POST", "/proposals", Some(payload)).await;
    assert_eq!(status, StatusCode::OK, "body: {v}");
    assert_eq!(v["proposal"]["evidence_count"], 3);
    assert_eq!(v["rejected"][0]["id"], "bad");
}

#[tokio::test]
async fn api_proposal_rejects_batch_in_reject_mode() {
    let mut cfg = EngineConfig::default();
    cfg.validation.mode = ValidationMode::Reject;
    let (app, sink) = test_router_with(cfg);

    let mut payload = reference_set();
    payload.as_array_mut().unwrap().push(json!({
        "id": "bad", "category": "flooring", "item_key": "oak-plank",
        "reliability_grade": "A", "source_publisher": "RSMeans",
        "captured_at": "2026-10-03T00:00:00Z"
    }));

    let (status, v) = send_json(&app, "POST", "/proposals", Some(payload)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(v["error"], "malformed_record");
    assert!(sink.entries().is_empty(), "nothing generated, nothing audited");
}

#[tokio::test]
async fn api_proposal_error_kinds_map_to_422() {
    let app = test_router();

    let (status, v) = send_json(&app, "POST", "/proposals", Some(json!([]))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(v["error"], "insufficient_evidence");

    let bad_grade = json!([
        { "id": "x", "category": "flooring", "item_key": "oak-plank", "price_typical": 10.0,
          "reliability_grade": "D", "source_publisher": "RSMeans",
          "captured_at": "2026-10-01T00:00:00Z" }
    ]);
    let (status, v) = send_json(&app, "POST", "/proposals", Some(bad_grade)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(v["error"], "invalid_grade");

    let mixed = json!([
        { "id": "a", "category": "flooring", "item_key": "oak-plank", "price_typical": 10.0,
          "reliability_grade": "A", "source_publisher": "RSMeans",
          "captured_at": "2026-10-01T00:00:00Z" },
        { "id": "b", "category": "flooring", "item_key": "tile", "price_typical": 12.0,
          "reliability_grade": "A", "source_publisher": "RSMeans",
          "captured_at": "2026-10-01T00:00:00Z" }
    ]);
    let (status, v) = send_json(&app, "POST", "/proposals", Some(mixed)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(v["error"], "mixed_evidence");
    assert!(v["message"].as_str().unwrap_or_default().contains("flooring/tile"));
}

#[tokio::test]
async fn api_category_proposals_and_history() {
    let (app, sink) = test_router_with(EngineConfig::default());
    let mut payload = reference_set();
    payload.as_array_mut().unwrap().push(json!({
        "id": "t1", "category": "flooring", "item_key": "tile", "price_typical": 8.5,
        "reliability_grade": "B", "source_publisher": "Floor & Decor",
        "captured_at": "2026-10-03T00:00:00Z"
    }));

    let (status, v) = send_json(&app, "POST", "/proposals/category", Some(payload)).await;
    assert_eq!(status, StatusCode::OK, "body: {v}");
    let items: Vec<&str> = v["proposals"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["item_key"].as_str().unwrap())
        .collect();
    assert_eq!(items, vec!["oak-plank", "tile"]);
    assert_eq!(v["failures"].as_array().map(Vec::len), Some(0));
    assert_eq!(sink.entries().len(), 2);

    let (status, v) = send_json(
        &app,
        "GET",
        "/proposals/history?category=flooring&item=tile",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let rows = v.as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["p50"], 8.5);

    let (_, v) = send_json(&app, "GET", "/proposals/history?category=flooring", None).await;
    assert_eq!(v.as_array().map(Vec::len), Some(2));
}

#[tokio::test]
async fn api_anomaly_detect_and_list() {
    let app = test_router();

    let (status, v) = send_json(
        &app,
        "POST",
        "/anomalies/detect",
        Some(json!({ "item_name": "oak-plank", "previous_price": 100.0, "new_price": 112.0 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "body: {v}");
    assert_eq!(v["event"]["severity"], "moderate");
    assert_eq!(v["event"]["change_direction"], "increased");
    assert!((v["change"]["change_pct"].as_f64().unwrap() - 12.0).abs() < 1e-9);

    // Minor: measured but not reported
    let (_, v) = send_json(
        &app,
        "POST",
        "/anomalies/detect",
        Some(json!({ "item_name": "oak-plank", "previous_price": 100.0, "new_price": 103.0 })),
    )
    .await;
    assert_eq!(v["change"]["severity"], "minor");
    assert!(v["event"].is_null());

    let (status, v) = send_json(
        &app,
        "POST",
        "/anomalies/detect",
        Some(json!({ "item_name": "oak-plank", "previous_price": 0.0, "new_price": 10.0 })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(v["error"], "invalid_price");

    let (_, v) = send_json(&app, "GET", "/anomalies?limit=10", None).await;
    assert_eq!(v.as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn api_source_health_degrades_on_failed_run() {
    let app = test_router();
    let now = chrono::Utc::now();
    let payload = json!({
        "sources": [
            { "id": "s1", "name": "RSMeans feed", "source_type": "api", "is_active": true,
              "reliability_default": "A", "last_successful_capture_at": now.to_rfc3339() },
            { "id": "s2", "name": "Craigslist", "source_type": "scraper", "is_active": true,
              "reliability_default": "C", "consecutive_failures": 5 }
        ],
        "latest_run": { "id": "run-9", "started_at": now.to_rfc3339(), "status": "failed" }
    });

    let (status, v) = send_json(&app, "POST", "/sources/health", Some(payload)).await;
    assert_eq!(status, StatusCode::OK, "body: {v}");
    assert_eq!(v["total_sources"], 2);
    assert_eq!(v["active_sources"], 1);
    assert_eq!(v["disabled_sources"], 1);
    assert_eq!(v["level"], "degraded");
    assert_eq!(v["sources"][1]["freshness_level"], "unknown");
}

#[tokio::test]
async fn api_coverage_gaps_use_config_defaults() {
    let app = test_router();
    let payload = json!({
        "categories": {
            "flooring": { "count": 12, "avg_age_days": 4.0 },
            "roofing": { "count": 2, "avg_age_days": 3.0 },
            "rent": { "count": 40, "avg_age_days": 45.0 }
        }
    });
    let (status, v) = send_json(&app, "POST", "/coverage/gaps", Some(payload)).await;
    assert_eq!(status, StatusCode::OK, "body: {v}");
    let cats: Vec<&str> = v
        .as_array()
        .unwrap()
        .iter()
        .map(|g| g["category"].as_str().unwrap())
        .collect();
    assert_eq!(cats, vec!["rent", "roofing"]);
}

#[tokio::test]
async fn api_report_composes_sections() {
    let app = test_router();
    let now = chrono::Utc::now();
    let payload = json!({
        "sources": [
            { "id": "s1", "name": "RSMeans feed", "source_type": "api", "is_active": true,
              "reliability_default": "A", "last_successful_capture_at": now.to_rfc3339() }
        ],
        "evidence": reference_set(),
        "expected_categories": ["flooring", "plumbing"],
        "anomalies": [
            { "item_name": "oak-plank", "previous_price": 100.0, "new_price": 140.0,
              "change_pct": 40.0,
              "change_direction": "increased", "severity": "significant",
              "detected_at": now.to_rfc3339() },
            { "item_name": "tile", "previous_price": 10.0, "new_price": 10.2, "change_pct": 2.0,
              "change_direction": "increased", "severity": "minor",
              "detected_at": now.to_rfc3339() }
        ]
    });

    let (status, v) = send_json(&app, "POST", "/report", Some(payload)).await;
    assert_eq!(status, StatusCode::OK, "body: {v}");
    assert_eq!(v["level"], "healthy");
    assert_eq!(v["categories"].as_array().map(Vec::len), Some(2));
    // flooring has 3 < 5 records, plumbing has none
    assert_eq!(v["coverage_gaps"].as_array().map(Vec::len), Some(2));
    assert_eq!(v["alerts"].as_array().map(Vec::len), Some(1));
    assert_eq!(v["alerts"][0]["item_name"], "oak-plank");
}

#[tokio::test]
async fn metrics_endpoint_contains_expected_series() {
    let app = test_router();
    let (status, _) = send(&app, "POST", "/proposals", Some(reference_set())).await;
    assert_eq!(status, StatusCode::OK);

    let (status, bytes) = send(&app, "GET", "/metrics", None).await;
    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(bytes).expect("utf8");
    for needle in [
        "engine_proposals_generated_total",
        "engine_proposal_confidence",
    ] {
        assert!(text.contains(needle), "metrics should contain `{needle}`:\n{text}");
    }
}

#[tokio::test]
async fn api_report_screens_malformed_evidence() {
    let mut evidence = reference_set();
    evidence.as_array_mut().unwrap().push(json!({
        "id": "neg", "category": "roofing", "item_key": "shingle", "price_typical": -3.0,
        "reliability_grade": "B", "source_publisher": "Lowes", "captured_at": "2026-10-03T00:00:00Z"
    }));
    let payload = json!({ "sources": [], "evidence": evidence });

    // Skip: the bad record never reaches category stats
    let app = test_router();
    let (status, v) = send_json(&app, "POST", "/report", Some(payload.clone())).await;
    assert_eq!(status, StatusCode::OK, "body: {v}");
    let cats: Vec<&str> = v["categories"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["category"].as_str().unwrap())
        .collect();
    assert_eq!(cats, vec!["flooring"]);

    // Reject: the whole request fails
    let mut cfg = EngineConfig::default();
    cfg.validation.mode = ValidationMode::Reject;
    let (app, _) = test_router_with(cfg);
    let (status, v) = send_json(&app, "POST", "/report", Some(payload)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(v["error"], "malformed_record");
}

#[tokio::test]
async fn api_category_proposals_refuse_two_categories() {
    let app = test_router();
    let mut payload = reference_set();
    payload.as_array_mut().unwrap().push(json!({
        "id": "s1", "category": "roofing", "item_key": "shingle", "price_typical": 35.0,
        "reliability_grade": "B", "source_publisher": "Lowes", "captured_at": "2026-10-03T00:00:00Z"
    }));

    let (status, v) = send_json(&app, "POST", "/proposals/category", Some(payload)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(v["error"], "mixed_evidence");
}
