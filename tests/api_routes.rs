//! HTTP-level tests for the aggregator's API surface, driven in-process
//! through the router.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::Request;
use axum::http::StatusCode;
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use audit_aggregator::{
    app_state::AppState, auditweb::build_router, config_loader::AggregatorConfig,
    scheduler::run_scheduled_report,
};

fn build_app(max_entries: usize) -> (Router, Arc<AppState>) {
    let config = AggregatorConfig {
        max_entries,
        ..AggregatorConfig::default()
    };
    let state = Arc::new(AppState::new(config));
    (build_router(state.clone()), state)
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn ingest_assigns_id_and_retention() {
    let (app, state) = build_app(100);

    let (status, body) = send(
        &app,
        post_json(
            "/api/v1/audit-entries",
            &json!({
                "event_type": "phi_access",
                "service_name": "records-service",
                "user_id": "nurse-1",
                "phi_accessed": true
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "stored");
    let audit_id = body["audit_id"].as_str().unwrap();
    assert!(!audit_id.is_empty());

    let stored = state
        .store
        .query(&Default::default(), 1)
        .unwrap()
        .pop()
        .unwrap();
    assert_eq!(stored.audit_id, audit_id);
    assert_eq!(stored.retention_policy, "phi_7_years");
    assert!(stored.has_timestamp());
}

#[tokio::test]
async fn duplicate_ids_are_kept_as_separate_rows() {
    let (app, state) = build_app(100);
    let entry = json!({"audit_id": "dup-1", "event_type": "api_access", "service_name": "gw"});

    for _ in 0..2 {
        let (status, body) = send(&app, post_json("/api/v1/audit-entries", &entry)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["audit_id"], "dup-1");
    }
    assert_eq!(state.store.len().unwrap(), 2);
}

#[tokio::test]
async fn malformed_entry_is_rejected_without_side_effects() {
    let (app, state) = build_app(100);

    let bad_json = Request::builder()
        .method("POST")
        .uri("/api/v1/audit-entries")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, body) = send(&app, bad_json).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().is_some());

    let (status, body) = send(
        &app,
        post_json("/api/v1/audit-entries", &json!({"service_name": "gw"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("event_type"));

    assert_eq!(state.store.len().unwrap(), 0);
}

#[tokio::test]
async fn phi_only_query_returns_only_phi_entries() {
    let (app, _state) = build_app(100);
    let entries = [
        json!({"event_type": "phi_access", "service_name": "records", "phi_accessed": true}),
        json!({"event_type": "user_login", "service_name": "portal"}),
        json!({"event_type": "data_export", "service_name": "records", "phi_accessed": true}),
        json!({"event_type": "api_access", "service_name": "gw"}),
    ];
    for entry in &entries {
        let (status, _) = send(&app, post_json("/api/v1/audit-entries", entry)).await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, body) = send(&app, get("/api/v1/audit-entries?phi_only=true")).await;
    assert_eq!(status, StatusCode::OK);
    let rows = body["entries"].as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r["phi_accessed"] == true));
    assert_eq!(body["filtered"], 2);
    assert_eq!(body["total"], 4);
    assert_eq!(body["limit"], 100);

    // newest first
    assert_eq!(rows[0]["event_type"], "data_export");
}

#[tokio::test]
async fn query_filters_and_clamps_limit() {
    let (app, _state) = build_app(100);
    for user in ["u1", "u2", "u1"] {
        send(
            &app,
            post_json(
                "/api/v1/audit-entries",
                &json!({"event_type": "login", "service_name": "portal", "user_id": user, "log_level": "warn"}),
            ),
        )
        .await;
    }

    let (_, body) = send(&app, get("/api/v1/audit-entries?user_id=u1&level=warning")).await;
    assert_eq!(body["filtered"], 2);
    assert_eq!(body["entries"][0]["event_type"], "user_login");

    let (_, body) = send(&app, get("/api/v1/audit-entries?limit=1")).await;
    assert_eq!(body["filtered"], 1);

    let (_, body) = send(&app, get("/api/v1/audit-entries?limit=99999")).await;
    assert_eq!(body["limit"], 1000);

    let (status, body) = send(&app, get("/api/v1/audit-entries?event_type=teleport")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["filtered"], 0);
    assert_eq!(body["total"], 3);
}

#[tokio::test]
async fn register_and_list_services() {
    let (app, state) = build_app(100);

    let (status, body) = send(
        &app,
        post_json(
            "/api/v1/services/register",
            &json!({"service_name": "svc-x", "service_url": "http://svc-x:8080", "version": "1.2.0"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "active");
    assert_eq!(body["health_check_path"], "/health");
    assert!(body["last_seen"].as_str().is_some());

    let (status, body) = send(&app, get("/api/v1/services")).await;
    assert_eq!(status, StatusCode::OK);
    let services = body.as_array().unwrap();
    assert_eq!(services.len(), 1);
    assert_eq!(services[0]["service_name"], "svc-x");

    // the registration itself is audited
    let (_, body) = send(&app, get("/api/v1/audit-entries?event_type=service_start")).await;
    assert_eq!(body["filtered"], 1);
    assert_eq!(body["entries"][0]["service_name"], state.config.service_name);

    let (status, _) = send(
        &app,
        post_json("/api/v1/services/register", &json!({"service_name": "", "service_url": "http://x"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        post_json("/api/v1/services/register", &json!({"service_url": "http://x"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn aggregation_report_reflects_recent_entries() {
    let (app, state) = build_app(100);
    let entries = [
        json!({"event_type": "compliance_violation", "service_name": "portal", "user_id": "u1",
               "log_level": "critical", "phi_accessed": true}),
        json!({"event_type": "phi_access", "service_name": "records", "user_id": "u2",
               "phi_accessed": true, "event": {"success": false, "error_message": "denied"}}),
        json!({"event_type": "user_login", "service_name": "portal", "user_id": "u3"}),
    ];
    for entry in &entries {
        send(&app, post_json("/api/v1/audit-entries", entry)).await;
    }

    let (status, body) = send(&app, get("/api/v1/reports/aggregation?type=daily")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["report_period"]["window"], "daily");
    assert_eq!(body["total_events"], 3);
    assert_eq!(body["phi_access_events"], 2);
    assert_eq!(body["security_events"], 1);
    assert!(body["compliance_score"].as_f64().unwrap() < 80.0);
    assert!(!body["recommendations"].as_array().unwrap().is_empty());

    let (_, body) = send(&app, get("/api/v1/reports/aggregation?type=fortnightly")).await;
    assert_eq!(body["report_period"]["window"], "hourly");

    // on-demand reports are not stored
    assert_eq!(state.reports.len().unwrap(), 0);
}

#[tokio::test]
async fn recent_reports_returns_tail_of_history() {
    let (app, state) = build_app(100);
    for _ in 0..3 {
        run_scheduled_report(&state).unwrap();
    }

    let (status, body) = send(&app, get("/api/v1/reports/recent?limit=2")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 2);

    let (_, body) = send(&app, get("/api/v1/reports/recent")).await;
    assert_eq!(body.as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn health_warns_when_store_nearly_full() {
    let (app, _state) = build_app(10);

    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["entries"]["capacity"], 10);

    for _ in 0..10 {
        send(
            &app,
            post_json("/api/v1/audit-entries", &json!({"event_type": "api_access", "service_name": "gw"})),
        )
        .await;
    }

    let (status, body) = send(&app, get("/api/v1/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "warning_high_entries");
    assert_eq!(body["entries"]["count"], 10);
}

#[tokio::test]
async fn overflow_evicts_down_to_ninety_percent() {
    let (app, state) = build_app(10);
    for i in 0..11 {
        send(
            &app,
            post_json(
                "/api/v1/audit-entries",
                &json!({"audit_id": format!("e-{i}"), "event_type": "api_access", "service_name": "gw"}),
            ),
        )
        .await;
    }

    assert_eq!(state.store.len().unwrap(), 9);
    let (_, body) = send(&app, get("/api/v1/audit-entries")).await;
    assert_eq!(body["entries"][0]["audit_id"], "e-10");
    assert_eq!(body["entries"][8]["audit_id"], "e-2");
}
