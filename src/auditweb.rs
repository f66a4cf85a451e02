use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    api::{
        entries::{ingest_entry, query_entries},
        health::health,
        reports::{aggregation_report, recent_reports},
        services::{list_services, register_service},
    },
    app_state::AppState,
};

/// Build the router exposing ingestion, query, registry, report and health endpoints
pub fn build_router(app_state: Arc<AppState>) -> Router {
    Router::new()
        // health endpoints
        .route("/health", get(health))
        .route("/api/v1/health", get(health))
        // audit entries
        .route(
            "/api/v1/audit-entries",
            post(ingest_entry).get(query_entries),
        )
        // service registry
        .route("/api/v1/services/register", post(register_service))
        .route("/api/v1/services", get(list_services))
        // reports
        .route("/api/v1/reports/aggregation", get(aggregation_report))
        .route("/api/v1/reports/recent", get(recent_reports))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(app_state)
}
