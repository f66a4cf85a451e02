use axum::{
    extract::{rejection::QueryRejection, Query, State},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::{
    aggregation::{AggregationReport, ReportWindow},
    api_errors::AppError,
    app_state::AppState,
};

pub const DEFAULT_RECENT_LIMIT: usize = 10;
pub const MAX_RECENT_LIMIT: usize = 50;

#[derive(Debug, Default, Deserialize)]
pub struct ReportQuery {
    #[serde(rename = "type")]
    window: Option<String>,
}

/// Computes a fresh report; it is returned but not added to the history.
pub async fn aggregation_report(
    State(st): State<Arc<AppState>>,
    query: Result<Query<ReportQuery>, QueryRejection>,
) -> Result<Json<AggregationReport>, AppError> {
    let Query(query) = query?;
    let window = query
        .window
        .as_deref()
        .and_then(|w| w.parse::<ReportWindow>().ok())
        .unwrap_or_default();
    Ok(Json(st.engine.generate_report(window)?))
}

#[derive(Debug, Default, Deserialize)]
pub struct RecentQuery {
    limit: Option<String>,
}

pub async fn recent_reports(
    State(st): State<Arc<AppState>>,
    query: Result<Query<RecentQuery>, QueryRejection>,
) -> Result<Json<Vec<AggregationReport>>, AppError> {
    let Query(query) = query?;
    let limit = query
        .limit
        .as_deref()
        .and_then(|l| l.trim().parse::<usize>().ok())
        .unwrap_or(DEFAULT_RECENT_LIMIT)
        .min(MAX_RECENT_LIMIT);
    Ok(Json(st.reports.recent(limit)?))
}
