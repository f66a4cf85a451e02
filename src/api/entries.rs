use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::{
    api_errors::AppError,
    app_state::AppState,
    audit::{AuditEntry, EventType, LogLevel},
    audit_store::EntryFilter,
};

pub const DEFAULT_QUERY_LIMIT: usize = 100;
pub const MAX_QUERY_LIMIT: usize = 1000;

#[derive(Serialize)]
pub struct IngestResp {
    audit_id: String,
    status: &'static str,
    timestamp: DateTime<Utc>,
}

pub async fn ingest_entry(
    State(st): State<Arc<AppState>>,
    payload: Result<Json<AuditEntry>, JsonRejection>,
) -> Result<(StatusCode, Json<IngestResp>), AppError> {
    let Json(entry) = payload?;
    let stored = st.store.append(entry)?;

    tracing::debug!(
        audit_id = %stored.audit_id,
        service = %stored.service_name,
        event_type = %stored.event_type,
        "audit entry ingested"
    );

    Ok((
        StatusCode::CREATED,
        Json(IngestResp {
            audit_id: stored.audit_id,
            status: "stored",
            timestamp: stored.timestamp,
        }),
    ))
}

/// Raw query string; values are parsed leniently so a bad filter narrows the
/// result instead of failing the request.
#[derive(Debug, Default, Deserialize)]
pub struct EntryQuery {
    service: Option<String>,
    event_type: Option<String>,
    user_id: Option<String>,
    level: Option<String>,
    phi_only: Option<String>,
    limit: Option<String>,
}

impl EntryQuery {
    fn limit(&self) -> usize {
        self.limit
            .as_deref()
            .and_then(|l| l.trim().parse::<usize>().ok())
            .filter(|l| *l > 0)
            .unwrap_or(DEFAULT_QUERY_LIMIT)
            .min(MAX_QUERY_LIMIT)
    }

    /// `None` when a filter value can never match any entry.
    fn filter(&self) -> Option<EntryFilter> {
        let event_type = match non_empty(&self.event_type) {
            Some(raw) => Some(raw.parse::<EventType>().ok()?),
            None => None,
        };
        let log_level = match non_empty(&self.level) {
            Some(raw) => Some(raw.parse::<LogLevel>().ok()?),
            None => None,
        };
        let phi_only = non_empty(&self.phi_only)
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "true" | "1" | "yes"))
            .unwrap_or(false);

        Some(EntryFilter {
            service_name: non_empty(&self.service).map(str::to_string),
            event_type,
            user_id: non_empty(&self.user_id).map(str::to_string),
            log_level,
            phi_only,
        })
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

#[derive(Serialize)]
pub struct QueryResp {
    entries: Vec<AuditEntry>,
    total: usize,
    filtered: usize,
    limit: usize,
}

pub async fn query_entries(
    State(st): State<Arc<AppState>>,
    query: Result<Query<EntryQuery>, QueryRejection>,
) -> Result<Json<QueryResp>, AppError> {
    let Query(query) = query?;
    let limit = query.limit();

    let entries = match query.filter() {
        Some(filter) => st.store.query(&filter, limit)?,
        None => Vec::new(),
    };

    Ok(Json(QueryResp {
        filtered: entries.len(),
        total: st.store.len()?,
        entries,
        limit,
    }))
}
