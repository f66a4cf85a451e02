use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::{api_errors::AppError, app_state::AppState};

/// Occupancy above which health reports `warning_high_entries`.
pub const HIGH_OCCUPANCY: f64 = 0.9;

#[derive(Serialize)]
pub struct EntryStats {
    count: usize,
    capacity: usize,
    occupancy: f64,
}

#[derive(Serialize)]
pub struct HealthResp {
    status: &'static str,
    service: String,
    version: String,
    timestamp: DateTime<Utc>,
    started_at: DateTime<Utc>,
    entries: EntryStats,
    services: usize,
    reports: usize,
}

pub fn health_status(count: usize, capacity: usize) -> &'static str {
    if count as f64 > capacity as f64 * HIGH_OCCUPANCY {
        "warning_high_entries"
    } else {
        "healthy"
    }
}

pub async fn health(State(st): State<Arc<AppState>>) -> Result<Json<HealthResp>, AppError> {
    let count = st.store.len()?;
    let capacity = st.store.capacity();

    Ok(Json(HealthResp {
        status: health_status(count, capacity),
        service: st.config.service_name.clone(),
        version: st.config.service_version.clone(),
        timestamp: Utc::now(),
        started_at: st.started_at,
        entries: EntryStats {
            count,
            capacity,
            occupancy: if capacity == 0 {
                0.0
            } else {
                count as f64 / capacity as f64
            },
        },
        services: st.registry.len()?,
        reports: st.reports.len()?,
    }))
}
