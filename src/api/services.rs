use axum::{extract::rejection::JsonRejection, extract::State, http::StatusCode, Json};
use std::sync::Arc;

use crate::{api_errors::AppError, app_state::AppState, service_registry::ServiceRegistration};

pub async fn register_service(
    State(st): State<Arc<AppState>>,
    payload: Result<Json<ServiceRegistration>, JsonRejection>,
) -> Result<(StatusCode, Json<ServiceRegistration>), AppError> {
    let Json(registration) = payload?;
    if registration.service_name.trim().is_empty() {
        return Err(AppError::bad_request("service_name must not be empty"));
    }
    if registration.service_url.trim().is_empty() {
        return Err(AppError::bad_request("service_url must not be empty"));
    }

    let stored = st.registry.register(registration)?;
    Ok((StatusCode::CREATED, Json(stored)))
}

pub async fn list_services(
    State(st): State<Arc<AppState>>,
) -> Result<Json<Vec<ServiceRegistration>>, AppError> {
    Ok(Json(st.registry.list_services()?))
}
