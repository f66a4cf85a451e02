//! Periodic health checks against registered upstream services
//!
//! The target list is copied out of the registry up front; every HTTP call
//! runs without any lock held, and each verdict re-enters the registry only
//! for the status write.

use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde::Serialize;
use tokio::task::JoinSet;

use crate::audit::LogLevel;
use crate::audit_store::AuditStore;
use crate::errors::{AuditError, AuditResult};
use crate::service_registry::{poller_entry, ServiceRegistration, ServiceRegistry, ServiceStatus};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthCheckOutcome {
    pub service_name: String,
    pub status: ServiceStatus,
    pub detail: String,
}

pub struct HealthPoller {
    registry: Arc<ServiceRegistry>,
    store: Arc<dyn AuditStore>,
    client: reqwest::Client,
}

impl HealthPoller {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        store: Arc<dyn AuditStore>,
        timeout: Duration,
    ) -> AuditResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuditError::network("building health check client", e))?;
        Ok(Self {
            registry,
            store,
            client,
        })
    }

    /// Checks every target once, concurrently, and records each verdict.
    pub async fn poll_once(&self) -> AuditResult<Vec<HealthCheckOutcome>> {
        let targets = self.registry.poll_targets()?;

        let mut checks = JoinSet::new();
        for target in targets {
            let client = self.client.clone();
            checks.spawn(async move { check_service(&client, &target).await });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = checks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => tracing::error!(error = %e, "health check task failed"),
            }
        }
        outcomes.sort_by(|a, b| a.service_name.cmp(&b.service_name));

        for outcome in &outcomes {
            self.record(outcome)?;
        }
        Ok(outcomes)
    }

    fn record(&self, outcome: &HealthCheckOutcome) -> AuditResult<()> {
        let previous = self
            .registry
            .update_status(&outcome.service_name, outcome.status)?;

        let healthy = outcome.status == ServiceStatus::Active;
        let (level, description) = if healthy {
            (
                LogLevel::Debug,
                format!("Health check passed for {}", outcome.service_name),
            )
        } else {
            (
                LogLevel::Warning,
                format!(
                    "Health check failed for {}: {}",
                    outcome.service_name, outcome.detail
                ),
            )
        };

        let mut entry = poller_entry(
            self.registry.self_name(),
            "health_check",
            &outcome.service_name,
            level,
            description,
        )
        .with_tag("health_check")
        .with_metadata("status", outcome.status.to_string())
        .with_metadata("detail", outcome.detail.clone());
        if !healthy {
            entry = entry.with_failure(outcome.detail.clone());
        }
        self.store.append(entry)?;

        if previous.is_some_and(|p| p != outcome.status) {
            tracing::warn!(
                service = %outcome.service_name,
                from = %previous.unwrap_or_default(),
                to = %outcome.status,
                "service status changed"
            );
        } else if !healthy {
            tracing::debug!(service = %outcome.service_name, detail = %outcome.detail, "service still unhealthy");
        }
        Ok(())
    }
}

async fn check_service(client: &reqwest::Client, target: &ServiceRegistration) -> HealthCheckOutcome {
    let (status, detail) = match client.get(target.health_url()).send().await {
        Ok(response) if response.status() == StatusCode::OK => {
            (ServiceStatus::Active, "HTTP 200".to_string())
        }
        Ok(response) => (
            ServiceStatus::Unhealthy,
            format!("HTTP {}", response.status().as_u16()),
        ),
        Err(e) => (ServiceStatus::Error, format!("request failed: {e}")),
    };
    HealthCheckOutcome {
        service_name: target.service_name.clone(),
        status,
        detail,
    }
}
