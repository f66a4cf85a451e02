use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::audit::{AuditEntry, EventType, LogLevel};
use crate::audit_store::AuditStore;
use crate::errors::{AuditResult, SafeLock};

const REGISTRY_RESOURCE: &str = "service_registry";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    #[default]
    Active,
    Unhealthy,
    Error,
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ServiceStatus::Active => "active",
            ServiceStatus::Unhealthy => "unhealthy",
            ServiceStatus::Error => "error",
        })
    }
}

fn default_health_path() -> String {
    "/health".to_string()
}

fn default_audit_path() -> String {
    "/api/v1/audit-logs".to_string()
}

/// One known audit-emitting service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRegistration {
    pub service_name: String,
    pub service_url: String,
    #[serde(default = "default_health_path")]
    pub health_check_path: String,
    #[serde(default = "default_audit_path")]
    pub audit_endpoint_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: ServiceStatus,
    #[serde(default)]
    pub version: String,
}

impl ServiceRegistration {
    pub fn new(service_name: &str, service_url: &str) -> Self {
        Self {
            service_name: service_name.to_string(),
            service_url: service_url.to_string(),
            health_check_path: default_health_path(),
            audit_endpoint_path: default_audit_path(),
            last_seen: None,
            status: ServiceStatus::Active,
            version: String::new(),
        }
    }

    pub fn health_url(&self) -> String {
        join_url(&self.service_url, &self.health_check_path)
    }

    pub fn audit_url(&self) -> String {
        join_url(&self.service_url, &self.audit_endpoint_path)
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Registry of upstream services, keyed by service name.
///
/// Management actions are recorded into the entry store under the audit
/// service's own name. The map lock is never held while the store is written
/// or while callers iterate: readers get copies.
pub struct ServiceRegistry {
    services: Mutex<HashMap<String, ServiceRegistration>>,
    store: Arc<dyn AuditStore>,
    self_name: String,
}

impl ServiceRegistry {
    pub fn new(store: Arc<dyn AuditStore>, self_name: &str) -> Self {
        Self {
            services: Mutex::new(HashMap::new()),
            store,
            self_name: self_name.to_string(),
        }
    }

    pub fn self_name(&self) -> &str {
        &self.self_name
    }

    /// Upserts by name, stamps `last_seen` and records a `service_start` entry.
    pub fn register(&self, mut registration: ServiceRegistration) -> AuditResult<ServiceRegistration> {
        let now = Utc::now();
        registration.last_seen = Some(now);

        let previous = {
            let mut services = self.services.safe_lock(REGISTRY_RESOURCE)?;
            services.insert(registration.service_name.clone(), registration.clone())
        };

        let verb = if previous.is_some() { "updated" } else { "registered" };
        let entry = AuditEntry::new(EventType::ServiceStart, &self.self_name, "service_registration")
            .with_resource(registration.service_name.clone(), "service")
            .with_description(format!(
                "Service {} {verb} at {}",
                registration.service_name, registration.service_url
            ))
            .with_tag("service_registry")
            .with_metadata("registered_service", registration.service_name.clone())
            .with_metadata("service_url", registration.service_url.clone())
            .with_metadata("version", registration.version.clone());
        self.store.append(entry)?;

        tracing::info!(
            service = %registration.service_name,
            url = %registration.service_url,
            "service {verb}"
        );
        Ok(registration)
    }

    /// Snapshot of every registration, sorted by name.
    pub fn list_services(&self) -> AuditResult<Vec<ServiceRegistration>> {
        let mut services: Vec<ServiceRegistration> = self
            .services
            .safe_lock(REGISTRY_RESOURCE)?
            .values()
            .cloned()
            .collect();
        services.sort_by(|a, b| a.service_name.cmp(&b.service_name));
        Ok(services)
    }

    /// Registrations the pollers should contact: everything but ourselves.
    pub fn poll_targets(&self) -> AuditResult<Vec<ServiceRegistration>> {
        Ok(self
            .list_services()?
            .into_iter()
            .filter(|s| s.service_name != self.self_name)
            .collect())
    }

    /// Records a health verdict. Returns the previous status, or `None` when
    /// the service was removed from the registry in the meantime.
    pub fn update_status(
        &self,
        service_name: &str,
        status: ServiceStatus,
    ) -> AuditResult<Option<ServiceStatus>> {
        let mut services = self.services.safe_lock(REGISTRY_RESOURCE)?;
        Ok(services.get_mut(service_name).map(|service| {
            let previous = service.status;
            service.status = status;
            if status == ServiceStatus::Active {
                service.last_seen = Some(Utc::now());
            }
            previous
        }))
    }

    /// Marks a service as seen without touching its health status.
    pub fn touch(&self, service_name: &str) -> AuditResult<()> {
        let mut services = self.services.safe_lock(REGISTRY_RESOURCE)?;
        if let Some(service) = services.get_mut(service_name) {
            service.last_seen = Some(Utc::now());
        }
        Ok(())
    }

    pub fn len(&self) -> AuditResult<usize> {
        Ok(self.services.safe_lock(REGISTRY_RESOURCE)?.len())
    }

    pub fn is_empty(&self) -> AuditResult<bool> {
        Ok(self.len()? == 0)
    }
}

/// Failure entries written by the pollers against the audit service itself.
pub(crate) fn poller_entry(
    self_name: &str,
    action: &str,
    target: &str,
    level: LogLevel,
    description: String,
) -> AuditEntry {
    AuditEntry::new(EventType::SystemConfig, self_name, action)
        .with_severity(level)
        .with_resource(target.to_string(), "service")
        .with_description(description)
        .with_metadata("target_service", target.to_string())
}
