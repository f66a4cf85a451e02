use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::{
    aggregation::{AggregationEngine, ReportHistory},
    audit::{AuditEntry, EventType},
    audit_store::{AuditStore, MemoryAuditStore},
    config_loader::AggregatorConfig,
    errors::AuditResult,
    service_registry::{ServiceRegistration, ServiceRegistry},
};

/// Shared state handed to every handler and background worker.
pub struct AppState {
    pub config: AggregatorConfig,
    pub store: Arc<dyn AuditStore>,
    pub registry: Arc<ServiceRegistry>,
    pub engine: AggregationEngine,
    pub reports: ReportHistory,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(config: AggregatorConfig) -> Self {
        let store: Arc<dyn AuditStore> = Arc::new(MemoryAuditStore::new(config.max_entries));
        Self::with_store(config, store)
    }

    pub fn with_store(config: AggregatorConfig, store: Arc<dyn AuditStore>) -> Self {
        let registry = Arc::new(ServiceRegistry::new(store.clone(), &config.service_name));
        let engine = AggregationEngine::new(store.clone(), registry.clone());
        let reports = ReportHistory::new(config.report_history_limit);
        Self {
            config,
            store,
            registry,
            engine,
            reports,
            started_at: Utc::now(),
        }
    }

    pub fn self_registration(&self) -> ServiceRegistration {
        let mut registration =
            ServiceRegistration::new(&self.config.service_name, &self.config.advertised_url());
        registration.version = self.config.service_version.clone();
        registration
    }

    /// Registers the aggregator under its own name so the pollers skip it.
    pub fn register_self(&self) -> AuditResult<ServiceRegistration> {
        self.registry.register(self.self_registration())
    }

    /// Records a `service_start`/`service_stop` entry for this process.
    pub fn record_lifecycle(&self, event_type: EventType) -> AuditResult<AuditEntry> {
        let (action, verb) = match event_type {
            EventType::ServiceStop => ("shutdown", "stopping"),
            _ => ("startup", "started"),
        };
        let entry = AuditEntry::new(event_type, &self.config.service_name, action)
            .with_resource(self.config.service_name.clone(), "service")
            .with_description(format!(
                "{} {verb} (version {})",
                self.config.service_name, self.config.service_version
            ))
            .with_tag("lifecycle")
            .with_metadata("version", self.config.service_version.clone())
            .with_metadata("bind_addr", self.config.bind_addr());
        self.store.append(entry)
    }
}
