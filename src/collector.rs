//! Pull-based audit collection from registered upstream services
//!
//! Collection never changes an upstream's health status: a slow or broken
//! audit endpoint is recorded against the audit service itself and the
//! health poller stays the only authority on upstream health.

use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde::Serialize;
use tokio::task::JoinSet;

use crate::audit::{AuditEntry, LogLevel};
use crate::audit_adapters::PayloadDecoder;
use crate::audit_store::AuditStore;
use crate::errors::{AuditError, AuditResult};
use crate::service_registry::{poller_entry, ServiceRegistration, ServiceRegistry};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionOutcome {
    pub service_name: String,
    pub collected: usize,
    pub format: Option<&'static str>,
    pub error: Option<String>,
}

impl CollectionOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

pub struct Collector {
    registry: Arc<ServiceRegistry>,
    store: Arc<dyn AuditStore>,
    client: reqwest::Client,
    decoder: Arc<PayloadDecoder>,
}

impl Collector {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        store: Arc<dyn AuditStore>,
        timeout: Duration,
        decoder: PayloadDecoder,
    ) -> AuditResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuditError::network("building collection client", e))?;
        tracing::debug!(formats = ?decoder.formats(), "collector accepts payload formats");
        Ok(Self {
            registry,
            store,
            client,
            decoder: Arc::new(decoder),
        })
    }

    /// Pulls from every target once. Fetching and decoding run concurrently
    /// and lock-free; entries are appended afterwards.
    pub async fn collect_once(&self) -> AuditResult<Vec<CollectionOutcome>> {
        let targets = self.registry.poll_targets()?;

        let mut pulls = JoinSet::new();
        for target in targets {
            let client = self.client.clone();
            let decoder = Arc::clone(&self.decoder);
            pulls.spawn(async move {
                let result = pull_service(&client, &decoder, &target).await;
                (target.service_name, result)
            });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = pulls.join_next().await {
            let (service_name, result) = match joined {
                Ok(pulled) => pulled,
                Err(e) => {
                    tracing::error!(error = %e, "collection task failed");
                    continue;
                }
            };
            outcomes.push(self.record(service_name, result)?);
        }
        outcomes.sort_by(|a, b| a.service_name.cmp(&b.service_name));
        Ok(outcomes)
    }

    fn record(
        &self,
        service_name: String,
        result: AuditResult<(&'static str, Vec<AuditEntry>)>,
    ) -> AuditResult<CollectionOutcome> {
        match result {
            Ok((format, entries)) => {
                let collected = entries.len();
                for entry in entries {
                    self.store.append(entry)?;
                }
                self.registry.touch(&service_name)?;
                tracing::debug!(service = %service_name, collected, format, "collected audit entries");
                Ok(CollectionOutcome {
                    service_name,
                    collected,
                    format: Some(format),
                    error: None,
                })
            }
            Err(e) => {
                let reason = e.to_string();
                tracing::warn!(service = %service_name, error = %reason, "audit collection failed");
                let entry = poller_entry(
                    self.registry.self_name(),
                    "audit_collection",
                    &service_name,
                    LogLevel::Warning,
                    format!("Audit collection from {service_name} failed: {reason}"),
                )
                .with_tag("collector")
                .with_failure(reason.clone());
                self.store.append(entry)?;
                Ok(CollectionOutcome {
                    service_name,
                    collected: 0,
                    format: None,
                    error: Some(reason),
                })
            }
        }
    }
}

async fn pull_service(
    client: &reqwest::Client,
    decoder: &PayloadDecoder,
    target: &ServiceRegistration,
) -> AuditResult<(&'static str, Vec<AuditEntry>)> {
    let response = client
        .get(target.audit_url())
        .send()
        .await
        .map_err(|e| AuditError::network(format!("pulling audit entries from {}", target.service_name), e))?;

    let status = response.status();
    if status != StatusCode::OK {
        return Err(AuditError::upstream_status(&target.service_name, status.as_u16()));
    }

    let body = response
        .bytes()
        .await
        .map_err(|e| AuditError::network(format!("reading audit payload from {}", target.service_name), e))?;
    let batch = decoder.decode(&target.service_name, &body)?;
    Ok((batch.format, batch.entries))
}
