//! Decoders for the audit payload shapes upstream services expose
//!
//! The canonical `{entries, total}` batch is always tried first; foreign
//! shapes are handled by [`AuditFormatAdapter`] implementations tried in
//! registration order. Adding a format means adding an adapter, not touching
//! the collector loop.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::audit::{AuditEntry, AuditEventDetail, DataSensitivity, EventType, LogLevel};
use crate::errors::{AuditError, AuditResult};

/// Risk scores at or above this are treated as high risk.
pub const HIGH_RISK_SCORE: u32 = 70;
pub const CRITICAL_RISK_SCORE: u32 = 85;
pub const MEDIUM_RISK_SCORE: u32 = 40;

/// Maps one foreign payload shape into canonical entries.
pub trait AuditFormatAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    /// `Err` means the body is not in this adapter's shape.
    fn decode(&self, service_name: &str, body: &[u8]) -> AuditResult<Vec<AuditEntry>>;
}

/// Canonical batch served by services that speak the native schema.
#[derive(Debug, Deserialize)]
pub struct AuditBatch {
    pub entries: Vec<AuditEntry>,
    #[serde(default)]
    pub total: Option<usize>,
}

pub struct CanonicalAdapter;

impl AuditFormatAdapter for CanonicalAdapter {
    fn name(&self) -> &'static str {
        "canonical"
    }

    fn decode(&self, service_name: &str, body: &[u8]) -> AuditResult<Vec<AuditEntry>> {
        let batch: AuditBatch = serde_json::from_slice(body)
            .map_err(|e| AuditError::decode(service_name, e.to_string()))?;
        Ok(batch
            .entries
            .into_iter()
            .map(|mut entry| {
                if entry.service_name.trim().is_empty() {
                    entry.service_name = service_name.to_string();
                }
                entry
            })
            .collect())
    }
}

/// Record shape of the legacy emergency ("break-glass") access log.
#[derive(Debug, Clone, Deserialize)]
pub struct EmergencyAccessLog {
    #[serde(default)]
    pub log_id: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub user_id: String,
    #[serde(default)]
    pub patient_id: Option<String>,
    pub access_type: String,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub justification: String,
    #[serde(default = "granted")]
    pub success: bool,
    #[serde(default)]
    pub compliance_violation: bool,
    #[serde(default)]
    pub risk_score: u32,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub approved_by: Option<String>,
}

fn granted() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct EmergencyAccessBatch {
    audit_logs: Vec<EmergencyAccessLog>,
}

pub struct EmergencyAccessAdapter;

impl EmergencyAccessAdapter {
    pub fn derive_log_level(success: bool, violation: bool, risk_score: u32) -> LogLevel {
        if violation {
            LogLevel::Critical
        } else if !success {
            LogLevel::Error
        } else if risk_score >= HIGH_RISK_SCORE {
            LogLevel::Warning
        } else {
            LogLevel::Info
        }
    }

    pub fn derive_sensitivity(phi_accessed: bool, risk_score: u32) -> DataSensitivity {
        if risk_score >= CRITICAL_RISK_SCORE {
            DataSensitivity::Critical
        } else if phi_accessed || risk_score >= HIGH_RISK_SCORE {
            DataSensitivity::High
        } else if risk_score >= MEDIUM_RISK_SCORE {
            DataSensitivity::Medium
        } else {
            DataSensitivity::Low
        }
    }

    pub fn normalize(service_name: &str, log: EmergencyAccessLog) -> AuditEntry {
        let phi_accessed = log.patient_id.is_some();
        let level = Self::derive_log_level(log.success, log.compliance_violation, log.risk_score);

        let mut tags = vec![
            "emergency".to_string(),
            "access_control".to_string(),
            log.access_type.clone(),
        ];
        if log.compliance_violation {
            tags.push("compliance_violation".to_string());
        }

        let mut metadata = BTreeMap::new();
        metadata.insert("risk_score".to_string(), Value::from(log.risk_score));
        metadata.insert(
            "compliance_violation".to_string(),
            Value::from(log.compliance_violation),
        );
        metadata.insert("source_format".to_string(), Value::from("emergency_access"));
        if let Some(approver) = &log.approved_by {
            metadata.insert("approved_by".to_string(), Value::from(approver.clone()));
        }

        let mut context = BTreeMap::new();
        context.insert("access_type".to_string(), Value::from(log.access_type.clone()));
        if !log.justification.is_empty() {
            context.insert(
                "justification".to_string(),
                Value::from(log.justification.clone()),
            );
        }

        let action = if log.action.is_empty() {
            "emergency_access".to_string()
        } else {
            log.action
        };

        let mut entry = AuditEntry::new(EventType::EmergencyAccess, service_name, &action);
        entry.audit_id = log.log_id.unwrap_or_default();
        entry.timestamp = log.timestamp.unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        entry.log_level = level;
        entry.user_id = Some(log.user_id);
        entry.session_id = log.session_id;
        entry.client_ip = log.ip_address;
        entry.user_agent = log.user_agent;
        entry.event = AuditEventDetail {
            action,
            resource: log.patient_id.clone().unwrap_or_default(),
            resource_type: "patient".to_string(),
            description: format!("Emergency {} access", log.access_type),
            success: log.success,
            error_message: (!log.success).then(|| "emergency access denied".to_string()),
            context,
            ..AuditEventDetail::default()
        };
        entry.patient_id = log.patient_id;
        entry.phi_accessed = phi_accessed;
        entry.data_sensitivity = Self::derive_sensitivity(phi_accessed, log.risk_score);
        entry.compliance_context = Some("emergency_access".to_string());
        entry.tags = tags;
        entry.metadata = metadata;
        entry
    }
}

impl AuditFormatAdapter for EmergencyAccessAdapter {
    fn name(&self) -> &'static str {
        "emergency_access"
    }

    fn decode(&self, service_name: &str, body: &[u8]) -> AuditResult<Vec<AuditEntry>> {
        let batch: EmergencyAccessBatch = serde_json::from_slice(body)
            .map_err(|e| AuditError::decode(service_name, e.to_string()))?;
        Ok(batch
            .audit_logs
            .into_iter()
            .map(|log| Self::normalize(service_name, log))
            .collect())
    }
}

/// Result of decoding one upstream body.
#[derive(Debug)]
pub struct DecodedBatch {
    pub format: &'static str,
    pub entries: Vec<AuditEntry>,
}

/// Ordered set of adapters, canonical first.
pub struct PayloadDecoder {
    adapters: Vec<Box<dyn AuditFormatAdapter>>,
}

impl Default for PayloadDecoder {
    fn default() -> Self {
        Self::new().with_adapter(Box::new(EmergencyAccessAdapter))
    }
}

impl PayloadDecoder {
    /// Decoder that only understands the canonical batch.
    pub fn new() -> Self {
        Self {
            adapters: vec![Box::new(CanonicalAdapter)],
        }
    }

    pub fn with_adapter(mut self, adapter: Box<dyn AuditFormatAdapter>) -> Self {
        self.adapters.push(adapter);
        self
    }

    pub fn formats(&self) -> Vec<&'static str> {
        self.adapters.iter().map(|a| a.name()).collect()
    }

    pub fn decode(&self, service_name: &str, body: &[u8]) -> AuditResult<DecodedBatch> {
        let mut failures = Vec::new();
        for adapter in &self.adapters {
            match adapter.decode(service_name, body) {
                Ok(entries) => {
                    return Ok(DecodedBatch {
                        format: adapter.name(),
                        entries,
                    })
                }
                Err(e) => failures.push(format!("{}: {e}", adapter.name())),
            }
        }
        Err(AuditError::decode(
            service_name,
            format!("no adapter accepted the payload ({})", failures.join("; ")),
        ))
    }
}
