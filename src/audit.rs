// Canonical audit entry shared by every producer, the store and the reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub const RETENTION_PHI_7_YEARS: &str = "phi_7_years";
pub const RETENTION_STANDARD_1_YEAR: &str = "standard_1_year";

/// Kind of action an audit entry records
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    #[serde(rename = "user_login", alias = "login")]
    Login,
    #[serde(rename = "user_logout", alias = "logout")]
    Logout,
    PhiAccess,
    EmergencyAccess,
    RelationshipChange,
    ConsentChange,
    DataExport,
    DataDeletion,
    SystemConfig,
    ComplianceViolation,
    SecurityIncident,
    ApiAccess,
    ServiceStart,
    ServiceStop,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Login => "user_login",
            EventType::Logout => "user_logout",
            EventType::PhiAccess => "phi_access",
            EventType::EmergencyAccess => "emergency_access",
            EventType::RelationshipChange => "relationship_change",
            EventType::ConsentChange => "consent_change",
            EventType::DataExport => "data_export",
            EventType::DataDeletion => "data_deletion",
            EventType::SystemConfig => "system_config",
            EventType::ComplianceViolation => "compliance_violation",
            EventType::SecurityIncident => "security_incident",
            EventType::ApiAccess => "api_access",
            EventType::ServiceStart => "service_start",
            EventType::ServiceStop => "service_stop",
        }
    }

    /// Violations and incidents count towards a report's security events.
    pub fn is_security_event(&self) -> bool {
        matches!(
            self,
            EventType::ComplianceViolation | EventType::SecurityIncident
        )
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(Value::String(s.trim().to_string()))
            .map_err(|_| format!("unknown event type '{s}'"))
    }
}

/// Severity levels for audit classification
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    #[serde(alias = "warn")]
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
            LogLevel::Critical => "critical",
        }
    }

    pub fn is_error_or_worse(&self) -> bool {
        *self >= LogLevel::Error
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(Value::String(s.trim().to_ascii_lowercase()))
            .map_err(|_| format!("unknown log level '{s}'"))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSensitivity {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

/// Named retention rule attached to every stored entry.
///
/// The entry keeps the label as a plain string so labels this service does
/// not know survive a round trip; [`RetentionPolicy::from_label`] resolves them
/// and falls back to the standard rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionPolicy {
    Phi7Years,
    Standard1Year,
}

impl RetentionPolicy {
    pub fn for_entry(phi_accessed: bool) -> Self {
        if phi_accessed {
            RetentionPolicy::Phi7Years
        } else {
            RetentionPolicy::Standard1Year
        }
    }

    pub fn from_label(label: &str) -> Self {
        match label {
            RETENTION_PHI_7_YEARS => RetentionPolicy::Phi7Years,
            _ => RetentionPolicy::Standard1Year,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RetentionPolicy::Phi7Years => RETENTION_PHI_7_YEARS,
            RetentionPolicy::Standard1Year => RETENTION_STANDARD_1_YEAR,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: String,
    #[serde(default)]
    pub old_value: Value,
    #[serde(default)]
    pub new_value: Value,
}

/// What happened, as reported by the producing service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEventDetail {
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub resource: String,
    #[serde(default)]
    pub resource_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_success")]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changes: Vec<FieldChange>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, Value>,
}

fn default_success() -> bool {
    true
}

impl Default for AuditEventDetail {
    fn default() -> Self {
        Self {
            action: String::new(),
            resource: String::new(),
            resource_type: String::new(),
            description: String::new(),
            success: true,
            error_message: None,
            duration_ms: None,
            changes: Vec::new(),
            context: BTreeMap::new(),
        }
    }
}

fn unset_timestamp() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

/// One canonical record of an action taken somewhere on the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    #[serde(default)]
    pub audit_id: String,
    #[serde(default = "unset_timestamp")]
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
    #[serde(default)]
    pub log_level: LogLevel,

    #[serde(default)]
    pub service_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,

    #[serde(default)]
    pub event: AuditEventDetail,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,

    #[serde(default)]
    pub phi_accessed: bool,
    #[serde(default)]
    pub data_sensitivity: DataSensitivity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compliance_context: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,

    #[serde(default)]
    pub retention_policy: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archived_at: Option<DateTime<Utc>>,
}

impl AuditEntry {
    /// Builds an entry stamped now, attributed to `service_name`.
    pub fn new(event_type: EventType, service_name: &str, action: &str) -> Self {
        Self {
            audit_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type,
            log_level: LogLevel::Info,
            service_name: service_name.to_string(),
            service_host: None,
            user_id: None,
            session_id: None,
            patient_id: None,
            request_id: None,
            event: AuditEventDetail {
                action: action.to_string(),
                ..AuditEventDetail::default()
            },
            client_ip: None,
            user_agent: None,
            request_path: None,
            http_method: None,
            status_code: None,
            phi_accessed: false,
            data_sensitivity: DataSensitivity::Low,
            compliance_context: None,
            tags: Vec::new(),
            metadata: BTreeMap::new(),
            retention_policy: String::new(),
            archived_at: None,
        }
    }

    /// Sets log severity
    pub fn with_severity(mut self, level: LogLevel) -> Self {
        self.log_level = level;
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_resource(mut self, resource: impl Into<String>, resource_type: &str) -> Self {
        self.event.resource = resource.into();
        self.event.resource_type = resource_type.to_string();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.event.description = description.into();
        self
    }

    /// Marks the action as failed with the given reason
    pub fn with_failure(mut self, reason: impl Into<String>) -> Self {
        self.event.success = false;
        self.event.error_message = Some(reason.into());
        self
    }

    pub fn with_phi(mut self, phi_accessed: bool) -> Self {
        self.phi_accessed = phi_accessed;
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Go-style producers send `0001-01-01T00:00:00Z` for an unset time.
    pub fn has_timestamp(&self) -> bool {
        self.timestamp.timestamp() > 0
    }

    /// Fills the identity and lifecycle fields a producer may omit.
    pub fn backfill(&mut self, now: DateTime<Utc>) {
        if self.audit_id.trim().is_empty() {
            self.audit_id = Uuid::new_v4().to_string();
        }
        if !self.has_timestamp() {
            self.timestamp = now;
        }
        if self.retention_policy.trim().is_empty() {
            self.retention_policy = RetentionPolicy::for_entry(self.phi_accessed)
                .label()
                .to_string();
        }
    }

    pub fn retention(&self) -> RetentionPolicy {
        RetentionPolicy::from_label(&self.retention_policy)
    }

    pub fn is_archived(&self) -> bool {
        self.archived_at.is_some()
    }

    pub fn succeeded(&self) -> bool {
        self.event.success
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn minimal_payload_decodes_with_defaults() {
        let entry: AuditEntry = serde_json::from_value(json!({
            "event_type": "phi_access",
            "service_name": "records-service",
            "phi_accessed": true
        }))
        .unwrap();

        assert!(entry.audit_id.is_empty());
        assert!(!entry.has_timestamp());
        assert_eq!(entry.log_level, LogLevel::Info);
        assert!(entry.event.success);
        assert_eq!(entry.data_sensitivity, DataSensitivity::Low);
        assert!(entry.retention_policy.is_empty());
    }

    #[test]
    fn go_zero_time_counts_as_unset() {
        let entry: AuditEntry = serde_json::from_value(json!({
            "event_type": "user_login",
            "timestamp": "0001-01-01T00:00:00Z"
        }))
        .unwrap();
        assert!(!entry.has_timestamp());
    }

    #[test]
    fn backfill_assigns_identity_and_policy() {
        let mut entry: AuditEntry =
            serde_json::from_value(json!({"event_type": "phi_access", "phi_accessed": true}))
                .unwrap();
        let now = Utc::now();
        entry.backfill(now);

        assert!(!entry.audit_id.is_empty());
        assert_eq!(entry.timestamp, now);
        assert_eq!(entry.retention_policy, RETENTION_PHI_7_YEARS);
    }

    #[test]
    fn backfill_keeps_caller_supplied_fields() {
        let ts = Utc::now() - chrono::Duration::days(3);
        let mut entry = AuditEntry::new(EventType::DataExport, "billing", "export")
            .with_timestamp(ts);
        entry.audit_id = "fixed-id".into();
        entry.retention_policy = "legal_hold".into();
        entry.backfill(Utc::now());

        assert_eq!(entry.audit_id, "fixed-id");
        assert_eq!(entry.timestamp, ts);
        assert_eq!(entry.retention_policy, "legal_hold");
        assert_eq!(entry.retention(), RetentionPolicy::Standard1Year);
    }

    #[test]
    fn event_type_and_level_parse_from_query_strings() {
        assert_eq!("phi_access".parse::<EventType>().unwrap(), EventType::PhiAccess);
        assert_eq!("login".parse::<EventType>().unwrap(), EventType::Login);
        assert!("teleport".parse::<EventType>().is_err());
        assert_eq!("WARNING".parse::<LogLevel>().unwrap(), LogLevel::Warning);
        assert_eq!("warn".parse::<LogLevel>().unwrap(), LogLevel::Warning);
    }

    #[test]
    fn event_type_serializes_snake_case() {
        let v = serde_json::to_value(EventType::ComplianceViolation).unwrap();
        assert_eq!(v, json!("compliance_violation"));
        assert_eq!(EventType::Login.to_string(), "user_login");
    }
}
