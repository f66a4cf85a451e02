use std::path::Path;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::errors::{AuditError, AuditResult};

pub const DEFAULT_CONFIG_FILE: &str = "audit_aggregator.toml";
pub const ENV_PREFIX: &str = "AUDIT_";

/// Smallest store capacity accepted; eviction trims to 90% of the cap.
pub const MIN_MAX_ENTRIES: usize = 10;
/// Longest accepted loop period (30 days).
pub const MAX_INTERVAL_SECS: u64 = 30 * 24 * 60 * 60;
/// Longest accepted upstream request timeout.
pub const MAX_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Effective runtime settings for the aggregator.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AggregatorConfig {
    pub service_name: String,
    pub service_version: String,
    pub host: String,
    pub port: u16,
    /// URL other services reach us on; derived from host/port when unset.
    pub public_url: Option<String>,
    pub max_entries: usize,
    /// Deletion age for standard-policy entries.
    pub retention_days: u32,
    pub health_check_interval_secs: u64,
    pub collection_interval_secs: u64,
    pub aggregation_interval_secs: u64,
    pub retention_interval_secs: u64,
    pub health_check_timeout_secs: u64,
    pub collection_timeout_secs: u64,
    pub report_history_limit: usize,
    pub log_format: LogFormat,
    pub log_filter: String,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            service_name: "audit-service".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            host: "0.0.0.0".to_string(),
            port: 8084,
            public_url: None,
            max_entries: 100_000,
            retention_days: 365,
            health_check_interval_secs: 120,
            collection_interval_secs: 30,
            aggregation_interval_secs: 3600,
            retention_interval_secs: 86_400,
            health_check_timeout_secs: 5,
            collection_timeout_secs: 10,
            report_history_limit: 168,
            log_format: LogFormat::Pretty,
            log_filter: "audit_aggregator=info,tower_http=info".to_string(),
        }
    }
}

impl AggregatorConfig {
    pub fn validate(&self) -> AuditResult<()> {
        if self.service_name.trim().is_empty() {
            return Err(AuditError::validation("service_name", "must not be empty"));
        }
        if self.max_entries < MIN_MAX_ENTRIES {
            return Err(AuditError::validation(
                "max_entries",
                format!("must be at least {MIN_MAX_ENTRIES}"),
            ));
        }
        if self.retention_days == 0 {
            return Err(AuditError::validation("retention_days", "must be greater than zero"));
        }
        if self.report_history_limit == 0 {
            return Err(AuditError::validation(
                "report_history_limit",
                "must be greater than zero",
            ));
        }
        let periods = [
            ("health_check_interval_secs", self.health_check_interval_secs, MAX_INTERVAL_SECS),
            ("collection_interval_secs", self.collection_interval_secs, MAX_INTERVAL_SECS),
            ("aggregation_interval_secs", self.aggregation_interval_secs, MAX_INTERVAL_SECS),
            ("retention_interval_secs", self.retention_interval_secs, MAX_INTERVAL_SECS),
            ("health_check_timeout_secs", self.health_check_timeout_secs, MAX_TIMEOUT_SECS),
            ("collection_timeout_secs", self.collection_timeout_secs, MAX_TIMEOUT_SECS),
        ];
        for (field, secs, max) in periods {
            if secs == 0 {
                return Err(AuditError::validation(field, "must be greater than zero"));
            }
            if secs > max {
                return Err(AuditError::validation(
                    field,
                    format!("must be at most {max} seconds"),
                ));
            }
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Address advertised in the self-registration.
    pub fn advertised_url(&self) -> String {
        match &self.public_url {
            Some(url) if !url.trim().is_empty() => url.clone(),
            _ => {
                let host = match self.host.as_str() {
                    "0.0.0.0" | "::" | "" => "localhost",
                    other => other,
                };
                format!("http://{host}:{}", self.port)
            }
        }
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    pub fn collection_interval(&self) -> Duration {
        Duration::from_secs(self.collection_interval_secs)
    }

    pub fn aggregation_interval(&self) -> Duration {
        Duration::from_secs(self.aggregation_interval_secs)
    }

    pub fn retention_interval(&self) -> Duration {
        Duration::from_secs(self.retention_interval_secs)
    }

    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_secs(self.health_check_timeout_secs)
    }

    pub fn collection_timeout(&self) -> Duration {
        Duration::from_secs(self.collection_timeout_secs)
    }
}

pub fn figment(path: Option<&Path>) -> Figment {
    let file = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
    Figment::from(Serialized::defaults(AggregatorConfig::default()))
        .merge(Toml::file(file))
        .merge(Env::prefixed(ENV_PREFIX))
}

/// Defaults, then the TOML file (missing is fine), then `AUDIT_*` variables.
pub fn load_config(path: Option<&Path>) -> AuditResult<AggregatorConfig> {
    let config: AggregatorConfig = figment(path).extract()?;
    config.validate()?;
    Ok(config)
}
