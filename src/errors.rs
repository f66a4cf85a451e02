//! Error handling for the audit aggregation service
//!
//! Every fallible operation in the store, the registry, the upstream pollers
//! and the configuration layer returns an [`AuditError`]. HTTP handlers convert
//! it into an [`crate::api_errors::AppError`] at the edge.

use thiserror::Error;

/// Main error type for the audit aggregation service
#[derive(Error, Debug)]
pub enum AuditError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Mutex lock failed: {resource}")]
    MutexPoisoned { resource: String },

    #[error("Network operation failed: {operation}")]
    Network {
        operation: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Upstream {service} responded with HTTP {status}")]
    UpstreamStatus { service: String, status: u16 },

    #[error("Could not decode audit payload from {service}: {message}")]
    Decode { service: String, message: String },

    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },
}

/// Type alias for Result with AuditError
pub type AuditResult<T> = Result<T, AuditError>;

impl AuditError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn poisoned(resource: impl Into<String>) -> Self {
        Self::MutexPoisoned {
            resource: resource.into(),
        }
    }

    /// Create a network error
    pub fn network(operation: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            operation: operation.into(),
            source,
        }
    }

    pub fn upstream_status(service: impl Into<String>, status: u16) -> Self {
        Self::UpstreamStatus {
            service: service.into(),
            status,
        }
    }

    pub fn decode(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Create a validation error
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Errors after which shared state can no longer be trusted.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AuditError::MutexPoisoned { .. })
    }
}

/// Helper trait for mutex access that reports poisoning as an [`AuditError`]
/// naming the guarded resource instead of panicking.
pub trait SafeLock<T: ?Sized> {
    fn safe_lock(&self, resource: &str) -> AuditResult<std::sync::MutexGuard<'_, T>>;
}

impl<T: ?Sized> SafeLock<T> for std::sync::Mutex<T> {
    fn safe_lock(&self, resource: &str) -> AuditResult<std::sync::MutexGuard<'_, T>> {
        self.lock().map_err(|_| AuditError::poisoned(resource))
    }
}

impl From<figment::Error> for AuditError {
    fn from(err: figment::Error) -> Self {
        AuditError::config(err.to_string())
    }
}
