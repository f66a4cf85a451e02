//! Library root for the `audit_aggregator` crate
//! Centralized audit aggregation and compliance reporting service

// Core error handling
pub mod api_errors;
pub mod errors;

// Audit entries & storage
pub mod audit;
pub mod audit_store;
pub mod retention;

// Upstream services
pub mod audit_adapters;
pub mod collector;
pub mod health_poller;
pub mod service_registry;

// Reporting
pub mod aggregation;

// Runtime wiring
pub mod app_state;
pub mod scheduler;

// Configuration, logging & CLI
pub mod cli;
pub mod config_loader;
pub mod log_sink;

// Web server interface
pub mod api;
pub mod auditweb;

pub use audit::{AuditEntry, EventType, LogLevel};
pub use audit_store::{AuditStore, EntryFilter, MemoryAuditStore};
pub use errors::{AuditError, AuditResult};
