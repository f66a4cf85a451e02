//! HTTP handlers, grouped by resource. Routing lives in [`crate::auditweb`].

pub mod entries;
pub mod health;
pub mod reports;
pub mod services;
