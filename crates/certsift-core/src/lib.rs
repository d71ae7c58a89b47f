//! Core types and shared utilities for the certsift pipeline.
//!
//! This crate provides:
//! - The [`CertRecord`] model extracted from Certificate Transparency events
//! - Apex/subdomain classification rules
//! - Runtime configuration shared by the daemon and its components
//! - Prometheus metrics helpers
//! - Shared error types

mod config;
mod error;
pub mod metrics;
mod record;

/// Default upstream CT event stream.
pub const DEFAULT_UPSTREAM_URL: &str = "wss://certstream.calidog.io/";

pub use config::Config;
pub use error::{Error, Result};
pub use record::{is_apex_domain, parent_domain, CertRecord, CertUpdate, DomainGroup};
