//! Runtime configuration shared by the daemon and its components.

use std::path::PathBuf;
use std::time::Duration;

use crate::{Error, Result, DEFAULT_UPSTREAM_URL};

/// Configuration for the certsift daemon.
///
/// Populated from CLI flags (with environment fallbacks) by the daemon;
/// the defaults here are what an empty invocation gets.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,

    /// Number of records accumulated before a batch is handed to the writer.
    pub batch_size: usize,

    /// Requests admitted per client IP per rate window.
    pub rate_limit: u32,

    /// Length of the rate-limiter window.
    pub rate_reset: Duration,

    /// HTTPS bind address.
    pub bind_addr: String,

    /// Upstream CT stream websocket URL.
    pub upstream_url: String,

    /// Directory holding `cert.pem` and `key.pem`.
    pub cert_dir: PathBuf,

    /// Metrics HTTP port (0 disables the metrics server).
    pub metrics_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("data/certsift.db"),
            batch_size: 1000,
            rate_limit: 100,
            rate_reset: Duration::from_secs(60),
            bind_addr: "localhost:8080".to_string(),
            upstream_url: DEFAULT_UPSTREAM_URL.to_string(),
            cert_dir: PathBuf::from("cert"),
            metrics_port: 0,
        }
    }
}

impl Config {
    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Config("batch size must be at least 1".to_string()));
        }
        if self.rate_limit == 0 {
            return Err(Error::Config("rate limit must be at least 1".to_string()));
        }
        if self.rate_reset.is_zero() {
            return Err(Error::Config(
                "rate reset window must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Path to the TLS certificate file.
    pub fn cert_file(&self) -> PathBuf {
        self.cert_dir.join("cert.pem")
    }

    /// Path to the TLS private key file.
    pub fn key_file(&self) -> PathBuf {
        self.cert_dir.join("key.pem")
    }
}
