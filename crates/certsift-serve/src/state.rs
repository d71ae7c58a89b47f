//! Shared application state for request handlers.

use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::Connection;

use certsift_core::Config;

use crate::limiter::RateLimiter;

/// Rows fetched per store round-trip while streaming a response.
pub const PAGE_CHUNK: usize = 256;

/// Shared application state available to all request handlers.
///
/// The connection is a read handle onto the store the writer owns; WAL mode
/// lets it read concurrently with the single writer. Handlers take the lock
/// for one chunk at a time, never across an await.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Mutex<Connection>>,
    pub limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn new(conn: Connection, config: &Config) -> Self {
        Self {
            db: Arc::new(Mutex::new(conn)),
            limiter: Arc::new(RateLimiter::new(config.rate_limit, config.rate_reset)),
        }
    }
}
