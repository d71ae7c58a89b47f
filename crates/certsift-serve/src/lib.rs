//! certsift-serve - HTTPS query API for the domain store.
//!
//! This crate provides the read side of certsift: three endpoints over the
//! accumulated `domains` table, streaming JSON so large result sets never
//! sit in memory whole.
//!
//! # Architecture
//!
//! - **AppState**: shared read connection, rate limiter, page geometry
//! - **RateLimiter**: per-IP fixed window behind one mutex, applied as
//!   middleware before routing
//! - **Routes**: endpoint handlers under `/v1`
//! - **Server**: TLS accept loop with tracked, deadline-bounded drain

mod body;
mod error;
mod limiter;
mod routes;
mod server;
mod state;
pub mod tls;

pub use self::body::json_array_response;
pub use self::error::ApiError;
pub use self::limiter::RateLimiter;
pub use self::routes::router;
pub use self::server::{serve, ClientAddr};
pub use self::state::AppState;
