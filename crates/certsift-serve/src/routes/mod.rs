//! API route definitions.
//!
//! # Route Structure
//!
//! - `GET /v1/domains` - apex domain names, paginated, streamed
//! - `GET /v1/cert-updates` - full certificate records, paginated, streamed
//! - `GET /v1/subdomains/{domain}` - subdomains grouped under a domain
//!
//! Everything else is a 404. All requests pass the per-IP rate limiter;
//! CORS preflight is answered before it.

mod cert_updates;
mod domains;
mod subdomains;

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{header::HeaderValue, Method};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};

use crate::body::json_array_response;
use crate::error::ApiError;
use crate::server::ClientAddr;
use crate::state::{AppState, PAGE_CHUNK};

/// Build the complete API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/domains", get(domains::list_domains))
        .route("/v1/cert-updates", get(cert_updates::list_cert_updates))
        .route("/v1/subdomains/{domain}", get(subdomains::get_subdomains))
        .fallback(unknown_path)
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit))
        .layer(cors_layer())
        .with_state(state)
}

async fn unknown_path() -> ApiError {
    ApiError::NotFound
}

/// CORS for the local frontend; preflight requests are answered 200 here.
fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(
            "http://localhost:3000"
                .parse::<HeaderValue>()
                .expect("static origin is a valid header value"),
        )
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any)
}

/// Rate-limit middleware keyed on the connection's peer IP.
///
/// A request without a [`ClientAddr`] extension (only possible outside the
/// real server wiring) is admitted.
async fn rate_limit(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if let Some(addr) = request.extensions().get::<ClientAddr>() {
        if !state.limiter.admit(addr.0.ip()) {
            metrics::counter!("api_requests_rate_limited_total").increment(1);
            return Err(ApiError::RateLimited);
        }
    }
    Ok(next.run(request).await)
}

/// Raw pagination parameters, parsed by hand so a bad value maps to a JSON
/// 400 rather than an extractor rejection.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct PageParams {
    page: Option<String>,
    size: Option<String>,
}

/// A validated pagination window.
#[derive(Debug, Clone, Copy)]
pub struct PageWindow {
    pub page: u64,
    pub size: u64,
}

impl PageWindow {
    /// Saturating so absurd page/size combinations clamp instead of
    /// overflowing; SQLite simply returns nothing past the end.
    pub fn offset(&self) -> u64 {
        self.page
            .saturating_sub(1)
            .saturating_mul(self.size)
            .min(i64::MAX as u64)
    }
}

fn parse_page_params(params: &PageParams) -> Result<PageWindow, ApiError> {
    let page = parse_positive(params.page.as_deref(), 1, "page")?;
    let size = parse_positive(params.size.as_deref(), 1000, "size")?;
    Ok(PageWindow { page, size })
}

fn parse_positive(raw: Option<&str>, default: u64, name: &str) -> Result<u64, ApiError> {
    match raw {
        None => Ok(default),
        Some(s) => match s.parse::<u64>() {
            Ok(v) if v >= 1 => Ok(v),
            Ok(_) => Err(ApiError::BadRequest(format!("{name} must be at least 1"))),
            Err(_) => Err(ApiError::BadRequest(format!("invalid {name}: '{s}'"))),
        },
    }
}

/// Stream one pagination window of a query as a JSON array.
///
/// The first sub-page is fetched before the response is committed, so an
/// immediate store failure still becomes a 500. Remaining sub-pages are
/// fetched on a blocking task, one short lock at a time, and streamed.
async fn stream_query<T, F>(
    state: AppState,
    window: PageWindow,
    fetch: F,
) -> Result<Response, ApiError>
where
    T: Serialize + Send + Sync + 'static,
    F: Fn(&Connection, u64, u64) -> rusqlite::Result<Vec<T>> + Send + Sync + 'static,
{
    let fetch = Arc::new(fetch);
    let chunk = (PAGE_CHUNK as u64).min(window.size);
    let offset = window.offset();
    let size = window.size.min(i64::MAX as u64);

    let first = {
        let db = state.db.clone();
        let fetch = fetch.clone();
        tokio::task::spawn_blocking(move || {
            let conn = db.lock();
            fetch(&conn, offset, chunk)
        })
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))??
    };

    let got = first.len() as u64;
    let (tx, rx) = mpsc::channel::<Result<Vec<T>, rusqlite::Error>>(4);

    // Only keep paging if the first sub-page was full and the window wants
    // more; otherwise the store is exhausted and rx closes immediately.
    if got == chunk && size > got {
        let db = state.db.clone();
        let remaining = size - got;
        tokio::task::spawn_blocking(move || {
            let mut sent: u64 = 0;
            while sent < remaining {
                let limit = chunk.min(remaining - sent);
                let result = {
                    let conn = db.lock();
                    fetch(&conn, offset + got + sent, limit)
                };
                match result {
                    Ok(rows) => {
                        let len = rows.len() as u64;
                        if len == 0 {
                            break;
                        }
                        if tx.blocking_send(Ok(rows)).is_err() {
                            break;
                        }
                        sent += len;
                        if len < limit {
                            break;
                        }
                    }
                    Err(e) => {
                        let _ = tx.blocking_send(Err(e));
                        break;
                    }
                }
            }
        });
    }

    Ok(json_array_response(Some(first), rx))
}
