//! Apex domain listing endpoint.

use axum::extract::{Query, State};
use axum::response::Response;
use rusqlite::{params, Connection};

use crate::error::ApiError;
use crate::state::AppState;

use super::{parse_page_params, stream_query, PageParams};

/// `GET /v1/domains?page&size`
///
/// Streams a JSON array of apex domain names, alphabetical, excluding any
/// beginning with `www.`.
pub async fn list_domains(
    State(state): State<AppState>,
    Query(params): Query<PageParams>,
) -> Result<Response, ApiError> {
    let window = parse_page_params(&params)?;
    stream_query(state, window, fetch_domain_names).await
}

fn fetch_domain_names(conn: &Connection, offset: u64, limit: u64) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare_cached(
        "SELECT domain FROM domains
         WHERE is_apex = 1 AND domain NOT LIKE 'www.%'
         ORDER BY domain
         LIMIT ?1 OFFSET ?2",
    )?;

    let rows = stmt.query_map(params![limit, offset], |row| row.get(0))?;
    rows.collect()
}
