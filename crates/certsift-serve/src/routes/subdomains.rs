//! Subdomain grouping endpoint.

use axum::extract::{Path, State};
use axum::Json;

use certsift_core::DomainGroup;

use crate::error::ApiError;
use crate::state::AppState;

/// `GET /v1/subdomains/{domain}`
///
/// Returns the requested domain together with every recorded domain whose
/// parent is that domain. A domain with no recorded subdomains yields an
/// empty list rather than a 404.
pub async fn get_subdomains(
    State(state): State<AppState>,
    Path(domain): Path<String>,
) -> Result<Json<DomainGroup>, ApiError> {
    let db = state.db.clone();
    let parent = domain.clone();

    let subdomains = tokio::task::spawn_blocking(move || -> rusqlite::Result<Vec<String>> {
        let conn = db.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT domain FROM domains WHERE parent_domain = ?1 ORDER BY domain",
        )?;
        let rows = stmt.query_map([&parent], |row| row.get(0))?;
        rows.collect()
    })
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))??;

    Ok(Json(DomainGroup { domain, subdomains }))
}
