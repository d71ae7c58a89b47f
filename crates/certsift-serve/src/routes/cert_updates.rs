//! Certificate update listing endpoint.

use axum::extract::{Query, State};
use axum::response::Response;
use rusqlite::{params, Connection};

use certsift_core::{CertRecord, CertUpdate};

use crate::error::ApiError;
use crate::state::AppState;

use super::{parse_page_params, stream_query, PageParams};

/// `GET /v1/cert-updates?page&size`
///
/// Streams a JSON array of certificate records ordered by domain.
pub async fn list_cert_updates(
    State(state): State<AppState>,
    Query(params): Query<PageParams>,
) -> Result<Response, ApiError> {
    let window = parse_page_params(&params)?;
    stream_query(state, window, fetch_cert_updates).await
}

fn fetch_cert_updates(
    conn: &Connection,
    offset: u64,
    limit: u64,
) -> rusqlite::Result<Vec<CertUpdate>> {
    let mut stmt = conn.prepare_cached(
        "SELECT domain, is_apex, parent_domain, not_before, not_after,
                serial_number, fingerprint, key_usage, extended_key_usage,
                subject_key_id, authority_key_id, authority_info,
                subject_alt_name, certificate_policies, wildcard
         FROM domains
         ORDER BY domain
         LIMIT ?1 OFFSET ?2",
    )?;

    let rows = stmt.query_map(params![limit, offset], |row| {
        Ok(CertRecord {
            domain: row.get(0)?,
            is_apex: row.get(1)?,
            parent_domain: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
            not_before: row.get::<_, Option<i64>>(3)?.unwrap_or_default(),
            not_after: row.get::<_, Option<i64>>(4)?.unwrap_or_default(),
            serial_number: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
            fingerprint: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
            key_usage: row.get::<_, Option<String>>(7)?.unwrap_or_default(),
            extended_key_usage: row.get::<_, Option<String>>(8)?.unwrap_or_default(),
            subject_key_id: row.get::<_, Option<String>>(9)?.unwrap_or_default(),
            authority_key_id: row.get::<_, Option<String>>(10)?.unwrap_or_default(),
            authority_info: row.get::<_, Option<String>>(11)?.unwrap_or_default(),
            subject_alt_name: row.get::<_, Option<String>>(12)?.unwrap_or_default(),
            certificate_policies: row.get::<_, Option<String>>(13)?.unwrap_or_default(),
            wildcard: row.get::<_, Option<bool>>(14)?.unwrap_or_default(),
        })
    })?;

    rows.map(|r| r.map(CertUpdate::from)).collect()
}
