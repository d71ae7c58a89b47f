//! Batch insert worker.
//!
//! Consumes record batches from a bounded channel on a dedicated thread.
//! Each batch is one transaction; transient failures are retried a bounded
//! number of times, after which the batch is dropped and logged so the
//! pipeline keeps moving.

use std::thread;
use std::time::Duration;

use crossbeam_channel::Receiver;
use rusqlite::{params, Connection};

use certsift_core::{is_apex_domain, parent_domain, CertRecord};

/// Retry policy for batch transactions.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Attempts per batch before it is dropped.
    pub max_attempts: u32,

    /// Delay between attempts.
    pub retry_delay: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay: Duration::from_secs(2),
        }
    }
}

/// Store writer consuming record batches.
///
/// The single writer owns its connection; readers use their own handles
/// under WAL.
pub struct StoreWriter {
    conn: Connection,
    config: WriterConfig,
}

impl StoreWriter {
    pub fn new(conn: Connection, config: WriterConfig) -> Self {
        Self { conn, config }
    }

    /// Start the writer thread, consuming from the batch channel.
    ///
    /// The thread runs until the channel disconnects and all queued batches
    /// are drained, so dropping the last sender is the shutdown signal.
    pub fn start(mut self, batches: Receiver<Vec<CertRecord>>) -> thread::JoinHandle<()> {
        thread::spawn(move || {
            tracing::info!("store writer started");

            for batch in batches.iter() {
                self.write_batch(batch);
            }

            tracing::info!("store writer drained, stopping");
        })
    }

    /// Classify and persist one batch, retrying on failure.
    fn write_batch(&mut self, mut batch: Vec<CertRecord>) {
        for record in &mut batch {
            record.is_apex = is_apex_domain(&record.domain);
            record.parent_domain = if record.is_apex {
                String::new()
            } else {
                parent_domain(&record.domain)
            };
        }

        for attempt in 1..=self.config.max_attempts {
            // The transaction rolls back on drop if the insert failed.
            match self.insert_batch(&batch) {
                Ok(inserted) => {
                    metrics::counter!("writer_batches_committed_total").increment(1);
                    metrics::counter!("writer_rows_inserted_total").increment(inserted as u64);
                    tracing::debug!(
                        records = batch.len(),
                        inserted,
                        "batch committed"
                    );
                    return;
                }
                Err(e) => {
                    metrics::counter!("writer_retries_total").increment(1);
                    tracing::warn!(
                        attempt,
                        max_attempts = self.config.max_attempts,
                        error = %e,
                        "batch insert failed"
                    );
                    if attempt < self.config.max_attempts {
                        thread::sleep(self.config.retry_delay);
                    }
                }
            }
        }

        metrics::counter!("writer_batches_dropped_total").increment(1);
        tracing::error!(
            records = batch.len(),
            attempts = self.config.max_attempts,
            "dropping batch after exhausting retries"
        );
    }

    /// Insert a batch in one transaction, ignoring already-seen domains.
    fn insert_batch(&mut self, batch: &[CertRecord]) -> rusqlite::Result<usize> {
        let tx = self.conn.transaction()?;
        let mut inserted = 0;

        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO domains (
                    domain, is_apex, parent_domain, not_before, not_after,
                    serial_number, fingerprint, key_usage, extended_key_usage,
                    subject_key_id, authority_key_id, authority_info,
                    subject_alt_name, certificate_policies, wildcard
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            )?;

            for record in batch {
                inserted += stmt.execute(params![
                    record.domain,
                    record.is_apex,
                    record.parent_domain,
                    record.not_before,
                    record.not_after,
                    record.serial_number,
                    record.fingerprint,
                    record.key_usage,
                    record.extended_key_usage,
                    record.subject_key_id,
                    record.authority_key_id,
                    record.authority_info,
                    record.subject_alt_name,
                    record.certificate_policies,
                    record.wildcard,
                ])?;
            }
        }

        tx.commit()?;
        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::schema::init_schema;

    fn writer() -> StoreWriter {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        StoreWriter::new(conn, WriterConfig::default())
    }

    fn record(domain: &str) -> CertRecord {
        CertRecord {
            domain: domain.to_string(),
            not_before: 1700000000,
            not_after: 1731536000,
            serial_number: "0A1B".to_string(),
            fingerprint: "AA:BB".to_string(),
            ..Default::default()
        }
    }

    fn count(writer: &StoreWriter) -> i64 {
        writer
            .conn
            .query_row("SELECT COUNT(*) FROM domains", [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn classification_happens_at_insert() {
        let mut w = writer();
        w.write_batch(vec![record("example.com"), record("a.example.com")]);

        let (is_apex, parent): (bool, String) = w
            .conn
            .query_row(
                "SELECT is_apex, parent_domain FROM domains WHERE domain = 'example.com'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert!(is_apex);
        assert_eq!(parent, "");

        let (is_apex, parent): (bool, String) = w
            .conn
            .query_row(
                "SELECT is_apex, parent_domain FROM domains WHERE domain = 'a.example.com'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert!(!is_apex);
        assert_eq!(parent, "example.com");
    }

    #[test]
    fn second_sighting_of_a_domain_is_ignored() {
        let mut w = writer();

        let mut first = record("example.com");
        first.serial_number = "FIRST".to_string();
        w.write_batch(vec![first]);

        let mut second = record("example.com");
        second.serial_number = "SECOND".to_string();
        w.write_batch(vec![second]);

        assert_eq!(count(&w), 1);
        let serial: String = w
            .conn
            .query_row(
                "SELECT serial_number FROM domains WHERE domain = 'example.com'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(serial, "FIRST");
    }

    #[test]
    fn duplicate_within_one_batch_keeps_first_row() {
        let mut w = writer();
        w.write_batch(vec![record("example.com"), record("example.com")]);
        assert_eq!(count(&w), 1);
    }

    #[test]
    fn wildcard_flag_round_trips() {
        let mut w = writer();
        let mut r = record("example.com");
        r.wildcard = true;
        w.write_batch(vec![r]);

        let wildcard: bool = w
            .conn
            .query_row(
                "SELECT wildcard FROM domains WHERE domain = 'example.com'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert!(wildcard);
    }
}
