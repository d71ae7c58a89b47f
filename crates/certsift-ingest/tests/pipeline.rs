//! End-to-end pipeline tests: synthetic frames through the processor and
//! writer into a scratch database.

use rusqlite::Connection;
use tokio::sync::mpsc;

use certsift_core::CertRecord;
use certsift_ingest::store::{self, StoreWriter, WriterConfig};
use certsift_ingest::Processor;

fn frame(domain: &str) -> String {
    format!(
        r#"{{"message_type":"certificate_update","data":{{"leaf_cert":{{
            "all_domains":["{domain}"],
            "not_before":1700000000,"not_after":1731536000,
            "serial_number":"0A1B","fingerprint":"AA:BB"
        }}}}}}"#
    )
}

fn row_count(path: &std::path::Path) -> i64 {
    let conn = Connection::open(path).unwrap();
    conn.query_row("SELECT COUNT(*) FROM domains", [], |row| row.get(0))
        .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn full_batches_and_remainder_all_reach_the_store() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("certsift.db");

    let conn = store::open(&db_path).unwrap();
    let (batch_tx, batch_rx) = crossbeam_channel::bounded::<Vec<CertRecord>>(100);
    let (frame_tx, frame_rx) = mpsc::channel::<String>(100);

    // Counting relay between processor and writer to observe batch sizes.
    let (observed_tx, observed_rx) = crossbeam_channel::bounded::<Vec<CertRecord>>(100);
    let relay = std::thread::spawn(move || {
        let mut sizes = Vec::new();
        for batch in batch_rx.iter() {
            sizes.push(batch.len());
            observed_tx.send(batch).unwrap();
        }
        sizes
    });

    let writer = StoreWriter::new(conn, WriterConfig::default()).start(observed_rx);
    let processor = tokio::spawn(Processor::new(frame_rx, batch_tx, 1000).run());

    for i in 0..1500 {
        frame_tx.send(frame(&format!("host{i:04}.example.com"))).await.unwrap();
    }
    drop(frame_tx);

    processor.await.unwrap();
    let sizes = relay.join().unwrap();
    writer.join().unwrap();

    assert_eq!(sizes, vec![1000, 500]);
    assert_eq!(row_count(&db_path), 1500);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn partial_batch_is_committed_when_the_stream_ends() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("certsift.db");

    let conn = store::open(&db_path).unwrap();
    let (batch_tx, batch_rx) = crossbeam_channel::bounded::<Vec<CertRecord>>(100);
    let (frame_tx, frame_rx) = mpsc::channel::<String>(100);

    let writer = StoreWriter::new(conn, WriterConfig::default()).start(batch_rx);
    let processor = tokio::spawn(Processor::new(frame_rx, batch_tx, 1000).run());

    // Well short of a full batch; everything must come from the final flush.
    for i in 0..300 {
        frame_tx.send(frame(&format!("host{i:04}.example.com"))).await.unwrap();
    }
    drop(frame_tx);

    processor.await.unwrap();
    writer.join().unwrap();

    assert_eq!(row_count(&db_path), 300);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn wildcard_and_subdomain_classification_survive_the_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("certsift.db");

    let conn = store::open(&db_path).unwrap();
    let (batch_tx, batch_rx) = crossbeam_channel::bounded::<Vec<CertRecord>>(100);
    let (frame_tx, frame_rx) = mpsc::channel::<String>(100);

    let writer = StoreWriter::new(conn, WriterConfig::default()).start(batch_rx);
    let processor = tokio::spawn(Processor::new(frame_rx, batch_tx, 1000).run());

    frame_tx
        .send(
            r#"{"data":{"leaf_cert":{
                "all_domains":["example.com","*.example.com","a.example.com"],
                "not_before":1700000000,"not_after":1731536000,
                "serial_number":"0A1B","fingerprint":"AA:BB"
            }}}"#
                .to_string(),
        )
        .await
        .unwrap();
    drop(frame_tx);

    processor.await.unwrap();
    writer.join().unwrap();

    let conn = Connection::open(&db_path).unwrap();

    let (is_apex, parent, wildcard): (bool, String, bool) = conn
        .query_row(
            "SELECT is_apex, parent_domain, wildcard FROM domains WHERE domain = 'example.com'",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .unwrap();
    assert!(is_apex);
    assert_eq!(parent, "");
    assert!(wildcard);

    let (is_apex, parent, wildcard): (bool, String, bool) = conn
        .query_row(
            "SELECT is_apex, parent_domain, wildcard FROM domains WHERE domain = 'a.example.com'",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .unwrap();
    assert!(!is_apex);
    assert_eq!(parent, "example.com");
    assert!(!wildcard);

    let total: i64 = conn
        .query_row("SELECT COUNT(*) FROM domains", [], |row| row.get(0))
        .unwrap();
    assert_eq!(total, 2);
}
