//! Frame decoding and record batching.
//!
//! The upstream envelope is schema-loose: any field may be missing or of an
//! unexpected shape. Frames are decoded into an intermediate shape in which
//! every field is optional, then projected onto strict [`CertRecord`]s. A
//! frame that cannot be decoded is logged and skipped; one bad message is
//! never worth stalling a continuous stream.

use std::collections::HashSet;

use serde::Deserialize;
use thiserror::Error;
use tokio::sync::mpsc;

use certsift_core::CertRecord;

/// Why a frame produced no records.
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no leaf_cert in frame")]
    MissingLeafCert,

    #[error("no all_domains in leaf_cert")]
    MissingDomains,
}

impl FrameError {
    fn reason(&self) -> &'static str {
        match self {
            Self::Json(_) => "json",
            Self::MissingLeafCert => "no_leaf_cert",
            Self::MissingDomains => "no_domains",
        }
    }
}

/// Upstream envelope, every field optional.
#[derive(Debug, Default, Deserialize)]
struct Envelope {
    #[serde(default)]
    data: Option<EnvelopeData>,
}

#[derive(Debug, Default, Deserialize)]
struct EnvelopeData {
    #[serde(default)]
    leaf_cert: Option<LeafCert>,
}

#[derive(Debug, Default, Deserialize)]
struct LeafCert {
    /// SAN entries. Kept as raw values so a single non-string entry does
    /// not invalidate the frame.
    #[serde(default)]
    all_domains: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    not_before: Option<f64>,
    #[serde(default)]
    not_after: Option<f64>,
    #[serde(default)]
    serial_number: Option<String>,
    #[serde(default)]
    fingerprint: Option<String>,
    #[serde(default)]
    extensions: Option<Extensions>,
}

#[derive(Debug, Default, Deserialize)]
struct Extensions {
    #[serde(default, rename = "keyUsage")]
    key_usage: Option<String>,
    #[serde(default, rename = "extendedKeyUsage")]
    extended_key_usage: Option<String>,
    #[serde(default, rename = "subjectKeyIdentifier")]
    subject_key_id: Option<String>,
    #[serde(default, rename = "authorityKeyIdentifier")]
    authority_key_id: Option<String>,
    #[serde(default, rename = "authorityInfoAccess")]
    authority_info: Option<String>,
    #[serde(default, rename = "subjectAltName")]
    subject_alt_name: Option<String>,
    #[serde(default, rename = "certificatePolicies")]
    certificate_policies: Option<String>,
}

/// Extract the domain records carried by one raw frame.
///
/// SAN entries of the form `*.domain` mark the bare `domain` as
/// wildcard-covered and are not emitted as records of their own.
pub fn parse_frame(frame: &str) -> Result<Vec<CertRecord>, FrameError> {
    let envelope: Envelope = serde_json::from_str(frame)?;

    let leaf = envelope
        .data
        .and_then(|d| d.leaf_cert)
        .ok_or(FrameError::MissingLeafCert)?;

    let entries = leaf.all_domains.as_ref().ok_or(FrameError::MissingDomains)?;

    let wildcard_shadow: HashSet<&str> = entries
        .iter()
        .filter_map(|v| v.as_str())
        .filter_map(|d| d.strip_prefix("*."))
        .collect();

    let extensions = leaf.extensions.unwrap_or_default();

    let records = entries
        .iter()
        .filter_map(|v| v.as_str())
        .filter(|d| !d.starts_with("*."))
        .map(|domain| CertRecord {
            domain: domain.to_string(),
            not_before: leaf.not_before.unwrap_or_default() as i64,
            not_after: leaf.not_after.unwrap_or_default() as i64,
            serial_number: leaf.serial_number.clone().unwrap_or_default(),
            fingerprint: leaf.fingerprint.clone().unwrap_or_default(),
            key_usage: extensions.key_usage.clone().unwrap_or_default(),
            extended_key_usage: extensions.extended_key_usage.clone().unwrap_or_default(),
            subject_key_id: extensions.subject_key_id.clone().unwrap_or_default(),
            authority_key_id: extensions.authority_key_id.clone().unwrap_or_default(),
            authority_info: extensions.authority_info.clone().unwrap_or_default(),
            subject_alt_name: extensions.subject_alt_name.clone().unwrap_or_default(),
            certificate_policies: extensions.certificate_policies.clone().unwrap_or_default(),
            wildcard: wildcard_shadow.contains(domain),
            ..Default::default()
        })
        .collect();

    Ok(records)
}

/// Message processor: raw frames in, record batches out.
///
/// Batches are exactly `batch_size` records; the final partial batch is
/// flushed when the frame queue closes. The batch channel is bounded, so a
/// slow writer blocks the processor here — intended backpressure.
pub struct Processor {
    frames: mpsc::Receiver<String>,
    batches: crossbeam_channel::Sender<Vec<CertRecord>>,
    batch_size: usize,
}

impl Processor {
    pub fn new(
        frames: mpsc::Receiver<String>,
        batches: crossbeam_channel::Sender<Vec<CertRecord>>,
        batch_size: usize,
    ) -> Self {
        Self {
            frames,
            batches,
            batch_size,
        }
    }

    /// Run until the frame queue closes, then flush the partial batch.
    pub async fn run(mut self) {
        let mut buffer: Vec<CertRecord> = Vec::with_capacity(self.batch_size);

        while let Some(frame) = self.frames.recv().await {
            let records = match parse_frame(&frame) {
                Ok(records) => records,
                Err(e) => {
                    tracing::debug!(error = %e, "skipping frame");
                    metrics::counter!("processor_frames_skipped_total", "reason" => e.reason())
                        .increment(1);
                    continue;
                }
            };

            metrics::counter!("processor_records_total").increment(records.len() as u64);

            for record in records {
                buffer.push(record);
                if buffer.len() >= self.batch_size {
                    let batch =
                        std::mem::replace(&mut buffer, Vec::with_capacity(self.batch_size));
                    metrics::counter!("processor_batches_total").increment(1);
                    if self.batches.send(batch).is_err() {
                        tracing::error!("batch channel closed, stopping processor");
                        return;
                    }
                }
            }
        }

        if !buffer.is_empty() {
            tracing::info!(records = buffer.len(), "flushing partial batch");
            metrics::counter!("processor_batches_total").increment(1);
            if self.batches.send(buffer).is_err() {
                tracing::error!("batch channel closed, partial batch lost");
            }
        }

        tracing::info!("message processor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(domains: &[&str]) -> String {
        let list: Vec<String> = domains.iter().map(|d| format!("\"{d}\"")).collect();
        format!(
            r#"{{
                "message_type": "certificate_update",
                "data": {{
                    "leaf_cert": {{
                        "all_domains": [{}],
                        "not_before": 1700000000,
                        "not_after": 1731536000,
                        "serial_number": "0A1B",
                        "fingerprint": "AA:BB",
                        "extensions": {{
                            "keyUsage": "Digital Signature",
                            "extendedKeyUsage": "TLS Web Server Authentication",
                            "subjectKeyIdentifier": "ski",
                            "authorityKeyIdentifier": "aki",
                            "authorityInfoAccess": "aia",
                            "subjectAltName": "san",
                            "certificatePolicies": "cp"
                        }}
                    }}
                }}
            }}"#,
            list.join(",")
        )
    }

    #[test]
    fn wildcard_shadows_bare_domain() {
        let records =
            parse_frame(&frame(&["example.com", "*.example.com", "a.example.com"])).unwrap();

        assert_eq!(records.len(), 2);

        let apex = &records[0];
        assert_eq!(apex.domain, "example.com");
        assert!(apex.wildcard);
        assert_eq!(apex.not_before, 1700000000);
        assert_eq!(apex.serial_number, "0A1B");
        assert_eq!(apex.key_usage, "Digital Signature");

        let sub = &records[1];
        assert_eq!(sub.domain, "a.example.com");
        assert!(!sub.wildcard);
    }

    #[test]
    fn bare_domain_alone_is_not_wildcard() {
        let records = parse_frame(&frame(&["example.com"])).unwrap();
        assert_eq!(records.len(), 1);
        assert!(!records[0].wildcard);
    }

    #[test]
    fn missing_extensions_become_empty_strings() {
        let raw = r#"{"data":{"leaf_cert":{"all_domains":["x.com"],"not_before":1,"not_after":2}}}"#;
        let records = parse_frame(raw).unwrap();
        assert_eq!(records[0].key_usage, "");
        assert_eq!(records[0].subject_alt_name, "");
        assert_eq!(records[0].serial_number, "");
    }

    #[test]
    fn non_string_san_entries_are_ignored() {
        let raw = r#"{"data":{"leaf_cert":{"all_domains":["x.com", 42, null]}}}"#;
        let records = parse_frame(raw).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].domain, "x.com");
    }

    #[test]
    fn malformed_frames_are_rejected_not_panicked() {
        assert!(matches!(parse_frame("not json"), Err(FrameError::Json(_))));
        assert!(matches!(
            parse_frame(r#"{"data":{}}"#),
            Err(FrameError::MissingLeafCert)
        ));
        assert!(matches!(
            parse_frame(r#"{"data":{"leaf_cert":{}}}"#),
            Err(FrameError::MissingDomains)
        ));
    }

    #[tokio::test]
    async fn batches_are_cut_exactly_at_batch_size() {
        let (frame_tx, frame_rx) = mpsc::channel(16);
        let (batch_tx, batch_rx) = crossbeam_channel::bounded(16);
        let processor = Processor::new(frame_rx, batch_tx, 3);

        for i in 0..7 {
            frame_tx.send(frame(&[&format!("d{i}.example.com")])).await.unwrap();
        }
        drop(frame_tx);

        processor.run().await;

        let sizes: Vec<usize> = batch_rx.try_iter().map(|b| b.len()).collect();
        assert_eq!(sizes, vec![3, 3, 1]);
    }

    #[tokio::test]
    async fn malformed_frames_do_not_stall_batching() {
        let (frame_tx, frame_rx) = mpsc::channel(16);
        let (batch_tx, batch_rx) = crossbeam_channel::bounded(16);
        let processor = Processor::new(frame_rx, batch_tx, 2);

        frame_tx.send(frame(&["a.example.com"])).await.unwrap();
        frame_tx.send("garbage".to_string()).await.unwrap();
        frame_tx.send(frame(&["b.example.com"])).await.unwrap();
        drop(frame_tx);

        processor.run().await;

        let batches: Vec<Vec<CertRecord>> = batch_rx.try_iter().collect();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 2);
    }
}
