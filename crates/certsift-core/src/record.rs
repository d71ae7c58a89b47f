//! The canonical certificate fact extracted from the CT stream.
//!
//! One [`CertRecord`] is produced per non-wildcard SAN entry of an observed
//! leaf certificate. Records are created by the message processor, classified
//! and persisted once by the store writer, and read-only thereafter.

use chrono::DateTime;
use serde::{Deserialize, Serialize};

/// A single domain sighting extracted from a certificate update.
///
/// `is_apex` and `parent_domain` are derived by the writer at insert time;
/// the processor leaves them at their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CertRecord {
    pub domain: String,
    pub is_apex: bool,
    pub parent_domain: String,
    /// Validity start, seconds since epoch.
    pub not_before: i64,
    /// Validity end, seconds since epoch.
    pub not_after: i64,
    pub serial_number: String,
    pub fingerprint: String,
    pub key_usage: String,
    pub extended_key_usage: String,
    pub subject_key_id: String,
    pub authority_key_id: String,
    pub authority_info: String,
    pub subject_alt_name: String,
    pub certificate_policies: String,
    /// True iff the certificate's SAN list also carried `*.domain`.
    pub wildcard: bool,
}

/// API projection of a [`CertRecord`].
///
/// `not_before` is rendered as RFC 3339; the raw epoch fields are not
/// exposed, and neither is `not_after`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertUpdate {
    pub domain: String,
    pub is_apex: bool,
    pub parent_domain: String,
    pub not_before: String,
    pub serial_number: String,
    pub fingerprint: String,
    pub key_usage: String,
    pub extended_key_usage: String,
    pub subject_key_id: String,
    pub authority_key_id: String,
    pub authority_info: String,
    pub subject_alt_name: String,
    pub certificate_policies: String,
    pub wildcard: bool,
}

impl From<CertRecord> for CertUpdate {
    fn from(r: CertRecord) -> Self {
        let not_before = DateTime::from_timestamp(r.not_before, 0)
            .map(|t| t.to_rfc3339())
            .unwrap_or_default();

        Self {
            domain: r.domain,
            is_apex: r.is_apex,
            parent_domain: r.parent_domain,
            not_before,
            serial_number: r.serial_number,
            fingerprint: r.fingerprint,
            key_usage: r.key_usage,
            extended_key_usage: r.extended_key_usage,
            subject_key_id: r.subject_key_id,
            authority_key_id: r.authority_key_id,
            authority_info: r.authority_info,
            subject_alt_name: r.subject_alt_name,
            certificate_policies: r.certificate_policies,
            wildcard: r.wildcard,
        }
    }
}

/// A domain together with the subdomains recorded under it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainGroup {
    pub domain: String,
    pub subdomains: Vec<String>,
}

/// Whether a domain is an apex domain.
///
/// A domain is apex iff its dot-separated label count is exactly two
/// (`example.com` is apex, `a.example.com` is not). This intentionally
/// misclassifies multi-label public suffixes such as `co.uk`; a Public
/// Suffix List lookup can replace this rule without touching callers.
pub fn is_apex_domain(domain: &str) -> bool {
    domain.split('.').count() == 2
}

/// The parent of a non-apex domain: its last two labels joined.
///
/// Returns the empty string for apex and single-label domains.
pub fn parent_domain(domain: &str) -> String {
    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() > 2 {
        labels[labels.len() - 2..].join(".")
    } else {
        String::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apex_is_exactly_two_labels() {
        assert!(is_apex_domain("example.com"));
        assert!(!is_apex_domain("a.example.com"));
        assert!(!is_apex_domain("deep.a.example.com"));
        assert!(!is_apex_domain("localhost"));
    }

    #[test]
    fn parent_of_subdomain_is_last_two_labels() {
        assert_eq!(parent_domain("a.example.com"), "example.com");
        assert_eq!(parent_domain("deep.a.example.com"), "example.com");
    }

    #[test]
    fn apex_and_single_label_have_no_parent() {
        assert_eq!(parent_domain("example.com"), "");
        assert_eq!(parent_domain("localhost"), "");
    }

    #[test]
    fn parent_is_suffix_of_domain() {
        for domain in ["a.example.com", "x.y.other.net", "example.com"] {
            let parent = parent_domain(domain);
            assert!(domain.ends_with(&parent));
        }
    }

    #[test]
    fn cert_update_renders_rfc3339() {
        let record = CertRecord {
            domain: "example.com".to_string(),
            not_before: 1700000000,
            not_after: 1731536000,
            ..Default::default()
        };

        let update = CertUpdate::from(record);
        assert_eq!(update.not_before, "2023-11-14T22:13:20+00:00");

        let json = serde_json::to_value(&update).unwrap();
        assert!(json.get("not_after").is_none());
        assert_eq!(json["not_before"], "2023-11-14T22:13:20+00:00");
    }
}
