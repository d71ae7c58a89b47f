//! TLS configuration for the query service listener.
//!
//! Certificates and keys are provisioned externally; this module only loads
//! them. The protocol defaults of rustls (TLS 1.2 and 1.3) satisfy the
//! minimum-version requirement.

use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::KeyLogFile;

pub use tokio_rustls::rustls::ServerConfig;

const SSLKEYLOGFILE_ENV_VAR_NAME: &str = "SSLKEYLOGFILE";

/// Errors that can occur building the TLS config.
#[derive(Debug, thiserror::Error)]
pub enum TlsConfigError {
    #[error("error in TLS certificate file {path}: {source}")]
    Cert { path: PathBuf, source: io::Error },

    #[error("error in TLS key file {path}: {source}")]
    Key { path: PathBuf, source: io::Error },

    #[error("TLS key file {path} contains no usable private key")]
    NoKey { path: PathBuf },

    #[error("TLS key file {path} contains multiple private keys")]
    MultipleKeys { path: PathBuf },

    #[error("TLS configuration error: {0}")]
    Tls(#[from] tokio_rustls::rustls::Error),
}

/// Creates the TLS server config from PEM files.
pub fn create_server_config(
    key_path: &Path,
    cert_path: &Path,
) -> Result<ServerConfig, TlsConfigError> {
    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(read_certs(cert_path)?, read_key(key_path)?)?;

    // See: https://wiki.wireshark.org/TLS#tls-decryption
    if std::env::var(SSLKEYLOGFILE_ENV_VAR_NAME).is_ok() {
        config.key_log = Arc::new(KeyLogFile::new());
    }

    Ok(config)
}

/// Reads the certificate chain from the given PEM file.
fn read_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsConfigError> {
    let file = File::open(path).map_err(|source| TlsConfigError::Cert {
        path: path.into(),
        source,
    })?;

    rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<_, _>>()
        .map_err(|source| TlsConfigError::Cert {
            path: path.into(),
            source,
        })
}

/// Reads a private key from the given PEM file.
///
/// The key may be a PKCS#1 RSA private key, a PKCS#8 private key, or a
/// SEC1 encoded EC private key. Other PEM items are ignored. Errors out
/// unless the file holds exactly one recognized private key.
fn read_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsConfigError> {
    use rustls_pemfile::Item;

    let file = File::open(path).map_err(|source| TlsConfigError::Key {
        path: path.into(),
        source,
    })?;
    let mut reader = BufReader::new(file);

    let mut key = None;

    while let Some(item) = rustls_pemfile::read_one(&mut reader).transpose() {
        let item = item.map_err(|source| TlsConfigError::Key {
            path: path.into(),
            source,
        })?;

        let bits: PrivateKeyDer<'static> = match item {
            Item::Pkcs1Key(bits) => bits.into(),
            Item::Pkcs8Key(bits) => bits.into(),
            Item::Sec1Key(bits) => bits.into(),
            _ => continue,
        };

        if key.is_some() {
            return Err(TlsConfigError::MultipleKeys { path: path.into() });
        }
        key = Some(bits);
    }

    key.ok_or_else(|| TlsConfigError::NoKey { path: path.into() })
}
