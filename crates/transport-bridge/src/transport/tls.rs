//! rustls configuration for both ends of the bridge.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use axum_server::tls_rustls::RustlsConfig;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};

use crate::errors::{BridgeError, Result};

/// Install the process-wide crypto provider. Later calls are no-ops.
pub fn install_crypto_provider() {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

/// Client config trusting the WebPKI roots, with an optional client identity.
pub fn client_config(cert: Option<&Path>, key: Option<&Path>) -> Result<rustls::ClientConfig> {
    install_crypto_provider();
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let builder = rustls::ClientConfig::builder().with_root_certificates(roots);
    match (cert, key) {
        (Some(cert), Some(key)) => builder
            .with_client_auth_cert(load_certs(cert)?, load_key(key)?)
            .map_err(|e| BridgeError::Tls(e.to_string())),
        _ => Ok(builder.with_no_client_auth()),
    }
}

/// Server config from PEM files.
pub async fn server_config(cert: &Path, key: &Path) -> Result<RustlsConfig> {
    install_crypto_provider();
    RustlsConfig::from_pem_file(cert, key)
        .await
        .map_err(|e| BridgeError::Tls(format!("load {}: {e}", cert.display())))
}

/// Read every certificate in a PEM file.
pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let mut reader = open(path)?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| BridgeError::Tls(format!("parse {}: {e}", path.display())))?;
    if certs.is_empty() {
        return Err(BridgeError::Tls(format!("no certificates in {}", path.display())));
    }
    Ok(certs)
}

/// Read the first private key in a PEM file.
pub fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let mut reader = open(path)?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| BridgeError::Tls(format!("parse {}: {e}", path.display())))?
        .ok_or_else(|| BridgeError::Tls(format!("no private key in {}", path.display())))
}

fn open(path: &Path) -> Result<BufReader<File>> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| BridgeError::Tls(format!("open {}: {e}", path.display())))
}
