//! TLS material loading for the listener.

use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::TlsAcceptor;

use crate::error::{ServerError, ServerResult};

/// Builds the listener's TLS acceptor from PEM cert/key files.
pub fn acceptor_from_files(cert_path: &str, key_path: &str) -> ServerResult<TlsAcceptor> {
    let cert_pem = std::fs::read(cert_path)?;
    let key_pem = std::fs::read(key_path)?;
    acceptor_from_pem(&cert_pem, &key_pem)
}

/// Builds a TLS acceptor from in-memory PEM material; the test harness
/// feeds generated certificates through here.
pub fn acceptor_from_pem(cert_pem: &[u8], key_pem: &[u8]) -> ServerResult<TlsAcceptor> {
    let _ = rustls::crypto::ring::default_provider().install_default();
    let certs = load_certs_from_pem(cert_pem)?;
    let key = load_private_key_from_pem(key_pem)?;
    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| ServerError::Tls {
            reason: format!("failed to set server cert: {e}"),
        })?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Loads certificates from PEM-encoded data.
pub fn load_certs_from_pem(pem: &[u8]) -> ServerResult<Vec<CertificateDer<'static>>> {
    let mut certs = Vec::new();
    let mut cursor = std::io::Cursor::new(pem);
    while let Ok(Some(rustls_pemfile::Item::X509Certificate(cert))) =
        rustls_pemfile::read_one(&mut cursor)
    {
        certs.push(cert);
    }
    if certs.is_empty() {
        return Err(ServerError::Tls {
            reason: "no certificates found in PEM".to_string(),
        });
    }
    Ok(certs)
}

/// Loads a private key from PEM-encoded data.
pub fn load_private_key_from_pem(pem: &[u8]) -> ServerResult<PrivateKeyDer<'static>> {
    let mut cursor = std::io::Cursor::new(pem);
    while let Ok(Some(item)) = rustls_pemfile::read_one(&mut cursor) {
        match item {
            rustls_pemfile::Item::Pkcs8Key(key) => return Ok(PrivateKeyDer::Pkcs8(key)),
            rustls_pemfile::Item::Pkcs1Key(key) => return Ok(PrivateKeyDer::Pkcs1(key)),
            rustls_pemfile::Item::Sec1Key(key) => return Ok(PrivateKeyDer::Sec1(key)),
            _ => continue,
        }
    }
    Err(ServerError::Tls {
        reason: "no private key found in PEM".to_string(),
    })
}
