//! Server TLS context from PEM files.

use std::path::Path;
use std::sync::Arc;

use rustls::crypto::{ring, CryptoProvider};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};

use common::error::{Error, Result};

use crate::config::WebConfig;

/// `None` when the listener serves plaintext.
///
/// TLS always means mutual TLS: every connection must present a certificate
/// signed by the configured client CA. Certificate and key without a client
/// CA are rejected.
pub fn server_config(web: &WebConfig) -> Result<Option<Arc<ServerConfig>>> {
    let (cert_path, key_path, ca_path) = match (
        &web.server_tls_cert_path,
        &web.server_tls_key_path,
        &web.client_ca_path,
    ) {
        (None, None, None) => return Ok(None),
        (Some(cert), Some(key), Some(ca)) => (cert, key, ca),
        (Some(_), Some(_), None) => {
            return Err(Error::Tls(
                "client_ca_path is required when server_tls_cert_path and server_tls_key_path are set".to_string(),
            ))
        }
        (None, None, Some(_)) => {
            return Err(Error::Tls(
                "client_ca_path requires server_tls_cert_path and server_tls_key_path".to_string(),
            ))
        }
        _ => {
            return Err(Error::Tls(
                "server_tls_cert_path and server_tls_key_path must be set together".to_string(),
            ))
        }
    };

    let provider = Arc::new(ring::default_provider());
    let certs = load_certs(cert_path)?;
    let key = PrivateKeyDer::from_pem_file(key_path)
        .map_err(|e| Error::Tls(format!("failed to read private key {}: {}", key_path.display(), e)))?;

    let builder = ServerConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|e| Error::Tls(e.to_string()))?;
    let mut config = builder
        .with_client_cert_verifier(client_verifier(ca_path, provider)?)
        .with_single_cert(certs, key)
        .map_err(|e| Error::Tls(format!("invalid certificate or key: {}", e)))?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(Some(Arc::new(config)))
}

fn client_verifier(
    ca_path: &Path,
    provider: Arc<CryptoProvider>,
) -> Result<Arc<dyn rustls::server::danger::ClientCertVerifier>> {
    let mut roots = RootCertStore::empty();
    for cert in load_certs(ca_path)? {
        roots
            .add(cert)
            .map_err(|e| Error::Tls(format!("invalid client CA {}: {}", ca_path.display(), e)))?;
    }
    WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider)
        .build()
        .map_err(|e| Error::Tls(format!("client verifier: {}", e)))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let certs = CertificateDer::pem_file_iter(path)
        .and_then(|iter| iter.collect::<std::result::Result<Vec<_>, _>>())
        .map_err(|e| Error::Tls(format!("failed to read certificates {}: {}", path.display(), e)))?;
    if certs.is_empty() {
        return Err(Error::Tls(format!("no certificates found in {}", path.display())));
    }
    Ok(certs)
}
