//! Server-side TLS configuration shared by DoT, DoH and DoQ.

use crate::error::{Result, TdnsError};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Load a certificate chain and key, or mint a self-signed pair when no
/// files are configured (development mode).
pub fn load_tls_config(
    cert_file: Option<&Path>,
    key_file: Option<&Path>,
    alpn: &[&[u8]],
) -> Result<Arc<rustls::ServerConfig>> {
    let (certs, key) = match (cert_file, key_file) {
        (Some(cert_path), Some(key_path)) => load_pem(cert_path, key_path)?,
        _ => {
            warn!("no TLS certificate configured, generating a self-signed one");
            self_signed()?
        }
    };

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut config = rustls::ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| TdnsError::Config(format!("TLS protocol versions: {}", e)))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| TdnsError::Config(format!("TLS certificate: {}", e)))?;
    config.alpn_protocols = alpn.iter().map(|p| p.to_vec()).collect();
    Ok(Arc::new(config))
}

fn load_pem(
    cert_path: &Path,
    key_path: &Path,
) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)> {
    let cert_pem = std::fs::read(cert_path)
        .map_err(|e| TdnsError::Config(format!("read {}: {}", cert_path.display(), e)))?;
    let certs: Vec<CertificateDer<'static>> =
        rustls_pemfile::certs(&mut cert_pem.as_slice())
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| TdnsError::Config(format!("parse {}: {}", cert_path.display(), e)))?;
    if certs.is_empty() {
        return Err(TdnsError::Config(format!(
            "{} holds no certificates",
            cert_path.display()
        )));
    }

    let key_pem = std::fs::read(key_path)
        .map_err(|e| TdnsError::Config(format!("read {}: {}", key_path.display(), e)))?;
    let key = rustls_pemfile::private_key(&mut key_pem.as_slice())
        .map_err(|e| TdnsError::Config(format!("parse {}: {}", key_path.display(), e)))?
        .ok_or_else(|| TdnsError::Config(format!("{} holds no key", key_path.display())))?;

    info!(cert = %cert_path.display(), "TLS certificate loaded");
    Ok((certs, key))
}

fn self_signed() -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)> {
    let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
        .map_err(|e| TdnsError::Config(format!("self-signed certificate: {}", e)))?;
    let cert = certified.cert.der().clone();
    let key = PrivateKeyDer::try_from(certified.key_pair.serialize_der())
        .map_err(|e| TdnsError::Config(format!("self-signed key: {}", e)))?;
    Ok((vec![cert], key))
}
