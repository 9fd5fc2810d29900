//! Client TLS material

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ClientConfig, RootCertStore};
use shipper_core::{Result, ShipperError};
use shipper_shared::LogstashConfig;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Build the mutual TLS client configuration from the PEM files named in
/// `config`. Any unreadable or unparsable material is an error.
#[instrument(skip(config), fields(cert = %config.cert.display(), ca = %config.ca.display()))]
pub fn client_config(config: &LogstashConfig) -> Result<Arc<ClientConfig>> {
    let certs = load_certs(&config.cert)?;
    let key = load_private_key(&config.key)?;
    let roots = load_roots(&config.ca)?;
    debug!(chain_len = certs.len(), roots = roots.len(), "Loaded TLS material");

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let tls = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| ShipperError::TlsError(e.to_string()))?
        .with_root_certificates(roots)
        .with_client_auth_cert(certs, key)
        .map_err(|e| ShipperError::TlsError(format!("invalid client certificate or key: {}", e)))?;

    Ok(Arc::new(tls))
}

fn read_pem(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path)
        .map_err(|e| ShipperError::TlsError(format!("unable to read {}: {}", path.display(), e)))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let pem = read_pem(path)?;
    let certs = rustls_pemfile::certs(&mut pem.as_slice())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| {
            ShipperError::TlsError(format!("invalid certificate in {}: {}", path.display(), e))
        })?;

    if certs.is_empty() {
        return Err(ShipperError::TlsError(format!(
            "no certificates found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let pem = read_pem(path)?;
    rustls_pemfile::private_key(&mut pem.as_slice())
        .map_err(|e| {
            ShipperError::TlsError(format!("invalid private key in {}: {}", path.display(), e))
        })?
        .ok_or_else(|| {
            ShipperError::TlsError(format!("no private key found in {}", path.display()))
        })
}

fn load_roots(path: &Path) -> Result<RootCertStore> {
    let pem = read_pem(path)?;
    let certs: Vec<_> = rustls_pemfile::certs(&mut pem.as_slice())
        .filter_map(|cert| cert.ok())
        .collect();

    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(certs);
    if ignored > 0 {
        debug!(ignored, "Skipped unparsable CA certificates");
    }
    if added == 0 {
        return Err(ShipperError::TlsError("failed to parse CA certs".to_string()));
    }
    Ok(roots)
}
