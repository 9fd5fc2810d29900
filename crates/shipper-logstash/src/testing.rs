//! Throwaway certificate authority and a TLS line server for tests.
//!
//! Panics on any setup failure.

use rcgen::{
    BasicConstraints, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
    KeyUsagePurpose, SanType,
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use shipper_shared::LogstashConfig;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;

/// A CA with one server and one client certificate, written as PEM files
/// into a temporary directory.
pub struct TestPki {
    dir: TempDir,
    ca_pem: String,
    server_cert_pem: String,
    server_key_pem: String,
}

impl TestPki {
    pub fn generate() -> Self {
        let ca_key = KeyPair::generate().unwrap();
        let mut ca_params = CertificateParams::new(Vec::<String>::new()).unwrap();
        ca_params
            .distinguished_name
            .push(DnType::CommonName, "journal-shipper test ca");
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        ca_params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        let ca_cert = ca_params.self_signed(&ca_key).unwrap();

        let server_key = KeyPair::generate().unwrap();
        let mut server_params = CertificateParams::new(vec!["localhost".to_string()]).unwrap();
        server_params
            .subject_alt_names
            .push(SanType::IpAddress(IpAddr::V4(Ipv4Addr::LOCALHOST)));
        server_params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        let server_cert = server_params
            .signed_by(&server_key, &ca_cert, &ca_key)
            .unwrap();

        let client_key = KeyPair::generate().unwrap();
        let mut client_params = CertificateParams::new(vec!["journal-shipper".to_string()]).unwrap();
        client_params
            .distinguished_name
            .push(DnType::CommonName, "journal-shipper");
        client_params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
        let client_cert = client_params
            .signed_by(&client_key, &ca_cert, &ca_key)
            .unwrap();

        let pki = Self {
            dir: TempDir::new().unwrap(),
            ca_pem: ca_cert.pem(),
            server_cert_pem: server_cert.pem(),
            server_key_pem: server_key.serialize_pem(),
        };
        pki.write_file("ca.pem", &pki.ca_pem);
        pki.write_file("client.pem", &client_cert.pem());
        pki.write_file("client.key", &client_key.serialize_pem());
        pki
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn write_file(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    /// Client settings pointing at `url` with this PKI's material.
    pub fn logstash_config(&self, url: impl Into<String>) -> LogstashConfig {
        LogstashConfig {
            url: url.into(),
            key: self.dir.path().join("client.key"),
            cert: self.dir.path().join("client.pem"),
            ca: self.dir.path().join("ca.pem"),
            server_name: None,
            write_timeout_ms: 5_000,
            connect_timeout_ms: 5_000,
            rotation_interval_secs: 60,
        }
    }

    /// Server configuration that requires a client certificate from this CA.
    pub fn server_config(&self) -> Arc<ServerConfig> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());

        let mut roots = RootCertStore::empty();
        for cert in rustls_pemfile::certs(&mut self.ca_pem.as_bytes()) {
            roots.add(cert.unwrap()).unwrap();
        }
        let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider.clone())
            .build()
            .unwrap();

        let chain: Vec<CertificateDer<'static>> =
            rustls_pemfile::certs(&mut self.server_cert_pem.as_bytes())
                .collect::<Result<_, _>>()
                .unwrap();
        let key: PrivateKeyDer<'static> =
            rustls_pemfile::private_key(&mut self.server_key_pem.as_bytes())
                .unwrap()
                .unwrap();

        let config = ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_client_cert_verifier(verifier)
            .with_single_cert(chain, key)
            .unwrap();
        Arc::new(config)
    }
}

/// Accepts mutual TLS connections on localhost and reports every received
/// line together with the index of the connection it arrived on.
pub struct LineServer {
    address: SocketAddr,
    lines: mpsc::UnboundedReceiver<(usize, String)>,
    acceptor: JoinHandle<()>,
}

impl LineServer {
    pub async fn start(pki: &TestPki) -> Self {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let address = listener.local_addr().unwrap();
        let acceptor = TlsAcceptor::from(pki.server_config());
        let (tx, lines) = mpsc::unbounded_channel();

        let acceptor = tokio::spawn(async move {
            let mut connection = 0;
            while let Ok((tcp, _)) = listener.accept().await {
                let acceptor = acceptor.clone();
                let tx = tx.clone();
                let index = connection;
                connection += 1;
                tokio::spawn(async move {
                    let Ok(stream) = acceptor.accept(tcp).await else {
                        return;
                    };
                    let mut reader = BufReader::new(stream).lines();
                    while let Ok(Some(line)) = reader.next_line().await {
                        if tx.send((index, line)).is_err() {
                            return;
                        }
                    }
                });
            }
        });

        Self {
            address,
            lines,
            acceptor,
        }
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub async fn next_line(&mut self) -> Option<(usize, String)> {
        self.lines.recv().await
    }
}

impl Drop for LineServer {
    fn drop(&mut self) {
        self.acceptor.abort();
    }
}
