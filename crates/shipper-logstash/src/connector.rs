//! Opening connections to Logstash

use async_trait::async_trait;
use rustls::pki_types::ServerName;
use shipper_core::{Result, ShipperError};
use shipper_shared::LogstashConfig;
use std::time::Duration;
use tokio::io::AsyncWrite;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::client::TlsStream;
use tracing::{debug, info};

use crate::tls::client_config;

/// Opens one fresh connection per call.
#[async_trait]
pub trait Connector: Send + Sync {
    type Stream: AsyncWrite + Unpin + Send;

    async fn connect(&self) -> Result<Self::Stream>;
}

/// Mutual TLS over TCP.
pub struct TlsConnector {
    address: String,
    server_name: ServerName<'static>,
    connector: tokio_rustls::TlsConnector,
    connect_timeout: Duration,
}

impl std::fmt::Debug for TlsConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConnector")
            .field("address", &self.address)
            .field("server_name", &self.server_name)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

impl TlsConnector {
    /// Load the TLS material and resolve the name to verify. Fails on bad
    /// material or an unusable server name; does not touch the network.
    pub fn new(config: &LogstashConfig) -> Result<Self> {
        let tls = client_config(config)?;

        let name = match &config.server_name {
            Some(name) => name.clone(),
            None => host_of(&config.url)?.to_string(),
        };
        let server_name = ServerName::try_from(name.clone()).map_err(|e| {
            ShipperError::TlsError(format!("invalid server name {:?}: {}", name, e))
        })?;

        Ok(Self {
            address: config.url.clone(),
            server_name,
            connector: tokio_rustls::TlsConnector::from(tls),
            connect_timeout: config.connect_timeout(),
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

/// Host part of a `host:port` address, without IPv6 brackets.
fn host_of(address: &str) -> Result<&str> {
    let (host, port) = address.rsplit_once(':').ok_or_else(|| {
        ShipperError::ConfigError(format!("logstash address {:?} has no port", address))
    })?;
    if host.is_empty() || port.parse::<u16>().is_err() {
        return Err(ShipperError::ConfigError(format!(
            "logstash address {:?} is not host:port",
            address
        )));
    }
    Ok(host.trim_start_matches('[').trim_end_matches(']'))
}

#[async_trait]
impl Connector for TlsConnector {
    type Stream = TlsStream<TcpStream>;

    async fn connect(&self) -> Result<Self::Stream> {
        let tcp = timeout(self.connect_timeout, TcpStream::connect(&self.address))
            .await
            .map_err(|_| {
                ShipperError::ConnectionError(format!("timed out connecting to {}", self.address))
            })?
            .map_err(|e| {
                ShipperError::ConnectionError(format!(
                    "unable to connect to {}: {}",
                    self.address, e
                ))
            })?;
        let peer = tcp.peer_addr().ok();
        debug!(address = %self.address, peer = ?peer, "TCP connection established");

        let stream = timeout(
            self.connect_timeout,
            self.connector.connect(self.server_name.clone(), tcp),
        )
        .await
        .map_err(|_| {
            ShipperError::ConnectionError(format!("TLS handshake with {} timed out", self.address))
        })?
        .map_err(|e| {
            ShipperError::ConnectionError(format!(
                "TLS handshake with {} failed: {}",
                self.address, e
            ))
        })?;

        info!(address = %self.address, peer = ?peer, "Connected to logstash server");
        Ok(stream)
    }
}
