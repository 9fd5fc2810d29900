//! Logstash forwarding client

use async_trait::async_trait;
use shipper_core::{Event, EventSink, Result, ShipperError};
use shipper_shared::{LogstashConfig, RetryExecutor, RetryPolicy, ShipperMetrics};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, instrument, warn};

use crate::Connector;

/// Timing knobs for [`ForwardingClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientSettings {
    /// Deadline for writing one event
    pub write_timeout: Duration,
    /// Connections older than this are replaced before the next write
    pub rotation_interval: Duration,
}

impl From<&LogstashConfig> for ClientSettings {
    fn from(config: &LogstashConfig) -> Self {
        Self {
            write_timeout: config.write_timeout(),
            rotation_interval: config.rotation_interval(),
        }
    }
}

struct Connection<S> {
    stream: S,
    opened_at: Instant,
}

/// Sends events to Logstash as newline-delimited JSON over a single
/// connection.
///
/// The connection is replaced once it is older than the rotation interval.
/// A failed write gets exactly one reconnect and retry before the error is
/// returned.
pub struct ForwardingClient<C: Connector> {
    connector: C,
    settings: ClientSettings,
    connection: Option<Connection<C::Stream>>,
    reconnects: u64,
    closed: bool,
}

impl<C: Connector> ForwardingClient<C> {
    /// Open the first connection, retrying under `retry` until it succeeds
    /// or the policy gives up.
    #[instrument(skip_all)]
    pub async fn connect<P: RetryPolicy>(
        connector: C,
        settings: ClientSettings,
        retry: &RetryExecutor<P>,
    ) -> Result<Self> {
        let connector_ref = &connector;
        let stream = retry.execute(|| connector_ref.connect()).await?;
        ShipperMetrics::connection_opened("initial");
        info!(
            rotation_interval_secs = settings.rotation_interval.as_secs(),
            "Forwarding client ready"
        );

        Ok(Self {
            connector,
            settings,
            connection: Some(Connection {
                stream,
                opened_at: Instant::now(),
            }),
            reconnects: 0,
            closed: false,
        })
    }

    /// Connections opened to recover from a failed write.
    pub fn reconnects(&self) -> u64 {
        self.reconnects
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub fn settings(&self) -> ClientSettings {
        self.settings
    }

    fn rotation_due(&self) -> bool {
        self.connection
            .as_ref()
            .is_some_and(|conn| conn.opened_at.elapsed() >= self.settings.rotation_interval)
    }

    async fn open(&mut self, reason: &'static str) -> Result<()> {
        let stream = self.connector.connect().await?;
        ShipperMetrics::connection_opened(reason);
        self.connection = Some(Connection {
            stream,
            opened_at: Instant::now(),
        });
        Ok(())
    }

    async fn drop_connection(&mut self) {
        if let Some(mut conn) = self.connection.take() {
            match timeout(self.settings.write_timeout, conn.stream.shutdown()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!(error = %e, "Error closing logstash connection"),
                Err(_) => debug!("Timed out closing logstash connection"),
            }
        }
    }

    /// One attempt: connect if needed, then write under the deadline.
    async fn try_write(&mut self, line: &[u8], reason: &'static str) -> Result<()> {
        if self.connection.is_none() {
            self.open(reason).await?;
        }
        let Some(conn) = self.connection.as_mut() else {
            return Err(ShipperError::InternalError(
                "no logstash connection after connecting".to_string(),
            ));
        };

        let write = async {
            conn.stream.write_all(line).await?;
            conn.stream.flush().await
        };
        match timeout(self.settings.write_timeout, write).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ShipperError::ForwardError(format!("write failed: {}", e))),
            Err(_) => Err(ShipperError::ForwardError(format!(
                "write timed out after {:?}",
                self.settings.write_timeout
            ))),
        }
    }
}

#[async_trait]
impl<C: Connector> EventSink for ForwardingClient<C> {
    async fn write(&mut self, event: &Event) -> Result<()> {
        if self.closed {
            return Err(ShipperError::ForwardError("client is closed".to_string()));
        }
        let line = event.to_json_line()?;

        if self.rotation_due() {
            debug!("Rotating logstash connection");
            self.drop_connection().await;
        }

        let reason = if self.connection.is_none() {
            "rotation"
        } else {
            "reconnect"
        };
        let error = match self.try_write(&line, reason).await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };

        warn!(error = %error, "Logstash write failed, reconnecting");
        ShipperMetrics::write_failed();
        self.drop_connection().await;
        self.reconnects += 1;

        if let Err(e) = self.try_write(&line, "reconnect").await {
            ShipperMetrics::write_failed();
            self.drop_connection().await;
            return Err(ShipperError::ForwardError(format!(
                "retry after reconnect failed: {}",
                e
            )));
        }
        Ok(())
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.drop_connection().await;
            info!(reconnects = self.reconnects, "Forwarding client closed");
        }
    }
}
