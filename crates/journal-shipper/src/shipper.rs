//! Startup wiring for the shipping pipeline

use shipper_core::{CheckpointStore, Cursor, Pipeline, Result, ShipperError};
use shipper_journal::{Follower, RecordStream};
use shipper_logstash::{ClientSettings, ForwardingClient, TlsConnector};
use shipper_shared::{retry_forever, ShipperConfig, ShipperMetrics};
use std::future::Future;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, instrument, warn};

/// The pipeline as assembled for production use.
pub type ShipperPipeline = Pipeline<RecordStream, ForwardingClient<TlsConnector>>;

/// Owns the validated configuration and builds the pipeline from it.
#[derive(Debug, Clone)]
pub struct Shipper {
    config: ShipperConfig,
}

impl Shipper {
    pub fn new(config: ShipperConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| ShipperError::ConfigError(e.to_string()))?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ShipperConfig {
        &self.config
    }

    /// Load the checkpoint, open the journal at it, then connect to
    /// Logstash. The journal is opened first so a journal failure surfaces
    /// before any TLS work is done.
    #[instrument(skip_all)]
    pub async fn start(&self) -> Result<ShipperPipeline> {
        let store = CheckpointStore::new(&self.config.checkpoint.state_file);
        let cursor = match store.load().await {
            Some(cursor) => {
                info!(cursor = %cursor, "Resuming from saved cursor");
                cursor
            }
            None => {
                info!(path = %store.path().display(), "No saved cursor, starting at journal tail");
                Cursor::tail()
            }
        };

        let records = Follower::new(&self.config.journal)
            .open(&cursor)
            .await?
            .follow();

        let connector = TlsConnector::new(&self.config.logstash)?;
        let client = ForwardingClient::connect(
            connector,
            ClientSettings::from(&self.config.logstash),
            &retry_forever(self.config.retry.clone()),
        )
        .await?;

        Ok(Pipeline::new(records, client, store)
            .with_save_interval(self.config.checkpoint.save_interval())
            .with_metrics(Arc::new(ShipperMetrics))
            .with_debug(self.config.debug))
    }

    /// Start and run the pipeline until it fails or `shutdown` completes.
    /// A shutdown during startup returns `Ok` without running.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        tokio::pin!(shutdown);

        let mut pipeline = tokio::select! {
            biased;
            _ = &mut shutdown => {
                info!("Shutdown requested during startup");
                return Ok(());
            }
            pipeline = self.start() => pipeline?,
        };
        pipeline.run_until(shutdown).await
    }
}

/// Completes on Ctrl-C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Unable to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Unable to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C, shutting down"),
        _ = terminate => info!("Received terminate signal, shutting down"),
    }
}
