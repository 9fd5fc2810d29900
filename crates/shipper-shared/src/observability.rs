//! Logging and metrics setup

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::OnceCell;
use shipper_core::PipelineMetrics;
use std::net::SocketAddr;
use tracing::{info, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LoggingConfig, MetricsConfig, ObservabilityConfig};

/// Global observability system
static OBSERVABILITY: OnceCell<ObservabilitySystem> = OnceCell::new();

/// Process-wide logging and metrics state
#[derive(Debug)]
pub struct ObservabilitySystem {
    metrics_enabled: bool,
    debug: bool,
}

impl ObservabilitySystem {
    /// Initialize logging and, when enabled, the Prometheus exporter.
    ///
    /// `debug_enabled` forces the log level to `debug` regardless of the
    /// configured level. Must be called from within a tokio runtime when
    /// metrics are enabled.
    pub fn init(config: &ObservabilityConfig, debug_enabled: bool) -> anyhow::Result<()> {
        let system = Self {
            metrics_enabled: config.metrics.enabled,
            debug: debug_enabled,
        };

        Self::init_logging(&config.logging, debug_enabled)?;

        if config.metrics.enabled {
            Self::init_metrics(&config.metrics)?;
        }

        OBSERVABILITY
            .set(system)
            .map_err(|_| anyhow::anyhow!("Observability system already initialized"))?;

        info!(
            metrics_enabled = config.metrics.enabled,
            debug = debug_enabled,
            "Observability system initialized"
        );
        Ok(())
    }

    fn init_logging(config: &LoggingConfig, debug: bool) -> anyhow::Result<()> {
        let env_filter = EnvFilter::builder()
            .with_default_directive(log_level(&config.level, debug).into())
            .from_env_lossy();

        let registry = tracing_subscriber::registry().with(env_filter);

        let result = match config.format.to_lowercase().as_str() {
            "json" => registry
                .with(tracing_subscriber::fmt::layer().json())
                .try_init(),
            _ => registry
                .with(tracing_subscriber::fmt::layer().pretty())
                .try_init(),
        };
        result.map_err(|e| anyhow::anyhow!("Unable to install log subscriber: {}", e))
    }

    fn init_metrics(config: &MetricsConfig) -> anyhow::Result<()> {
        let bind_addr: SocketAddr = config.bind_address.parse()?;

        PrometheusBuilder::new()
            .with_http_listener(bind_addr)
            .install()?;

        info!(address = %bind_addr, "Prometheus metrics listening");
        Ok(())
    }

    /// Get the global observability system
    pub fn get() -> Option<&'static ObservabilitySystem> {
        OBSERVABILITY.get()
    }

    pub fn metrics_enabled(&self) -> bool {
        self.metrics_enabled
    }

    pub fn debug(&self) -> bool {
        self.debug
    }
}

fn log_level(level: &str, debug: bool) -> Level {
    if debug {
        return Level::DEBUG;
    }
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Shipper metrics published through the `metrics` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct ShipperMetrics;

impl ShipperMetrics {
    pub const MESSAGES_READ: &'static str = "shipper_messages_read_total";
    pub const MESSAGES_SENT: &'static str = "shipper_messages_sent_total";
    pub const PARSE_FAILURES: &'static str = "shipper_message_parse_fail_total";
    pub const SECONDS_BEHIND: &'static str = "shipper_seconds_behind";
    pub const CONNECTIONS: &'static str = "shipper_logstash_connections_total";
    pub const WRITE_FAILURES: &'static str = "shipper_logstash_write_failures_total";

    /// A new Logstash connection was opened. `reason` is one of `initial`,
    /// `rotation` or `reconnect`.
    pub fn connection_opened(reason: &'static str) {
        counter!(Self::CONNECTIONS, "reason" => reason).increment(1);
    }

    pub fn write_failed() {
        counter!(Self::WRITE_FAILURES).increment(1);
    }
}

impl PipelineMetrics for ShipperMetrics {
    fn record_read(&self) {
        counter!(Self::MESSAGES_READ).increment(1);
    }

    fn record_forwarded(&self) {
        counter!(Self::MESSAGES_SENT).increment(1);
    }

    fn parse_failure(&self) {
        counter!(Self::PARSE_FAILURES).increment(1);
    }

    fn seconds_behind(&self, seconds: f64) {
        gauge!(Self::SECONDS_BEHIND).set(seconds);
    }
}
