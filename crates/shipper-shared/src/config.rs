//! Configuration management for journal-shipper

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure for journal-shipper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShipperConfig {
    /// Log every raw record and every checkpoint save
    pub debug: bool,

    /// systemd-journal-gatewayd source
    pub journal: JournalConfig,

    /// Logstash TLS sink
    pub logstash: LogstashConfig,

    /// State file and save throttling
    pub checkpoint: CheckpointConfig,

    /// Backoff for the initial Logstash connection
    pub retry: RetryConfig,

    /// Logging and metrics
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalConfig {
    /// Path to the systemd-journal-gatewayd unix socket
    pub socket: PathBuf,

    /// Request path for following the journal
    pub path: String,

    /// Longest accepted record in bytes; a longer one ends the stream
    pub max_line_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogstashConfig {
    /// host:port of the Logstash TLS server
    pub url: String,

    /// Client TLS key (PEM)
    pub key: PathBuf,

    /// Client TLS certificate (PEM)
    pub cert: PathBuf,

    /// CA bundle used to authenticate the Logstash server (PEM)
    pub ca: PathBuf,

    /// Name to verify the server certificate against; defaults to the host in `url`
    pub server_name: Option<String>,

    /// Deadline for a single write in milliseconds
    pub write_timeout_ms: u64,

    /// Deadline for a single connection attempt in milliseconds
    pub connect_timeout_ms: u64,

    /// Age in seconds after which a connection is replaced before the next write
    pub rotation_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// File holding the last forwarded journal cursor
    pub state_file: PathBuf,

    /// Minimum seconds between two state file writes
    pub save_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Initial delay in milliseconds
    pub initial_delay_ms: u64,

    /// Maximum delay in milliseconds
    pub max_delay_ms: u64,

    /// Backoff multiplier
    pub multiplier: f64,

    /// Maximum jitter in milliseconds
    pub jitter_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Logging configuration
    pub logging: LoggingConfig,

    /// Metrics configuration
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json or pretty)
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Serve Prometheus metrics
    pub enabled: bool,

    /// Prometheus metrics bind address
    pub bind_address: String,
}

impl Default for ShipperConfig {
    fn default() -> Self {
        Self {
            debug: false,
            journal: JournalConfig {
                socket: PathBuf::new(),
                path: "/entries?follow".to_string(),
                max_line_bytes: 1024 * 1024,
            },
            logstash: LogstashConfig {
                url: String::new(),
                key: PathBuf::new(),
                cert: PathBuf::new(),
                ca: PathBuf::new(),
                server_name: None,
                write_timeout_ms: 10_000,
                connect_timeout_ms: 10_000,
                rotation_interval_secs: 60,
            },
            checkpoint: CheckpointConfig {
                state_file: PathBuf::new(),
                save_interval_secs: 15,
            },
            retry: RetryConfig::default(),
            observability: ObservabilityConfig {
                logging: LoggingConfig {
                    level: "info".to_string(),
                    format: "pretty".to_string(),
                },
                metrics: MetricsConfig {
                    enabled: false,
                    bind_address: "0.0.0.0:9090".to_string(),
                },
            },
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 500,
            max_delay_ms: 60_000,
            multiplier: 1.5,
            jitter_ms: 250,
        }
    }
}

impl LogstashConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn rotation_interval(&self) -> Duration {
        Duration::from_secs(self.rotation_interval_secs)
    }
}

impl CheckpointConfig {
    pub fn save_interval(&self) -> Duration {
        Duration::from_secs(self.save_interval_secs)
    }
}

impl ShipperConfig {
    /// Load configuration from `journal-shipper.toml` and environment variables
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("journal-shipper.toml")
    }

    /// Load configuration from a specific file, if it exists.
    ///
    /// Environment variables override the file, e.g. `SHIPPER_LOGSTASH__URL`.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut builder =
            Config::builder().add_source(Config::try_from(&ShipperConfig::default())?);

        if path.as_ref().exists() {
            builder = builder.add_source(File::from(path.as_ref()));
        }

        builder
            .add_source(Self::environment())
            .build()?
            .try_deserialize()
    }

    /// Load configuration from environment variables only
    pub fn load_from_env() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Config::try_from(&ShipperConfig::default())?)
            .add_source(Self::environment())
            .build()?
            .try_deserialize()
    }

    fn environment() -> Environment {
        Environment::with_prefix("SHIPPER")
            .prefix_separator("_")
            .separator("__")
    }

    /// Check that every required setting is present, reporting all missing
    /// ones at once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut missing = Vec::new();
        if self.journal.socket.as_os_str().is_empty() {
            missing.push("journal.socket");
        }
        if self.logstash.url.is_empty() {
            missing.push("logstash.url");
        }
        if self.logstash.key.as_os_str().is_empty() {
            missing.push("logstash.key");
        }
        if self.logstash.cert.as_os_str().is_empty() {
            missing.push("logstash.cert");
        }
        if self.logstash.ca.as_os_str().is_empty() {
            missing.push("logstash.ca");
        }
        if self.checkpoint.state_file.as_os_str().is_empty() {
            missing.push("checkpoint.state_file");
        }
        if !missing.is_empty() {
            return Err(ConfigError::Message(format!(
                "missing required settings: {}",
                missing.join(", ")
            )));
        }

        if self.journal.max_line_bytes == 0 {
            return Err(ConfigError::Message(
                "journal.max_line_bytes must be greater than zero".to_string(),
            ));
        }
        if self.logstash.write_timeout_ms == 0 {
            return Err(ConfigError::Message(
                "logstash.write_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.retry.multiplier < 1.0 {
            return Err(ConfigError::Message(
                "retry.multiplier must be at least 1.0".to_string(),
            ));
        }
        Ok(())
    }
}
