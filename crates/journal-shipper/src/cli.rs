//! Command line interface

use anyhow::Context;
use clap::Parser;
use shipper_shared::ShipperConfig;
use std::path::PathBuf;

/// Ship systemd journal entries to Logstash over mutual TLS.
///
/// Settings come from the optional config file, then `SHIPPER_*`
/// environment variables, then these flags.
#[derive(Debug, Parser)]
#[command(name = "journal-shipper", version, about, long_about = None)]
pub struct Cli {
    /// TOML configuration file
    #[arg(long, env = "JOURNAL_SHIPPER_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable debug output
    #[arg(short, long, env = "JOURNAL_SHIPPER_DEBUG")]
    pub debug: bool,

    /// Path to systemd-journal-gatewayd unix socket
    #[arg(short, long, env = "JOURNAL_SHIPPER_SOCKET")]
    pub socket: Option<PathBuf>,

    /// host:port of the Logstash TLS server
    #[arg(short, long, env = "JOURNAL_SHIPPER_URL")]
    pub url: Option<String>,

    /// Path to client TLS key to use when contacting the Logstash server
    #[arg(short, long, env = "JOURNAL_SHIPPER_TLS_KEY")]
    pub key: Option<PathBuf>,

    /// Path to client TLS cert to use when contacting the Logstash server
    #[arg(short, long, env = "JOURNAL_SHIPPER_TLS_CERT")]
    pub cert: Option<PathBuf>,

    /// Path to CA bundle for authenticating the Logstash TLS server
    #[arg(short = 'a', long, env = "JOURNAL_SHIPPER_TLS_CA")]
    pub ca: Option<PathBuf>,

    /// Network timeout (seconds) for connections to Logstash
    #[arg(short = 'o', long, env = "JOURNAL_SHIPPER_TIMEOUT", value_name = "SECONDS")]
    pub timeout: Option<f64>,

    /// Path to file to save state between invocations
    #[arg(short = 't', long = "state", env = "JOURNAL_SHIPPER_STATE_FILE")]
    pub state_file: Option<PathBuf>,

    /// Serve Prometheus metrics on this address
    #[arg(long, env = "JOURNAL_SHIPPER_METRICS_ADDRESS", value_name = "ADDR")]
    pub metrics_address: Option<String>,
}

impl Cli {
    /// Load the configuration and apply the flags on top of it.
    pub fn load_config(&self) -> anyhow::Result<ShipperConfig> {
        let mut config = match &self.config {
            Some(path) => {
                if !path.exists() {
                    anyhow::bail!("config file {} does not exist", path.display());
                }
                ShipperConfig::load_from_file(path)
                    .with_context(|| format!("unable to load {}", path.display()))?
            }
            None => ShipperConfig::load_from_env().context("unable to load configuration")?,
        };
        self.apply(&mut config);
        Ok(config)
    }

    /// Override `config` with every flag that was given.
    pub fn apply(&self, config: &mut ShipperConfig) {
        if self.debug {
            config.debug = true;
        }
        if let Some(socket) = &self.socket {
            config.journal.socket = socket.clone();
        }
        if let Some(url) = &self.url {
            config.logstash.url = url.clone();
        }
        if let Some(key) = &self.key {
            config.logstash.key = key.clone();
        }
        if let Some(cert) = &self.cert {
            config.logstash.cert = cert.clone();
        }
        if let Some(ca) = &self.ca {
            config.logstash.ca = ca.clone();
        }
        if let Some(seconds) = self.timeout {
            let millis = (seconds.max(0.0) * 1000.0).round() as u64;
            config.logstash.write_timeout_ms = millis;
            config.logstash.connect_timeout_ms = millis;
        }
        if let Some(state_file) = &self.state_file {
            config.checkpoint.state_file = state_file.clone();
        }
        if let Some(address) = &self.metrics_address {
            config.observability.metrics.enabled = true;
            config.observability.metrics.bind_address = address.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_ARGS: &[&str] = &[
        "journal-shipper",
        "-d",
        "-s",
        "/run/journald.sock",
        "-u",
        "logstash.internal:6514",
        "-k",
        "/tls/client.key",
        "-c",
        "/tls/client.crt",
        "-a",
        "/tls/ca.crt",
        "-o",
        "2.5",
        "-t",
        "/var/lib/journal-shipper/state",
    ];

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::try_parse_from(FULL_ARGS).unwrap();
        let mut config = ShipperConfig::default();
        cli.apply(&mut config);

        assert!(config.debug);
        assert_eq!(config.journal.socket, PathBuf::from("/run/journald.sock"));
        assert_eq!(config.logstash.url, "logstash.internal:6514");
        assert_eq!(config.logstash.key, PathBuf::from("/tls/client.key"));
        assert_eq!(config.logstash.cert, PathBuf::from("/tls/client.crt"));
        assert_eq!(config.logstash.ca, PathBuf::from("/tls/ca.crt"));
        assert_eq!(config.logstash.write_timeout_ms, 2_500);
        assert_eq!(config.logstash.connect_timeout_ms, 2_500);
        assert_eq!(
            config.checkpoint.state_file,
            PathBuf::from("/var/lib/journal-shipper/state")
        );
        assert!(!config.observability.metrics.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_absent_flags_keep_config() {
        let cli = Cli::try_parse_from(["journal-shipper", "--metrics-address", "127.0.0.1:9100"])
            .unwrap();
        let mut config = ShipperConfig::default();
        config.logstash.url = "from-file:6514".to_string();
        cli.apply(&mut config);

        assert_eq!(config.logstash.url, "from-file:6514");
        assert_eq!(config.logstash.write_timeout_ms, 10_000);
        assert!(config.observability.metrics.enabled);
        assert_eq!(config.observability.metrics.bind_address, "127.0.0.1:9100");
    }

    #[test]
    fn test_missing_config_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let missing = dir.path().join("absent.toml");
        let cli = Cli::try_parse_from([
            "journal-shipper",
            "--config",
            missing.to_str().unwrap(),
        ])
        .unwrap();

        assert!(cli.load_config().is_err());
    }
}
