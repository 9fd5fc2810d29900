//! `journal-shipper`: follows systemd-journal-gatewayd and forwards every
//! entry to Logstash over mutual TLS, resuming from a saved cursor.

pub mod cli;
pub mod shipper;

pub use cli::Cli;
pub use shipper::{shutdown_signal, Shipper};
