//! Mutual TLS Logstash forwarding client for journal-shipper

pub mod client;
pub mod connector;
pub mod tls;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use client::*;
pub use connector::*;
pub use tls::client_config;
