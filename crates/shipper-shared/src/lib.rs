//! Configuration, retry policies and observability for journal-shipper

pub mod config;
pub mod observability;
pub mod retry;

pub use config::*;
pub use observability::*;
pub use retry::*;
