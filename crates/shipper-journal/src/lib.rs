//! systemd-journal-gatewayd follower for journal-shipper

pub mod follower;
pub mod lines;

pub use follower::*;
pub use lines::{LineSplitter, DEFAULT_MAX_LINE_BYTES};
