//! Core types, translation and the shipping pipeline for journal-shipper

pub mod checkpoint;
pub mod error;
pub mod event;
pub mod metrics;
pub mod pipeline;
pub mod sink;
pub mod stream;
pub mod translate;

pub use checkpoint::*;
pub use error::*;
pub use event::*;
pub use metrics::*;
pub use pipeline::*;
pub use sink::*;
pub use stream::*;
pub use translate::{translate, JournalValue, MESSAGE_FIELD, TIMESTAMP_FIELD};
