//! Event sink abstraction

use crate::{Event, Result};
use async_trait::async_trait;

/// Destination that events are forwarded to, one at a time.
///
/// A successful `write` is the only delivery confirmation the pipeline gets.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventSink: Send {
    async fn write(&mut self, event: &Event) -> Result<()>;

    /// Close the connection. Safe to call more than once.
    async fn close(&mut self);
}
