//! Record source abstraction

use crate::RawRecord;
use async_trait::async_trait;

/// A stream of raw journal records feeding the pipeline.
#[async_trait]
pub trait RecordSource: Send {
    /// Wait for the next record. Once the underlying stream is gone this
    /// returns the end-of-stream sentinel.
    async fn next_record(&mut self) -> RawRecord;

    /// Stop producing records and release the underlying connection.
    async fn close(&mut self);
}
