//! Counters and gauges updated by the pipeline

/// Metrics the pipeline reports into. The pipeline updates them but the
/// implementation (and any exporter) is owned elsewhere.
pub trait PipelineMetrics: Send + Sync {
    fn record_read(&self);
    fn record_forwarded(&self);
    fn parse_failure(&self);
    /// How far behind real time the last forwarded event was.
    fn seconds_behind(&self, seconds: f64);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl PipelineMetrics for NoopMetrics {
    fn record_read(&self) {}
    fn record_forwarded(&self) {}
    fn parse_failure(&self) {}
    fn seconds_behind(&self, _seconds: f64) {}
}
