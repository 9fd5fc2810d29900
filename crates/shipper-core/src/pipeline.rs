//! The shipping loop: read, translate, forward, checkpoint

use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    translate, CheckpointStore, Cursor, EventSink, NoopMetrics, PipelineMetrics, RawRecord,
    RecordSource, Result, SaveThrottle, ShipperError,
};

/// Default time between checkpoint writes.
pub const DEFAULT_SAVE_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Starting,
    Running,
    Stopped,
}

/// Moves records from a [`RecordSource`] to an [`EventSink`] one at a time.
///
/// The pipeline owns the forwarding progress: the last cursor confirmed by the
/// sink is kept in memory and written to the [`CheckpointStore`] at most once
/// per save interval, and once more when the pipeline stops. The persisted
/// cursor therefore only ever names a record that was forwarded.
pub struct Pipeline<S, K> {
    source: S,
    sink: K,
    store: CheckpointStore,
    throttle: SaveThrottle,
    metrics: Arc<dyn PipelineMetrics>,
    last_sent: Option<Cursor>,
    last_saved: Option<Cursor>,
    state: PipelineState,
    debug: bool,
}

impl<S: RecordSource, K: EventSink> Pipeline<S, K> {
    pub fn new(source: S, sink: K, store: CheckpointStore) -> Self {
        Self {
            source,
            sink,
            store,
            throttle: SaveThrottle::new(DEFAULT_SAVE_INTERVAL, Instant::now()),
            metrics: Arc::new(NoopMetrics),
            last_sent: None,
            last_saved: None,
            state: PipelineState::Starting,
            debug: false,
        }
    }

    pub fn with_save_interval(mut self, interval: Duration) -> Self {
        self.throttle = SaveThrottle::new(interval, Instant::now());
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn PipelineMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Log every raw record and every checkpoint write.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Cursor of the last event the sink accepted.
    pub fn last_sent(&self) -> Option<&Cursor> {
        self.last_sent.as_ref()
    }

    /// Run until the source ends or a fatal error occurs.
    pub async fn run(&mut self) -> Result<()> {
        self.run_until(std::future::pending::<()>()).await
    }

    /// Run until the source ends, a fatal error occurs, or `shutdown`
    /// completes. A shutdown is a clean stop and returns `Ok`.
    ///
    /// Whatever the outcome, the source is closed, the last forwarded cursor
    /// is saved (best effort) and the sink is closed before returning.
    #[instrument(skip_all, fields(state_file = %self.store.path().display()))]
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        self.state = PipelineState::Running;
        info!(
            save_interval = ?self.throttle.interval(),
            "Pipeline running"
        );

        let result = self.run_loop(shutdown).await;
        self.state = PipelineState::Stopped;

        self.source.close().await;
        if let Err(e) = self.save_checkpoint(Instant::now()).await {
            warn!(error = %e, "Final checkpoint save failed");
        }
        self.sink.close().await;

        match &result {
            Ok(()) => info!(cursor = ?self.last_sent, "Pipeline stopped"),
            Err(e) => error!(error = %e, cursor = ?self.last_sent, "Pipeline stopped with error"),
        }
        result
    }

    async fn run_loop<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        tokio::pin!(shutdown);
        loop {
            let record = tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    return Ok(());
                }
                record = self.source.next_record() => record,
            };
            self.handle_record(record).await?;
        }
    }

    async fn handle_record(&mut self, record: RawRecord) -> Result<()> {
        if record.is_end_of_stream() {
            return Err(ShipperError::StreamEnded);
        }

        self.metrics.record_read();
        if self.debug {
            debug!(record = %String::from_utf8_lossy(record.as_bytes()), "Received from journal");
        }

        let event = match translate(&record) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Error parsing journal record, skipping");
                self.metrics.parse_failure();
                return Ok(());
            }
        };

        self.sink.write(&event).await?;
        self.metrics.record_forwarded();

        let behind = Utc::now().signed_duration_since(event.timestamp);
        self.metrics
            .seconds_behind(behind.num_milliseconds() as f64 / 1000.0);

        if let Some(cursor) = event.cursor() {
            self.last_sent = Some(cursor);
        }

        let now = Instant::now();
        if self.throttle.is_due(now) {
            self.save_checkpoint(now).await?;
        }
        Ok(())
    }

    async fn save_checkpoint(&mut self, now: Instant) -> Result<()> {
        let Some(cursor) = self.last_sent.clone() else {
            return Ok(());
        };

        if self.last_saved.as_ref() != Some(&cursor) {
            if self.debug {
                debug!(
                    path = %self.store.path().display(),
                    cursor = %cursor,
                    "Saving cursor"
                );
            }
            self.store.save(&cursor).await?;
            self.last_saved = Some(cursor);
        }
        self.throttle.mark_saved(now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Event, MockEventSink};
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::collections::VecDeque;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Serves queued records, then either the end-of-stream sentinel or
    /// nothing at all.
    struct QueueSource {
        records: VecDeque<RawRecord>,
        hang_when_empty: bool,
        snapshot_file: Option<PathBuf>,
        snapshots: Arc<Mutex<Vec<Option<String>>>>,
        closed: Arc<Mutex<bool>>,
    }

    impl QueueSource {
        fn new(lines: &[&str]) -> Self {
            Self {
                records: lines
                    .iter()
                    .map(|line| RawRecord::new(Bytes::copy_from_slice(line.as_bytes())))
                    .collect(),
                hang_when_empty: false,
                snapshot_file: None,
                snapshots: Arc::new(Mutex::new(Vec::new())),
                closed: Arc::new(Mutex::new(false)),
            }
        }

        fn hang_when_empty(mut self) -> Self {
            self.hang_when_empty = true;
            self
        }

        /// Record the state file contents every time a record is pulled.
        fn snapshot(mut self, path: PathBuf) -> Self {
            self.snapshot_file = Some(path);
            self
        }
    }

    #[async_trait]
    impl RecordSource for QueueSource {
        async fn next_record(&mut self) -> RawRecord {
            if let Some(path) = &self.snapshot_file {
                let contents = std::fs::read_to_string(path).ok();
                self.snapshots.lock().unwrap().push(contents);
            }
            match self.records.pop_front() {
                Some(record) => record,
                None if self.hang_when_empty => std::future::pending().await,
                None => RawRecord::end_of_stream(),
            }
        }

        async fn close(&mut self) {
            *self.closed.lock().unwrap() = true;
        }
    }

    #[derive(Default, Clone)]
    struct RecordingSink {
        events: Arc<Mutex<Vec<Event>>>,
        closes: Arc<AtomicU64>,
    }

    #[async_trait]
    impl EventSink for RecordingSink {
        async fn write(&mut self, event: &Event) -> Result<()> {
            self.events.lock().unwrap().push(event.clone());
            Ok(())
        }

        async fn close(&mut self) {
            self.closes.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[derive(Default)]
    struct CountingMetrics {
        read: AtomicU64,
        forwarded: AtomicU64,
        parse_failures: AtomicU64,
    }

    impl PipelineMetrics for CountingMetrics {
        fn record_read(&self) {
            self.read.fetch_add(1, Ordering::Relaxed);
        }

        fn record_forwarded(&self) {
            self.forwarded.fetch_add(1, Ordering::Relaxed);
        }

        fn parse_failure(&self) {
            self.parse_failures.fetch_add(1, Ordering::Relaxed);
        }

        fn seconds_behind(&self, _seconds: f64) {}
    }

    fn store(dir: &TempDir) -> CheckpointStore {
        CheckpointStore::new(dir.path().join("journal.state"))
    }

    const FIRST: &str =
        r#"{"__CURSOR":"c1","__REALTIME_TIMESTAMP":"1460858962473842","MESSAGE":"one"}"#;
    const MALFORMED: &str = r#"{"__CURSOR":"c2","MESSAGE":"two","PRIORITY":6}"#;
    const THIRD: &str = r#"{"__CURSOR":"c3","MESSAGE":[116,104,114,101,101]}"#;

    #[tokio::test]
    async fn test_forwards_in_order_until_stream_ends() {
        let dir = TempDir::new().unwrap();
        let sink = RecordingSink::default();
        let metrics = Arc::new(CountingMetrics::default());
        let source = QueueSource::new(&[FIRST, THIRD]);
        let closed = source.closed.clone();

        let mut pipeline = Pipeline::new(source, sink.clone(), store(&dir))
            .with_save_interval(Duration::from_secs(3600))
            .with_metrics(metrics.clone());
        let err = pipeline.run().await.unwrap_err();

        assert!(matches!(err, ShipperError::StreamEnded));
        assert_eq!(pipeline.state(), PipelineState::Stopped);

        let messages: Vec<String> = sink
            .events
            .lock()
            .unwrap()
            .iter()
            .map(|event| event.message.clone())
            .collect();
        assert_eq!(messages, vec!["one", "three"]);
        assert_eq!(metrics.read.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.forwarded.load(Ordering::Relaxed), 2);
        assert_eq!(sink.closes.load(Ordering::Relaxed), 1);
        assert!(*closed.lock().unwrap());

        // the final save happens on stop even though the interval never elapsed
        assert_eq!(store(&dir).load().await, Some(Cursor::new("c3")));
    }

    #[tokio::test]
    async fn test_malformed_record_is_counted_and_skipped() {
        let dir = TempDir::new().unwrap();
        let sink = RecordingSink::default();
        let metrics = Arc::new(CountingMetrics::default());

        let mut pipeline = Pipeline::new(
            QueueSource::new(&[FIRST, MALFORMED, "not json", THIRD]),
            sink.clone(),
            store(&dir),
        )
        .with_metrics(metrics.clone());
        let _ = pipeline.run().await;

        assert_eq!(sink.events.lock().unwrap().len(), 2);
        assert_eq!(metrics.read.load(Ordering::Relaxed), 4);
        assert_eq!(metrics.parse_failures.load(Ordering::Relaxed), 2);
        assert_eq!(pipeline.last_sent(), Some(&Cursor::new("c3")));
    }

    #[tokio::test]
    async fn test_checkpoint_never_skips_ahead_of_forwarded_records() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("journal.state");
        let source = QueueSource::new(&[FIRST, MALFORMED, THIRD]).snapshot(path.clone());
        let snapshots = source.snapshots.clone();

        let mut pipeline = Pipeline::new(source, RecordingSink::default(), store(&dir))
            .with_save_interval(Duration::ZERO);
        let _ = pipeline.run().await;

        let snapshots = snapshots.lock().unwrap().clone();
        assert_eq!(
            snapshots,
            vec![
                None,
                Some("c1".to_string()),
                Some("c1".to_string()),
                Some("c3".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_forward_failure_stops_pipeline_and_keeps_last_confirmed_cursor() {
        let dir = TempDir::new().unwrap();
        let mut sink = MockEventSink::new();
        let mut calls = 0;
        sink.expect_write().times(2).returning(move |_| {
            calls += 1;
            if calls == 1 {
                Ok(())
            } else {
                Err(ShipperError::ForwardError("connection reset".into()))
            }
        });
        sink.expect_close().times(1).return_const(());

        let mut pipeline = Pipeline::new(QueueSource::new(&[FIRST, THIRD]), sink, store(&dir));
        let err = pipeline.run().await.unwrap_err();

        assert!(matches!(err, ShipperError::ForwardError(_)));
        assert_eq!(store(&dir).load().await, Some(Cursor::new("c1")));
    }

    #[tokio::test]
    async fn test_nothing_forwarded_leaves_existing_checkpoint() {
        let dir = TempDir::new().unwrap();
        store(&dir).save(&Cursor::new("previous")).await.unwrap();

        let mut pipeline = Pipeline::new(
            QueueSource::new(&[MALFORMED]),
            RecordingSink::default(),
            store(&dir),
        );
        let _ = pipeline.run().await;

        assert_eq!(store(&dir).load().await, Some(Cursor::new("previous")));
    }

    #[tokio::test]
    async fn test_shutdown_is_a_clean_stop() {
        let dir = TempDir::new().unwrap();
        let sink = RecordingSink::default();

        let mut pipeline = Pipeline::new(
            QueueSource::new(&[FIRST]).hang_when_empty(),
            sink.clone(),
            store(&dir),
        );
        let result = pipeline
            .run_until(tokio::time::sleep(Duration::from_millis(50)))
            .await;

        assert!(result.is_ok());
        assert_eq!(sink.events.lock().unwrap().len(), 1);
        assert_eq!(store(&dir).load().await, Some(Cursor::new("c1")));
    }

    #[tokio::test]
    async fn test_checkpoint_write_failure_is_fatal() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path().join("missing").join("journal.state"));

        let mut pipeline = Pipeline::new(
            QueueSource::new(&[FIRST, THIRD]),
            RecordingSink::default(),
            store,
        )
        .with_save_interval(Duration::ZERO);
        let err = pipeline.run().await.unwrap_err();

        assert!(matches!(err, ShipperError::CheckpointError(_)));
    }
}
