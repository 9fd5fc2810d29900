//! Journal follower over the gatewayd unix socket

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use hyper::body::{Body, Incoming};
use hyper::client::conn::http1;
use hyper::header::{HeaderValue, ACCEPT, HOST, RANGE};
use hyper::{Request, StatusCode};
use hyper_util::rt::TokioIo;
use shipper_core::{Cursor, RawRecord, RecordSource, Result, ShipperError};
use shipper_shared::JournalConfig;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::LineSplitter;

/// Range value asking gatewayd to start at the newest entry.
pub const TAIL_RANGE: &str = "entries=:-1:-1";

/// Opens follow requests against systemd-journal-gatewayd.
#[derive(Debug, Clone)]
pub struct Follower {
    socket: PathBuf,
    path: String,
    max_line: usize,
}

impl Follower {
    pub fn new(config: &JournalConfig) -> Self {
        Self {
            socket: config.socket.clone(),
            path: config.path.clone(),
            max_line: config.max_line_bytes,
        }
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }

    /// Build the follow request for `cursor`. A tail cursor seeks to the end
    /// of the journal; anything else resumes at that entry.
    pub fn build_request(&self, cursor: &Cursor) -> Result<Request<Empty<Bytes>>> {
        let range = if cursor.is_tail() {
            HeaderValue::from_static(TAIL_RANGE)
        } else {
            HeaderValue::try_from(format!("entries={}", cursor)).map_err(|e| {
                ShipperError::JournalError(format!("invalid cursor {:?}: {}", cursor.as_str(), e))
            })?
        };

        Request::get(self.path.as_str())
            .header(HOST, "journal")
            .header(ACCEPT, "application/json")
            .header(RANGE, range)
            .body(Empty::new())
            .map_err(|e| ShipperError::JournalError(format!("invalid request: {}", e)))
    }

    /// Connect to gatewayd and issue the follow request.
    ///
    /// Fails on connection errors and on any status other than 200; no
    /// records are produced in that case.
    #[instrument(skip(self), fields(socket = %self.socket.display(), cursor = %cursor))]
    pub async fn open(&self, cursor: &Cursor) -> Result<OpenJournal> {
        let request = self.build_request(cursor)?;

        let stream = UnixStream::connect(&self.socket).await.map_err(|e| {
            ShipperError::JournalError(format!(
                "unable to connect to {}: {}",
                self.socket.display(),
                e
            ))
        })?;

        let (mut sender, connection) = http1::handshake(TokioIo::new(stream))
            .await
            .map_err(|e| ShipperError::JournalError(format!("handshake failed: {}", e)))?;

        let driver = tokio::spawn(async move {
            if let Err(e) = connection.await {
                debug!(error = %e, "Journal connection closed with error");
            }
        });

        let response = match sender.send_request(request).await {
            Ok(response) => response,
            Err(e) => {
                driver.abort();
                return Err(ShipperError::JournalError(format!("request failed: {}", e)));
            }
        };

        if response.status() != StatusCode::OK {
            driver.abort();
            return Err(ShipperError::JournalError(format!(
                "non 200 response: {}",
                response.status().as_u16()
            )));
        }

        info!("Following journal");
        Ok(OpenJournal {
            body: response.into_body(),
            driver,
            max_line: self.max_line,
        })
    }
}

/// An accepted follow response whose body has not been read yet.
#[derive(Debug)]
pub struct OpenJournal {
    body: Incoming,
    driver: JoinHandle<()>,
    max_line: usize,
}

impl OpenJournal {
    /// Start reading the response body in the background.
    ///
    /// Records are handed over one at a time: the reader waits until the
    /// previous record has been taken before reading further. When the body
    /// ends or fails, or a record outgrows the line limit, the end-of-stream
    /// sentinel is delivered.
    pub fn follow(self) -> RecordStream {
        let (tx, rx) = mpsc::channel(1);
        let reader = tokio::spawn(read_records(
            self.body,
            LineSplitter::with_max_line(self.max_line),
            tx,
        ));
        RecordStream {
            rx,
            reader,
            driver: self.driver,
        }
    }
}

async fn read_records<B>(mut body: B, mut splitter: LineSplitter, tx: mpsc::Sender<RawRecord>)
where
    B: Body<Data = Bytes> + Unpin,
    B::Error: Display,
{
    loop {
        match body.frame().await {
            Some(Ok(frame)) => {
                let Ok(data) = frame.into_data() else {
                    continue;
                };
                splitter.extend(&data);
                while let Some(line) = splitter.next_line() {
                    if tx.send(RawRecord::new(line)).await.is_err() {
                        debug!("Record receiver dropped, stopping journal reader");
                        return;
                    }
                }
                if splitter.is_over_limit() {
                    warn!(
                        buffered = splitter.buffered(),
                        max_line = splitter.max_line(),
                        "Journal record exceeds line limit"
                    );
                    let _ = tx.send(RawRecord::end_of_stream()).await;
                    return;
                }
            }
            Some(Err(e)) => {
                warn!(error = %e, "Journal stream failed");
                break;
            }
            None => {
                debug!("Journal stream ended");
                break;
            }
        }
    }

    if let Some(line) = splitter.finish() {
        if tx.send(RawRecord::new(line)).await.is_err() {
            return;
        }
    }
    if tx.send(RawRecord::end_of_stream()).await.is_err() {
        debug!("Record receiver dropped before end of stream");
    }
}

/// Records read from an open journal.
#[derive(Debug)]
pub struct RecordStream {
    rx: mpsc::Receiver<RawRecord>,
    reader: JoinHandle<()>,
    driver: JoinHandle<()>,
}

#[async_trait]
impl RecordSource for RecordStream {
    async fn next_record(&mut self) -> RawRecord {
        self.rx.recv().await.unwrap_or_else(RawRecord::end_of_stream)
    }

    async fn close(&mut self) {
        self.rx.close();
        self.reader.abort();
        self.driver.abort();
    }
}

impl Drop for RecordStream {
    fn drop(&mut self) {
        self.reader.abort();
        self.driver.abort();
    }
}
