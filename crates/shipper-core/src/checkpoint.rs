//! Durable cursor persistence

use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use crate::{Cursor, Result, ShipperError};

/// Reads and writes the state file holding the last forwarded cursor.
///
/// The file holds the literal cursor string and nothing else. Saves go through
/// a sibling temporary file that is synced and renamed over the state file, so
/// a crash mid-save leaves either the old cursor or the new one.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn parent_dir(&self) -> &Path {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }

    /// Load the saved cursor. Any failure, an empty file, or a cursor that
    /// cannot be sent back to the journal means there is no usable
    /// checkpoint. A trailing line ending is ignored.
    pub async fn load(&self) -> Option<Cursor> {
        match fs::read_to_string(&self.path).await {
            Ok(contents) => {
                let cursor = contents.trim_end_matches(['\r', '\n']);
                if cursor.is_empty() {
                    debug!(path = %self.path.display(), "State file is empty");
                    None
                } else if !cursor.bytes().all(|b| b.is_ascii_graphic()) {
                    warn!(
                        path = %self.path.display(),
                        cursor = ?cursor,
                        "Ignoring malformed cursor in state file"
                    );
                    None
                } else {
                    Some(Cursor::new(cursor))
                }
            }
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "Could not read state file");
                None
            }
        }
    }

    /// Replace the saved cursor.
    #[instrument(skip(self, cursor), fields(path = %self.path.display()))]
    pub async fn save(&self, cursor: &Cursor) -> Result<()> {
        let temp_path = self.temp_path();
        let write = async {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(cursor.as_str().as_bytes()).await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&temp_path, &self.path).await?;
            fs::File::open(self.parent_dir()).await?.sync_all().await
        };

        write.await.map_err(|e| {
            ShipperError::CheckpointError(format!(
                "Unable to write state file {}: {}",
                self.path.display(),
                e
            ))
        })
    }
}

/// Decides when the pipeline may write the next checkpoint.
///
/// Time is passed in by the caller so the throttle can be driven by a paused
/// or simulated clock.
#[derive(Debug, Clone)]
pub struct SaveThrottle {
    interval: Duration,
    last_save: Instant,
}

impl SaveThrottle {
    /// The interval starts counting at `now`.
    pub fn new(interval: Duration, now: Instant) -> Self {
        Self {
            interval,
            last_save: now,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_due(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_save) > self.interval
    }

    pub fn mark_saved(&mut self, now: Instant) {
        self.last_save = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_save_then_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path().join("journal.state"));
        let cursor = Cursor::new("s=61821e0261d64e798421262e919e98c2;i=e954abb");

        store.save(&cursor).await.unwrap();
        assert_eq!(store.load().await, Some(cursor));

        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert_eq!(raw, "s=61821e0261d64e798421262e919e98c2;i=e954abb");
    }

    #[tokio::test]
    async fn test_save_overwrites_and_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path().join("journal.state"));

        store.save(&Cursor::new("a-much-longer-first-cursor")).await.unwrap();
        store.save(&Cursor::new("b")).await.unwrap();

        assert_eq!(store.load().await, Some(Cursor::new("b")));
        assert!(!store.temp_path().exists());
    }

    #[tokio::test]
    async fn test_missing_or_empty_file_is_absent() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path().join("missing.state"));
        assert_eq!(store.load().await, None);

        std::fs::write(store.path(), "").unwrap();
        assert_eq!(store.load().await, None);
    }

    #[tokio::test]
    async fn test_trailing_newline_is_ignored() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path().join("journal.state"));

        std::fs::write(store.path(), "s=abc;i=1\n").unwrap();
        assert_eq!(store.load().await, Some(Cursor::new("s=abc;i=1")));

        std::fs::write(store.path(), "s=abc;i=1\r\n").unwrap();
        assert_eq!(store.load().await, Some(Cursor::new("s=abc;i=1")));

        std::fs::write(store.path(), "\n").unwrap();
        assert_eq!(store.load().await, None);
    }

    #[tokio::test]
    async fn test_malformed_cursor_is_absent() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path().join("journal.state"));

        for contents in ["s=abc\n;i=1", "s=abc;\0i=1", "s=abc i=1", "\ts=abc"] {
            std::fs::write(store.path(), contents).unwrap();
            assert_eq!(store.load().await, None, "{:?}", contents);
        }
    }

    #[test]
    fn test_parent_dir() {
        assert_eq!(
            CheckpointStore::new("/var/lib/shipper/journal.state").parent_dir(),
            Path::new("/var/lib/shipper")
        );
        assert_eq!(CheckpointStore::new("journal.state").parent_dir(), Path::new("."));
    }

    #[tokio::test]
    async fn test_save_into_missing_directory_fails() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path().join("no-such-dir").join("journal.state"));

        let err = store.save(&Cursor::new("abc")).await.unwrap_err();
        assert!(matches!(err, ShipperError::CheckpointError(_)));
    }

    #[test]
    fn test_throttle_allows_one_save_per_interval() {
        let start = Instant::now();
        let interval = Duration::from_secs(15);
        let mut throttle = SaveThrottle::new(interval, start);

        let mut saves = 0;
        // one tick every 100ms of simulated time for one minute
        for tick in 1..=600u64 {
            let now = start + Duration::from_millis(tick * 100);
            if throttle.is_due(now) {
                throttle.mark_saved(now);
                saves += 1;
            }
        }
        assert_eq!(saves, 3);
    }

    #[test]
    fn test_throttle_not_due_at_start() {
        let start = Instant::now();
        let throttle = SaveThrottle::new(Duration::from_secs(30), start);
        assert!(!throttle.is_due(start));
        assert!(!throttle.is_due(start + Duration::from_secs(30)));
        assert!(throttle.is_due(start + Duration::from_secs(31)));
    }
}
