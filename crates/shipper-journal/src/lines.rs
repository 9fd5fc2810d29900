//! Newline framing for the gatewayd export stream

use bytes::{Bytes, BytesMut};

/// Largest record accepted when no limit is configured.
pub const DEFAULT_MAX_LINE_BYTES: usize = 1024 * 1024;

/// Splits a chunked byte stream into newline-delimited records.
///
/// Line endings (`\n` or `\r\n`) are stripped and blank lines are dropped, so
/// a yielded line is never empty. Each byte is scanned for a newline only
/// once, however the line is chunked.
#[derive(Debug)]
pub struct LineSplitter {
    buffer: BytesMut,
    scanned: usize,
    max_line: usize,
    over_limit: bool,
}

impl Default for LineSplitter {
    fn default() -> Self {
        Self::with_max_line(DEFAULT_MAX_LINE_BYTES)
    }
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            scanned: 0,
            max_line,
            over_limit: false,
        }
    }

    pub fn extend(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Next complete line, if one has been buffered. Nothing more is yielded
    /// once a line has outgrown the limit.
    pub fn next_line(&mut self) -> Option<Bytes> {
        if self.over_limit {
            return None;
        }
        while let Some(offset) = self.buffer[self.scanned..].iter().position(|b| *b == b'\n') {
            let newline = self.scanned + offset;
            if newline > self.max_line {
                self.over_limit = true;
                return None;
            }
            self.scanned = 0;
            let mut line = self.buffer.split_to(newline + 1);
            line.truncate(newline);
            if line.last() == Some(&b'\r') {
                line.truncate(newline - 1);
            }
            if !line.is_empty() {
                return Some(line.freeze());
            }
        }
        self.scanned = self.buffer.len();
        if self.buffer.len() > self.max_line {
            self.over_limit = true;
        }
        None
    }

    /// True once a line, complete or not, has outgrown the limit. The stream
    /// cannot be framed past this point.
    pub fn is_over_limit(&self) -> bool {
        self.over_limit
    }

    /// Whatever is left once the stream has ended without a final newline.
    pub fn finish(&mut self) -> Option<Bytes> {
        if self.over_limit {
            return None;
        }
        self.scanned = 0;
        let mut rest = self.buffer.split();
        if rest.last() == Some(&b'\r') {
            rest.truncate(rest.len() - 1);
        }
        if rest.is_empty() {
            None
        } else {
            Some(rest.freeze())
        }
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn max_line(&self) -> usize {
        self.max_line
    }
}
