//! Error types for journal-shipper

use thiserror::Error;

/// Failures produced while turning a raw journal record into an [`Event`](crate::Event).
///
/// These are record-level errors: the pipeline counts them and skips the record.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TranslateError {
    #[error("record is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("record is not a JSON object")]
    NotAnObject,

    #[error("unable to parse {key} from journal record: {reason}")]
    TimestampParse { key: String, reason: String },

    #[error("journal {key} field of unknown type: {found}")]
    MessageEncoding { key: String, found: String },

    #[error("journal field {key} is not a string: {found}")]
    MalformedField { key: String, found: String },
}

#[derive(Error, Debug)]
pub enum ShipperError {
    #[error("Journal error: {0}")]
    JournalError(String),

    #[error("source stream ended")]
    StreamEnded,

    #[error("Translation error: {0}")]
    TranslationError(#[from] TranslateError),

    #[error("TLS error: {0}")]
    TlsError(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Forwarding error: {0}")]
    ForwardError(String),

    #[error("Checkpoint error: {0}")]
    CheckpointError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

pub type Result<T> = std::result::Result<T, ShipperError>;

impl From<anyhow::Error> for ShipperError {
    fn from(err: anyhow::Error) -> Self {
        ShipperError::InternalError(err.to_string())
    }
}

/// Where an error sits in the failure taxonomy, which decides whether the
/// pipeline keeps running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bad TLS material, unreachable initial connection, bad configuration.
    Construction,
    /// The source stream closed or was lost.
    Stream,
    /// A single malformed record.
    Record,
    /// Writing to the forwarding sink failed after the internal retry.
    Forward,
    /// The checkpoint could not be written.
    Persistence,
}

impl ShipperError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ShipperError::TlsError(_) | ShipperError::ConfigError(_) => ErrorClass::Construction,
            ShipperError::JournalError(_) | ShipperError::StreamEnded => ErrorClass::Stream,
            ShipperError::TranslationError(_) => ErrorClass::Record,
            ShipperError::ConnectionError(_)
            | ShipperError::ForwardError(_)
            | ShipperError::SerializationError(_) => ErrorClass::Forward,
            ShipperError::CheckpointError(_) | ShipperError::IoError(_) => {
                ErrorClass::Persistence
            }
            ShipperError::InternalError(_) => ErrorClass::Construction,
        }
    }

    /// Only record errors are absorbed by the pipeline.
    pub fn is_recoverable(&self) -> bool {
        self.class() == ErrorClass::Record
    }
}
