//! Resumable chunked file transfer with receipt-gated completion.
//!
//! A transfer only counts as complete once the receiver has written every
//! byte, verified the whole-file SHA-256 and sent back a matching receipt.

pub mod compression;
pub mod config;
pub mod connection;
pub mod control;
pub mod events;
pub mod manager;
pub mod receipt;
pub mod receiver;
pub mod record;
pub mod resume;
pub mod sender;
pub mod stats;
pub mod validation;
pub mod verify;
pub mod wire;

#[cfg(test)]
mod scenarios;

use std::path::PathBuf;

use skyhop_protocol::ProtocolError;

pub use config::TransferConfig;
pub use connection::{Connection, Connector, Endpoint, TcpConnector};
pub use control::{ControlState, TransferControl};
pub use events::TransferEvent;
pub use manager::{DeviceIdentity, ExternalTransfer, TransferManager};
pub use record::{Direction, TransferHandle, TransferRecord, TransferStatus};
pub use resume::{ResumeRecord, ResumeStore};
pub use stats::{NetworkQuality, ThroughputEstimator, TransferStats};

/// Errors produced by the transfer engine.
///
/// Every variant is fatal to the one transfer it occurred in.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("invalid header: {0}")]
    InvalidHeader(String),

    #[error("integrity check failed: expected {expected}, got {actual}")]
    IntegrityCheckFailed { expected: String, actual: String },

    #[error("transfer cancelled")]
    TransferCancelled,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("receiver did not confirm: {0}")]
    ReceiverNotConfirmed(String),

    #[error("receiver rejected transfer: {0}")]
    ReceiverRejected(String),

    #[error("unknown transfer: {0}")]
    UnknownTransfer(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<ProtocolError> for TransferError {
    fn from(e: ProtocolError) -> Self {
        TransferError::InvalidHeader(e.to_string())
    }
}

impl TransferError {
    /// Stable short name of the failure kind, for logs and exit reporting.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidHeader(_) => "invalidHeader",
            Self::IntegrityCheckFailed { .. } => "integrityCheckFailed",
            Self::TransferCancelled => "transferCancelled",
            Self::ConnectionClosed => "connectionClosed",
            Self::FileNotFound(_) => "fileNotFound",
            Self::Timeout(_) => "timeout",
            Self::ReceiverNotConfirmed(_) => "receiverNotConfirmed",
            Self::ReceiverRejected(_) => "receiverRejected",
            Self::UnknownTransfer(_) => "unknownTransfer",
            Self::InvalidState(_) => "invalidState",
            Self::InvalidPath(_) => "invalidPath",
            Self::Io(_) => "io",
            Self::Json(_) => "json",
        }
    }
}
