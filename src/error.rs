//! Error types for ferry transfers.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Every failure a sender, receiver or session can surface.
///
/// None of these are retried internally; retry is a caller-level policy.
#[derive(Debug, Error)]
pub enum TransferError {
    /// Local source file cannot be opened for reading.
    #[error("cannot open source {}: {source}", .path.display())]
    SourceUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Reading the already-opened source failed mid-transfer.
    #[error("read from source failed: {0}")]
    SourceReadFailed(#[source] io::Error),

    /// Local destination file cannot be created for writing.
    #[error("cannot create destination {}: {source}", .path.display())]
    DestinationUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Connection closed or errored before a complete frame arrived.
    #[error("stream truncated: {0}")]
    TruncatedStream(#[source] io::Error),

    /// Peer declared a frame longer than the configured limit.
    #[error("declared frame length {declared} exceeds limit of {limit} bytes")]
    FrameTooLarge { declared: u32, limit: u32 },

    #[error("write to stream failed: {0}")]
    StreamWriteFailed(#[source] io::Error),

    #[error("write to destination failed: {0}")]
    SinkWriteFailed(#[source] io::Error),

    /// Filename frame is not usable as a destination name.
    #[error("invalid filename: {0}")]
    InvalidFilename(String),

    #[error("connect {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("listen {addr}: {source}")]
    Listen {
        addr: String,
        #[source]
        source: io::Error,
    },
}

impl TransferError {
    /// True when the peer stopped short of a complete frame, including an
    /// oversized declaration that was refused before reading the payload.
    pub fn is_truncation(&self) -> bool {
        matches!(
            self,
            TransferError::TruncatedStream(_) | TransferError::FrameTooLarge { .. }
        )
    }
}

/// Result type alias using TransferError.
pub type Result<T> = std::result::Result<T, TransferError>;
