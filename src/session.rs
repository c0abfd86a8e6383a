//! One receive session per connection: filename, destination, data.
//!
//! ```text
//! AwaitingFilename --> AwaitingData --> Complete
//!        |                  |
//!        +------------------+--> Aborted (any I/O failure)
//! ```

use serde::Serialize;
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tokio::io::AsyncRead;
use tracing::{debug, info, warn};

use crate::error::TransferError;
use crate::naming;
use crate::protocol::FrameLimits;
use crate::receiver;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    AwaitingFilename,
    AwaitingData,
    Complete,
    Aborted,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::AwaitingFilename => "awaiting-filename",
            SessionState::AwaitingData => "awaiting-data",
            SessionState::Complete => "complete",
            SessionState::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

#[derive(Debug)]
pub enum SessionOutcome {
    Complete {
        destination: PathBuf,
        bytes: u64,
    },
    /// `state` is the non-terminal state the session was in when it failed.
    Aborted {
        state: SessionState,
        error: TransferError,
    },
    /// The session task panicked; nothing is known about how far it got.
    Panicked { message: String },
}

/// Final word on one connection, handed to a `SessionLogger`.
#[derive(Debug)]
pub struct SessionReport {
    pub peer: SocketAddr,
    pub filename: Option<String>,
    pub outcome: SessionOutcome,
}

impl SessionReport {
    pub fn state(&self) -> SessionState {
        match self.outcome {
            SessionOutcome::Complete { .. } => SessionState::Complete,
            SessionOutcome::Aborted { .. } | SessionOutcome::Panicked { .. } => {
                SessionState::Aborted
            }
        }
    }

    pub fn is_complete(&self) -> bool {
        self.state() == SessionState::Complete
    }

    pub fn destination(&self) -> Option<&Path> {
        match &self.outcome {
            SessionOutcome::Complete { destination, .. } => Some(destination),
            SessionOutcome::Aborted { .. } | SessionOutcome::Panicked { .. } => None,
        }
    }
}

/// Run one filename-negotiating receive session on `stream`, writing into
/// `root`. Never fails: every error ends up in the report's outcome.
///
/// A failure after the destination was created removes the partial file.
pub async fn receive_session<S>(
    stream: &mut S,
    peer: SocketAddr,
    root: &Path,
    limits: &FrameLimits,
) -> SessionReport
where
    S: AsyncRead + Unpin,
{
    let aborted = |filename: Option<String>, state: SessionState, error: TransferError| {
        warn!(%peer, %state, %error, "session aborted");
        SessionReport {
            peer,
            filename,
            outcome: SessionOutcome::Aborted { state, error },
        }
    };

    let filename = match naming::receive_filename(stream, limits).await {
        Ok(name) => name,
        Err(e) => return aborted(None, SessionState::AwaitingFilename, e),
    };
    let destination = match naming::resolve_destination(root, &filename).await {
        Ok(path) => path,
        Err(e) => return aborted(Some(filename), SessionState::AwaitingFilename, e),
    };
    debug!(%peer, filename = %filename, destination = %destination.display(), "awaiting data");

    match receiver::receive_file(stream, &destination, limits).await {
        Ok(bytes) => {
            info!(%peer, destination = %destination.display(), bytes, "session complete");
            SessionReport {
                peer,
                filename: Some(filename),
                outcome: SessionOutcome::Complete { destination, bytes },
            }
        }
        Err(e) => {
            discard_partial(&destination, &e).await;
            aborted(Some(filename), SessionState::AwaitingData, e)
        }
    }
}

/// Remove a destination left behind by a failed receive. Nothing is removed
/// when the failure was creating the destination itself.
pub(crate) async fn discard_partial(destination: &Path, error: &TransferError) {
    if matches!(error, TransferError::DestinationUnavailable { .. }) {
        return;
    }
    match tokio::fs::remove_file(destination).await {
        Ok(()) => debug!(path = %destination.display(), "removed partial destination"),
        Err(e) => warn!(path = %destination.display(), error = %e, "could not remove partial destination"),
    }
}
