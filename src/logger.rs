use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::sync::mpsc;

use crate::session::{SessionOutcome, SessionReport, SessionState};

/// Receives the outcome of every server session. Called from the
/// connection's own task, so implementations must not block for long.
pub trait SessionLogger: Send + Sync {
    fn accepted(&self, _peer: SocketAddr) {}
    fn finished(&self, _report: SessionReport) {}
}

pub struct NoopLogger;
impl SessionLogger for NoopLogger {}

/// Forwards every report into a channel; tests and embedders assert on
/// per-session outcomes through the receiving end.
pub struct ChannelLogger {
    tx: mpsc::UnboundedSender<SessionReport>,
}

impl ChannelLogger {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SessionReport>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl SessionLogger for ChannelLogger {
    fn finished(&self, report: SessionReport) {
        // Receiver gone means nobody is listening any more
        let _ = self.tx.send(report);
    }
}

#[derive(Serialize, Debug)]
enum LogEvent {
    Accepted,
    Finished,
}

#[derive(Serialize, Debug)]
struct LogEntry {
    timestamp: String,
    event: LogEvent,
    peer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    state: Option<SessionState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    destination: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl LogEntry {
    fn new(event: LogEvent, peer: SocketAddr) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            event,
            peer: peer.to_string(),
            filename: None,
            state: None,
            destination: None,
            bytes: None,
            error: None,
        }
    }
}

/// Appends one JSON line per session event to a file.
pub struct TextLogger {
    file: Mutex<File>,
}

impl TextLogger {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open session log {}", path.display()))?;
        Ok(Self {
            file: Mutex::new(f),
        })
    }

    fn line(&self, entry: &LogEntry) {
        if let Ok(mut f) = self.file.lock() {
            if let Ok(json) = serde_json::to_string(entry) {
                let _ = writeln!(f, "{}", json);
            }
        }
    }
}

impl SessionLogger for TextLogger {
    fn accepted(&self, peer: SocketAddr) {
        self.line(&LogEntry::new(LogEvent::Accepted, peer));
    }

    fn finished(&self, report: SessionReport) {
        let mut entry = LogEntry::new(LogEvent::Finished, report.peer);
        entry.state = Some(report.state());
        entry.filename = report.filename;
        match report.outcome {
            SessionOutcome::Complete { destination, bytes } => {
                entry.destination = Some(destination);
                entry.bytes = Some(bytes);
            }
            SessionOutcome::Aborted { state, error } => {
                entry.error = Some(format!("{} (while {})", error, state));
            }
            SessionOutcome::Panicked { message } => {
                entry.error = Some(format!("session panicked: {}", message));
            }
        }
        self.line(&entry);
    }
}
