//! Shared protocol constants for the ferry framed transport
//!
//! Wire format, all integers big-endian:
//! ```text
//! Filename Frame:  u32 length=N | N bytes UTF-8 basename
//! Data Frame:      u32 length=N (N>0) | N bytes file content
//! End-of-Stream:   u32 length=0
//! ```

// Frame header is the bare payload length
pub const HEADER_LEN: usize = 4;

// Length value reserved for the end-of-stream marker
pub const END_OF_STREAM: u32 = 0;

// Sender reads and frames the source in chunks of this size (1MB)
pub const CHUNK_SIZE: usize = 1024 * 1024;

// Maximum accepted data frame payload (64MB) - prevents memory exhaustion
// from an untrusted length header
pub const MAX_FRAME_SIZE: u32 = 64 * 1024 * 1024;

// Maximum accepted filename frame payload
pub const MAX_FILENAME_LEN: u32 = 4096;

// Receiver falls back to this name when the sent basename is unusable
pub const FALLBACK_FILENAME: &str = "unnamed";

/// Upper bounds a receiver enforces on declared frame lengths.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameLimits {
    pub max_frame_size: u32,
    pub max_filename_len: u32,
}

impl FrameLimits {
    /// Limits with a custom data frame cap. The cap never drops below
    /// `CHUNK_SIZE`, otherwise a conforming sender could not be received.
    pub fn with_max_frame_size(max_frame_size: u32) -> Self {
        Self {
            max_frame_size: max_frame_size.max(CHUNK_SIZE as u32),
            ..Self::default()
        }
    }
}

impl Default for FrameLimits {
    fn default() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
            max_filename_len: MAX_FILENAME_LEN,
        }
    }
}
