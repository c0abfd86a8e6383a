//! Filename preamble and destination naming for the receiving side
//!
//! The filename frame is optional on the wire; raw sessions skip it and
//! receive into a path chosen out-of-band.

use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::codec;
use crate::error::{Result, TransferError};
use crate::protocol::{FrameLimits, FALLBACK_FILENAME};

/// Last path component of `name`, accepting both `/` and `\` as separators
/// since the sending platform is unknown.
pub fn basename(name: &str) -> &str {
    name.rsplit(['/', '\\']).next().unwrap_or(name)
}

/// Write the basename of `filename` as a single frame.
pub async fn send_filename<S>(stream: &mut S, filename: &str) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    codec::write_frame(stream, basename(filename).as_bytes()).await
}

/// Read exactly one frame and decode it as UTF-8.
///
/// A zero-length frame is a legal (empty) filename here, not end-of-stream.
pub async fn receive_filename<S>(stream: &mut S, limits: &FrameLimits) -> Result<String>
where
    S: AsyncRead + Unpin,
{
    let len = codec::read_header(stream).await?;
    codec::validate_frame_size(len, limits.max_filename_len)?;
    let payload = codec::read_payload(stream, len).await?;
    String::from_utf8(payload)
        .map_err(|e| TransferError::InvalidFilename(format!("not UTF-8: {}", e)))
}

/// Reduce an untrusted filename to a single safe component.
///
/// Directory components are dropped so nothing lands outside the root.
/// Names that reduce to nothing usable fall back to `FALLBACK_FILENAME`.
pub fn sanitize_filename(filename: &str) -> Result<&str> {
    if filename.contains('\0') {
        return Err(TransferError::InvalidFilename(
            "filename contains NUL byte".to_string(),
        ));
    }
    match basename(filename) {
        "" | "." | ".." => Ok(FALLBACK_FILENAME),
        base => Ok(base),
    }
}

/// Split at the last `.`: `report.txt` -> (`report`, `.txt`).
fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(pos) => name.split_at(pos),
        None => (name, ""),
    }
}

/// Pick a destination under `root` that does not exist yet.
///
/// Tries the basename first, then `{stem}_{n}{ext}` for n = 1, 2, ...
///
/// The existence check and the later create are separate steps, so this is
/// not atomic: two sessions resolving the same name at the same time can both
/// pick it and the second create truncates the first.
pub async fn resolve_destination(root: &Path, filename: &str) -> Result<PathBuf> {
    let base = sanitize_filename(filename)?;
    let mut candidate = root.join(base);
    if !entry_exists(&candidate).await {
        return Ok(candidate);
    }
    let (stem, ext) = split_extension(base);
    let mut n: u64 = 1;
    loop {
        candidate = root.join(format!("{}_{}{}", stem, n, ext));
        if !entry_exists(&candidate).await {
            return Ok(candidate);
        }
        n += 1;
    }
}

// symlink_metadata so a dangling symlink still counts as taken
async fn entry_exists(path: &Path) -> bool {
    tokio::fs::symlink_metadata(path).await.is_ok()
}
