//! Receiver side: consume frames until end-of-stream into a destination.

use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

use crate::codec;
use crate::error::{Result, TransferError};
use crate::protocol::FrameLimits;

/// Create (or truncate) `destination_path` and fill it from `stream`.
///
/// The destination is created before any frame is known to be valid. On
/// failure the partial file is left in place; removing it is up to the caller.
pub async fn receive_file<S>(
    stream: &mut S,
    destination_path: &Path,
    limits: &FrameLimits,
) -> Result<u64>
where
    S: AsyncRead + Unpin,
{
    let file = File::create(destination_path)
        .await
        .map_err(|source| TransferError::DestinationUnavailable {
            path: destination_path.to_path_buf(),
            source,
        })?;
    let received = receive_into(stream, file, limits).await?;
    debug!(path = %destination_path.display(), bytes = received, "destination written");
    Ok(received)
}

/// Append each data frame payload to `sink` in arrival order until the
/// end-of-stream marker. Returns the number of content bytes written.
pub async fn receive_into<S, W>(stream: &mut S, mut sink: W, limits: &FrameLimits) -> Result<u64>
where
    S: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut received: u64 = 0;
    while let Some(payload) = codec::read_frame(stream, limits.max_frame_size).await? {
        trace!(len = payload.len(), "data frame");
        sink.write_all(&payload)
            .await
            .map_err(TransferError::SinkWriteFailed)?;
        received += payload.len() as u64;
    }
    // tokio::fs::File completes writes in the background; flush surfaces
    // any deferred error before the session is called complete.
    sink.flush().await.map_err(TransferError::SinkWriteFailed)?;
    Ok(received)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode;
    use tempfile::TempDir;

    fn wire_of(chunks: &[&[u8]]) -> Vec<u8> {
        let mut wire = Vec::new();
        for c in chunks {
            wire.extend_from_slice(&encode(c));
        }
        wire.extend_from_slice(&encode(b""));
        wire
    }

    #[tokio::test]
    async fn test_receive_writes_payloads_in_order() {
        let tmp = TempDir::new().unwrap();
        let dst = tmp.path().join("out.txt");
        let wire = wire_of(&[b"alpha ", b"beta ", b"gamma"]);

        let mut rd = wire.as_slice();
        let n = receive_file(&mut rd, &dst, &FrameLimits::default())
            .await
            .unwrap();
        assert_eq!(n, 16);
        assert_eq!(std::fs::read(&dst).unwrap(), b"alpha beta gamma");
    }

    #[tokio::test]
    async fn test_marker_only_creates_empty_file() {
        let tmp = TempDir::new().unwrap();
        let dst = tmp.path().join("empty.bin");
        let mut rd: &[u8] = &[0, 0, 0, 0];

        let n = receive_file(&mut rd, &dst, &FrameLimits::default())
            .await
            .unwrap();
        assert_eq!(n, 0);
        assert!(dst.exists());
        assert_eq!(std::fs::metadata(&dst).unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_stops_at_marker_leaving_trailing_bytes() {
        let mut wire = wire_of(&[b"data"]);
        wire.extend_from_slice(b"trailing");

        let mut sink = Vec::new();
        let mut rd = wire.as_slice();
        receive_into(&mut rd, &mut sink, &FrameLimits::default())
            .await
            .unwrap();
        assert_eq!(sink, b"data");
        assert_eq!(rd, b"trailing");
    }

    #[tokio::test]
    async fn test_truncated_payload_is_not_success() {
        let tmp = TempDir::new().unwrap();
        let dst = tmp.path().join("cut.bin");
        let mut wire = encode(b"complete frame");
        wire.extend_from_slice(&encode(&[1u8; 100])[..50]);

        let mut rd = wire.as_slice();
        let err = receive_file(&mut rd, &dst, &FrameLimits::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::TruncatedStream(_)));
    }

    #[tokio::test]
    async fn test_missing_marker_is_truncation() {
        let wire = encode(b"no end");
        let mut sink = Vec::new();
        let mut rd = wire.as_slice();
        let err = receive_into(&mut rd, &mut sink, &FrameLimits::default())
            .await
            .unwrap_err();
        assert!(err.is_truncation());
    }

    #[tokio::test]
    async fn test_destination_in_missing_directory() {
        let tmp = TempDir::new().unwrap();
        let dst = tmp.path().join("no/such/dir/file.bin");
        let mut rd: &[u8] = &[0, 0, 0, 0];

        let err = receive_file(&mut rd, &dst, &FrameLimits::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::DestinationUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_frame_over_limit_rejected() {
        let limits = FrameLimits {
            max_frame_size: 8,
            max_filename_len: 8,
        };
        let wire = wire_of(&[b"0123456789"]);
        let mut sink = Vec::new();
        let mut rd = wire.as_slice();
        let err = receive_into(&mut rd, &mut sink, &limits).await.unwrap_err();
        assert!(matches!(
            err,
            TransferError::FrameTooLarge {
                declared: 10,
                limit: 8
            }
        ));
        assert!(sink.is_empty());
    }
}
