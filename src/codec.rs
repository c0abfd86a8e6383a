//! Length-prefix frame codec shared by every sender and receiver
//!
//! Functions are generic over tokio's `AsyncRead`/`AsyncWrite` so the same
//! code runs over TCP streams, in-memory duplex pipes and plain buffers.
//! Nothing is buffered between calls.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Result, TransferError};
use crate::protocol::{END_OF_STREAM, HEADER_LEN};

/// Build frame header (4 bytes)
/// Format: LENGTH (u32 big-endian)
pub fn encode_header(payload_len: u32) -> [u8; HEADER_LEN] {
    payload_len.to_be_bytes()
}

/// Parse frame header into the declared payload length
pub fn parse_header(header: &[u8; HEADER_LEN]) -> u32 {
    u32::from_be_bytes(*header)
}

/// Encode a complete frame. An empty payload yields the bare end-of-stream
/// header with nothing after it.
///
/// # Panics
///
/// Panics if `payload` is longer than `u32::MAX` bytes.
pub fn encode(payload: &[u8]) -> Vec<u8> {
    let len = u32::try_from(payload.len()).expect("frame payload exceeds u32::MAX");
    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
    buf.extend_from_slice(&encode_header(len));
    buf.extend_from_slice(payload);
    buf
}

/// Reject a declared length above `limit` before anything is allocated.
pub fn validate_frame_size(declared: u32, limit: u32) -> Result<()> {
    if declared > limit {
        return Err(TransferError::FrameTooLarge { declared, limit });
    }
    Ok(())
}

pub async fn write_frame<S>(stream: &mut S, payload: &[u8]) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let len = u32::try_from(payload.len()).map_err(|_| {
        TransferError::StreamWriteFailed(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "frame payload exceeds u32::MAX",
        ))
    })?;
    stream
        .write_all(&encode_header(len))
        .await
        .map_err(TransferError::StreamWriteFailed)?;
    if !payload.is_empty() {
        stream
            .write_all(payload)
            .await
            .map_err(TransferError::StreamWriteFailed)?;
    }
    Ok(())
}

/// Write the zero-length marker that closes a session.
pub async fn write_end_of_stream<S>(stream: &mut S) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream
        .write_all(&encode_header(END_OF_STREAM))
        .await
        .map_err(TransferError::StreamWriteFailed)
}

/// Read exactly one header. Fails with `TruncatedStream` if the stream
/// closes or errors before four bytes arrive.
pub async fn read_header<S>(stream: &mut S) -> Result<u32>
where
    S: AsyncRead + Unpin,
{
    let mut hdr = [0u8; HEADER_LEN];
    stream
        .read_exact(&mut hdr)
        .await
        .map_err(TransferError::TruncatedStream)?;
    Ok(parse_header(&hdr))
}

/// Read exactly `len` payload bytes.
pub async fn read_payload<S>(stream: &mut S, len: u32) -> Result<Vec<u8>>
where
    S: AsyncRead + Unpin,
{
    let mut payload = vec![0u8; len as usize];
    if len > 0 {
        stream
            .read_exact(&mut payload)
            .await
            .map_err(TransferError::TruncatedStream)?;
    }
    Ok(payload)
}

/// Read one frame, enforcing `limit` on the declared length.
/// Returns `None` for the end-of-stream marker.
pub async fn read_frame<S>(stream: &mut S, limit: u32) -> Result<Option<Vec<u8>>>
where
    S: AsyncRead + Unpin,
{
    let len = read_header(stream).await?;
    if len == END_OF_STREAM {
        return Ok(None);
    }
    validate_frame_size(len, limit)?;
    read_payload(stream, len).await.map(Some)
}
