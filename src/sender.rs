//! Sender side: stream one local file as data frames plus end-of-stream.

use std::io;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::codec;
use crate::error::{Result, TransferError};
use crate::protocol::CHUNK_SIZE;

/// Open `path` read-only. Nothing touches the stream until this succeeds.
///
/// Only regular files qualify; a directory opens fine on unix but would fail
/// on the first read, after the filename frame is already out.
pub async fn open_source(path: &Path) -> Result<File> {
    let unavailable = |source: io::Error| TransferError::SourceUnavailable {
        path: path.to_path_buf(),
        source,
    };
    let file = File::open(path).await.map_err(unavailable)?;
    let meta = file.metadata().await.map_err(unavailable)?;
    if !meta.is_file() {
        return Err(unavailable(io::Error::new(
            io::ErrorKind::InvalidInput,
            "not a regular file",
        )));
    }
    Ok(file)
}

/// Send the file at `source_path` and return the number of content bytes sent.
pub async fn send_file<S>(stream: &mut S, source_path: &Path) -> Result<u64>
where
    S: AsyncWrite + Unpin,
{
    let file = open_source(source_path).await?;
    let sent = send_reader(stream, file).await?;
    debug!(path = %source_path.display(), bytes = sent, "source sent");
    Ok(sent)
}

/// Frame everything `reader` yields until end-of-input, then write the marker.
///
/// Every data frame carries a full chunk except the last, which is sent
/// short, never padded. A source that is an exact multiple of the chunk size
/// ends with a full frame followed directly by the marker.
pub async fn send_reader<S, R>(stream: &mut S, mut reader: R) -> Result<u64>
where
    S: AsyncWrite + Unpin,
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut sent: u64 = 0;
    loop {
        let n = fill_chunk(&mut reader, &mut buf).await?;
        if n == 0 {
            break;
        }
        codec::write_frame(stream, &buf[..n]).await?;
        sent += n as u64;
        if n < buf.len() {
            break;
        }
    }
    codec::write_end_of_stream(stream).await?;
    stream
        .flush()
        .await
        .map_err(TransferError::StreamWriteFailed)?;
    Ok(sent)
}

/// Read until `buf` is full or the reader reports end-of-input (a read of
/// 0 bytes). Returns the number of bytes filled.
async fn fill_chunk<R>(reader: &mut R, buf: &mut [u8]) -> Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]).await {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(TransferError::SourceReadFailed(e)),
        }
    }
    Ok(filled)
}
