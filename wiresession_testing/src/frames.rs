//! Raw framing helpers for talking to sessions over plain sockets.
//!
//! All helpers use the default [`FixedHeaderCodec`] layout: a four-byte
//! little-endian body length followed by the body.

use std::io;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use wiresession::FixedHeaderCodec;

const HEADER: usize = 4;

/// Frame `body` with the default codec.
///
/// # Panics
///
/// Panics if `body` exceeds the default body limit.
#[must_use]
pub fn frame(body: &[u8]) -> Bytes {
    FixedHeaderCodec::default()
        .frame(body)
        .expect("body fits the default codec")
}

/// Frame `body` and write it to `writer`.
///
/// # Errors
///
/// Propagates write failures.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, body: &[u8]) -> io::Result<()> {
    writer.write_all(&frame(body)).await?;
    writer.flush().await
}

/// Read one frame from `reader` and return its body.
///
/// # Errors
///
/// Returns `UnexpectedEof` if the stream ends before a full frame, and
/// `InvalidData` for a negative length.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<Bytes> {
    let mut header = [0_u8; HEADER];
    reader.read_exact(&mut header).await?;
    let len = usize::try_from(i32::from_le_bytes(header))
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "negative body length"))?;
    let mut body = vec![0_u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Bytes::from(body))
}
