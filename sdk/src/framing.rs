//! Native-messaging frame codec.
//!
//! One frame is a 32-bit little-endian length prefix followed by that
//! many bytes of UTF-8 JSON. The stream is strictly half-duplex per
//! frame and carries nothing else: all diagnostics go to the log,
//! never to the framed stream.
//!
//! A short read on the length prefix means the peer disconnected and
//! ends the session cleanly ([`read_frame`] returns `Ok(None)`); a
//! short read on the body is a protocol violation and surfaces as
//! [`FrameError::TruncatedBody`].

use {
    crate::conf::MAX_FRAME_BYTES,
    serde_json::Value,
    thiserror::Error,
    tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
};

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame length {0} exceeds the {MAX_FRAME_BYTES} byte limit")]
    Oversize(usize),
    #[error("stream ended mid-frame (expected {expected} body bytes, got {got})")]
    TruncatedBody { expected: usize, got: usize },
    #[error("invalid json in frame: {0}")]
    InvalidJson(#[source] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Read a single frame.
///
/// Returns `Ok(None)` on orderly shutdown: EOF (or a partial length
/// prefix) and zero-length frames both end the session. An oversize
/// frame is rejected without reading its body; the stream is not
/// recoverable after that.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Value>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; 4];
    let mut filled = 0;
    while filled < prefix.len() {
        let n = reader.read(&mut prefix[filled..]).await?;
        if n == 0 {
            if filled > 0 {
                log::info!("stream closed mid-prefix ({filled} of 4 bytes)");
            }
            return Ok(None);
        }
        filled += n;
    }

    let len = u32::from_le_bytes(prefix) as usize;
    if len == 0 {
        log::warn!("received zero-length frame, ending session");
        return Ok(None);
    }
    if len > MAX_FRAME_BYTES {
        return Err(FrameError::Oversize(len));
    }

    let mut body = vec![0u8; len];
    let mut got = 0;
    while got < len {
        let n = reader.read(&mut body[got..]).await?;
        if n == 0 {
            return Err(FrameError::TruncatedBody { expected: len, got });
        }
        got += n;
    }

    let value = serde_json::from_slice(&body).map_err(FrameError::InvalidJson)?;
    log::debug!("read frame ({len} bytes)");
    Ok(Some(value))
}

/// Write a single frame and flush it.
pub async fn write_frame<W>(writer: &mut W, value: &Value) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    let body = serde_json::to_vec(value).map_err(FrameError::InvalidJson)?;
    if body.len() > MAX_FRAME_BYTES {
        return Err(FrameError::Oversize(body.len()));
    }

    writer.write_all(&(body.len() as u32).to_le_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    log::debug!("wrote frame ({} bytes)", body.len());
    Ok(())
}
