//! Length-prefixed bincode framing
//!
//! Layout: `[len: u32 LE][bincode(BusMessage)]`. A clean EOF on a frame
//! boundary ends the stream (`Ok(None)`); EOF inside a frame is an error.

use crate::message::BusMessage;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a single frame payload
pub const MAX_FRAME_LEN: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode frame: {0}")]
    Encode(#[source] bincode::Error),

    #[error("Failed to decode frame: {0}")]
    Decode(#[source] bincode::Error),

    #[error("Frame of {len} bytes exceeds limit of {max} bytes")]
    Oversized { len: usize, max: usize },

    #[error("Stream ended inside a frame ({read} of {expected} bytes)")]
    Truncated { read: usize, expected: usize },
}

/// Serialize a message into a complete frame (prefix included)
pub fn encode_frame(msg: &BusMessage) -> Result<Vec<u8>, FrameError> {
    let payload = bincode::serialize(msg).map_err(FrameError::Encode)?;
    if payload.len() > MAX_FRAME_LEN {
        return Err(FrameError::Oversized {
            len: payload.len(),
            max: MAX_FRAME_LEN,
        });
    }

    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Write one frame and flush
pub async fn write_frame<W>(writer: &mut W, msg: &BusMessage) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(msg)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame. `Ok(None)` on clean end of stream.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<BusMessage>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    let mut filled = 0;
    while filled < len_buf.len() {
        let n = reader.read(&mut len_buf[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(FrameError::Truncated {
                read: filled,
                expected: len_buf.len(),
            });
        }
        filled += n;
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(FrameError::Oversized {
            len,
            max: MAX_FRAME_LEN,
        });
    }

    let mut payload = vec![0u8; len];
    let mut read = 0;
    while read < len {
        let n = reader.read(&mut payload[read..]).await?;
        if n == 0 {
            return Err(FrameError::Truncated { read, expected: len });
        }
        read += n;
    }

    bincode::deserialize(&payload)
        .map(Some)
        .map_err(FrameError::Decode)
}
