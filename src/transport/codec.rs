//! Length-prefixed frame codec.
//!
//! Frame layout: 4-byte big-endian payload length, then an LZ4 block with
//! its uncompressed size prepended, wrapping a bincode-encoded message.

use crate::core::{Error, Result};
use lz4_flex::{compress_prepend_size, decompress_size_prepended};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest accepted frame, compressed or not.
pub const MAX_FRAME_SIZE: usize = 256 * 1024 * 1024;

/// Encode a message into a frame payload (without the length prefix).
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>> {
    let raw = bincode::serialize(message)?;
    if raw.len() > MAX_FRAME_SIZE {
        return Err(Error::Transport(format!(
            "message of {} bytes exceeds frame limit",
            raw.len()
        )));
    }
    Ok(compress_prepend_size(&raw))
}

/// Decode a frame payload produced by [`encode`].
pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T> {
    // lz4_flex allocates the prepended size up front
    let declared = payload
        .get(..4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as usize)
        .ok_or_else(|| Error::Transport("truncated frame".to_string()))?;
    if declared > MAX_FRAME_SIZE {
        return Err(Error::Transport(format!(
            "declared size {} exceeds frame limit",
            declared
        )));
    }
    let raw = decompress_size_prepended(payload)?;
    Ok(bincode::deserialize(&raw)?)
}

/// Write one framed message.
pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let payload = encode(message)?;
    writer.write_u32(payload.len() as u32).await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one framed message.
///
/// A clean end of stream before the length prefix surfaces as
/// `Error::Io` with kind `UnexpectedEof`.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<T>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let len = reader.read_u32().await? as usize;
    if len > MAX_FRAME_SIZE {
        return Err(Error::Transport(format!(
            "frame of {} bytes exceeds limit",
            len
        )));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    decode(&payload)
}
