//! Frame encoding and decoding
//!
//! Each frame is a 4-byte little-endian unsigned length prefix followed by
//! exactly that many payload bytes. The payload is UTF-8 JSON but this
//! layer treats it as opaque bytes.

use std::io::{ErrorKind, Read, Write};

use thiserror::Error;

/// Maximum accepted frame payload length (64 MiB)
///
/// A corrupt or hostile length prefix must not translate into an
/// unbounded allocation, so anything above this is a fatal protocol
/// error rather than an allocation attempt.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Errors that can occur on the framed channel
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The stream ended cleanly before a new frame started
    #[error("channel closed")]
    Closed,

    /// The stream ended in the middle of a frame
    #[error("stream closed mid-frame")]
    ShortRead,

    #[error("frame length {0} exceeds maximum of {MAX_FRAME_LEN} bytes")]
    FrameTooLarge(usize),

    #[error("channel I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for channel operations
pub type ChannelResult<T> = Result<T, ChannelError>;

/// Read one complete frame, blocking until it is available.
///
/// Returns [`ChannelError::Closed`] if the stream ends before the first
/// prefix byte, which is the normal shutdown path when the parent closes
/// our stdin. An EOF anywhere later in the frame is a [`ChannelError::ShortRead`].
pub fn read_frame<R: Read>(reader: &mut R) -> ChannelResult<Vec<u8>> {
    let mut prefix = [0u8; 4];
    read_full(reader, &mut prefix, true)?;

    let len = u32::from_le_bytes(prefix) as usize;
    if len > MAX_FRAME_LEN {
        return Err(ChannelError::FrameTooLarge(len));
    }

    let mut payload = vec![0u8; len];
    read_full(reader, &mut payload, false)?;
    Ok(payload)
}

/// Write one frame: length prefix, payload, flush.
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> ChannelResult<()> {
    if payload.len() > MAX_FRAME_LEN {
        return Err(ChannelError::FrameTooLarge(payload.len()));
    }

    writer.write_all(&(payload.len() as u32).to_le_bytes())?;
    writer.write_all(payload)?;
    writer.flush()?;
    Ok(())
}

/// Fill `buf`, distinguishing a clean EOF at a frame boundary from a
/// truncated frame.
fn read_full<R: Read>(
    reader: &mut R,
    buf: &mut [u8],
    at_frame_boundary: bool,
) -> ChannelResult<()> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => {
                return if filled == 0 && at_frame_boundary {
                    Err(ChannelError::Closed)
                } else {
                    Err(ChannelError::ShortRead)
                };
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(ChannelError::Io(e)),
        }
    }
    Ok(())
}
