//! Length-prefixed frame codec.
//!
//! Used by the simulation transport to move [`Performative`]s over a byte
//! stream: a 4-byte big-endian length followed by the CBOR document. The
//! length is checked against [`MAX_FRAME_SIZE`] before any allocation.

use bytes::{Buf, BufMut, BytesMut};

use crate::{
    errors::{ProtocolError, Result},
    performative::Performative,
};

/// Size of the length prefix.
pub const LENGTH_PREFIX: usize = 4;

/// Largest frame body accepted (16 MB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Append one encoded frame to `dst`.
pub fn encode(frame: &Performative, dst: &mut BytesMut) -> Result<()> {
    let mut body = Vec::new();
    ciborium::ser::into_writer(frame, &mut body)
        .map_err(|e| ProtocolError::Encode { what: "frame", reason: e.to_string() })?;

    if body.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge { size: body.len(), max: MAX_FRAME_SIZE });
    }

    dst.reserve(LENGTH_PREFIX + body.len());
    dst.put_u32(body.len() as u32);
    dst.extend_from_slice(&body);
    Ok(())
}

/// Take one complete frame from the front of `src`.
///
/// Returns `Ok(None)` when more bytes are needed; `src` is left untouched in
/// that case.
pub fn decode(src: &mut BytesMut) -> Result<Option<Performative>> {
    if src.len() < LENGTH_PREFIX {
        return Ok(None);
    }

    let mut prefix = [0u8; LENGTH_PREFIX];
    prefix.copy_from_slice(&src[..LENGTH_PREFIX]);
    let size = u32::from_be_bytes(prefix) as usize;

    if size > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge { size, max: MAX_FRAME_SIZE });
    }

    if src.len() < LENGTH_PREFIX + size {
        src.reserve(LENGTH_PREFIX + size - src.len());
        return Ok(None);
    }

    src.advance(LENGTH_PREFIX);
    let body = src.split_to(size);

    ciborium::de::from_reader(&body[..])
        .map(Some)
        .map_err(|e| ProtocolError::Decode { what: "frame", reason: e.to_string() })
}
