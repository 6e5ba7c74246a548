use bytes::{Buf, Bytes};

use crate::error::{PlaybackError, PlaybackResult};

/// Encoded audio frames in send order.
pub type FrameSequence = Vec<Bytes>;

/// Splits a buffer of `[u16 LE length][payload]` records into frames.
///
/// Running out of bytes exactly on a record boundary ends the sequence;
/// running out anywhere else means the encoder output was cut short.
pub fn split_frames(mut data: Bytes) -> PlaybackResult<FrameSequence> {
    let mut frames = Vec::new();

    while data.has_remaining() {
        if data.remaining() < 2 {
            return Err(PlaybackError::Encoding(format!(
                "truncated length prefix after frame {}",
                frames.len()
            )));
        }
        let len = data.get_u16_le() as usize;

        if data.remaining() < len {
            return Err(PlaybackError::Encoding(format!(
                "frame {} declares {} bytes but only {} remain",
                frames.len(),
                len,
                data.remaining()
            )));
        }
        frames.push(data.split_to(len));
    }

    Ok(frames)
}

/// Inverse of [`split_frames`]. Payloads past `u16::MAX` bytes are cut.
pub fn write_frame(out: &mut Vec<u8>, frame: &[u8]) {
    let len = u16::try_from(frame.len()).unwrap_or(u16::MAX);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&frame[..len as usize]);
}
