#[cfg(test)]
#[path = "decoder_test.rs"]
mod tests;

use crate::backend::StreamError;
use crate::config::constants::FRAME_TERMINATOR;
use crate::models::MessageDelta;

/// Splits the chat byte stream into NUL-terminated JSON frames.
///
/// The decoder holds no state of its own: the caller owns the pending
/// buffer and keeps appending chunks to it. Each call consumes every
/// complete frame and leaves the trailing, not yet terminated bytes in
/// place for the next read.
pub struct FrameDecoder;

impl FrameDecoder {
    pub fn decode(pending: &mut Vec<u8>) -> Result<Vec<MessageDelta>, StreamError> {
        let Some(last) = pending.iter().rposition(|b| *b == FRAME_TERMINATOR) else {
            return Ok(vec![]);
        };

        let rest = pending.split_off(last + 1);
        let complete = std::mem::replace(pending, rest);

        complete
            .split(|b| *b == FRAME_TERMINATOR)
            .filter(|frame| !frame.iter().all(u8::is_ascii_whitespace))
            .map(Self::decode_frame)
            .collect()
    }

    pub fn decode_frame(frame: &[u8]) -> Result<MessageDelta, StreamError> {
        log::trace!("stream frame: {}", String::from_utf8_lossy(frame));
        serde_json::from_slice::<MessageDelta>(frame).map_err(|e| {
            log::warn!("Malformed stream frame: {}", e);
            StreamError::transport(None, None)
        })
    }
}
