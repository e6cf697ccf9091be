//! Thin adapter over `rtcm-rs`, isolating every direct call into the crate
//! behind a narrow surface the rest of the caster depends on. Grounded on
//! the decode loop in the teacher's `client.rs`, which drives the same
//! `rtcm_rs::MessageFrame::new(..).get_message()` / `.frame_len()` pair
//! while draining a growable buffer.

use rtcm_rs::{Message, MessageFrame};

/// One successfully framed RTCM3 message plus how many bytes it consumed
/// from the input buffer, so the caller can advance past it.
pub struct DecodedFrame {
    pub message: Message,
    pub consumed: usize,
}

/// Attempt to decode a single framed message from the head of `buf`.
/// Returns `None` when `buf` does not yet contain a complete frame, or when
/// framing fails; either way the caller should wait for more bytes rather
/// than treat this as fatal.
pub fn decode_one(buf: &[u8]) -> Option<DecodedFrame> {
    let frame = MessageFrame::new(buf).ok()?;
    let consumed = frame.frame_len();
    if consumed == 0 {
        return None;
    }
    Some(DecodedFrame { message: frame.get_message(), consumed })
}

/// Drain every complete frame currently available in `buf`, returning the
/// decoded messages and the number of leading bytes that were consumed.
/// Trailing partial-frame bytes are left for the next read.
pub fn decode_all(buf: &[u8]) -> (Vec<Message>, usize) {
    let mut messages = Vec::new();
    let mut offset = 0;
    while offset < buf.len() {
        match decode_one(&buf[offset..]) {
            Some(frame) if frame.consumed > 0 => {
                messages.push(frame.message);
                offset += frame.consumed;
            }
            _ => break,
        }
    }
    (messages, offset)
}
