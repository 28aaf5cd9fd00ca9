//! Random-length message generation.

use bytes::{BufMut, BytesMut};
use rand::Rng;

use super::{pattern_byte, Message, HEADER_SIZE, MIN_MESSAGE_LENGTH};

/// Generate `count` messages with lengths drawn uniformly from `[0, max_capacity)`.
///
/// Draws below [`MIN_MESSAGE_LENGTH`] are clamped up so every message can
/// hold its header. A `max_capacity` of zero yields minimum-size messages.
pub fn generate<R: Rng + ?Sized>(count: usize, max_capacity: u32, rng: &mut R) -> Vec<Message> {
    let mut messages = Vec::with_capacity(count);
    for _ in 0..count {
        let capacity = if max_capacity == 0 {
            0
        } else {
            rng.gen_range(0..max_capacity)
        };
        messages.push(generate_one(capacity));
    }
    messages
}

/// Build a single message of exactly `capacity` bytes (clamped to the minimum).
pub fn generate_one(capacity: u32) -> Message {
    let length = (capacity as usize).max(MIN_MESSAGE_LENGTH);

    let mut buffer = BytesMut::with_capacity(length);
    buffer.put_u32(length as u32);
    for i in HEADER_SIZE..length {
        buffer.put_u8(pattern_byte(i));
    }

    Message::from_bytes(buffer.freeze())
}
