//! Shared fixtures for the Murmur benchmarks.

use murmur_core::{Message, MessageBuffer};

/// Build a buffer of `cache_size` holding `count` messages with ids `m0..`.
#[must_use]
pub fn filled_buffer(cache_size: usize, count: usize) -> MessageBuffer {
    let buffer = MessageBuffer::with_cache_size(cache_size);
    for i in 0..count {
        buffer.publish_one(Message::with_id(format!("m{i}"), "x".repeat(64)));
    }
    buffer
}
