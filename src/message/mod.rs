//! Self-describing binary messages.
//!
//! Every message carries its own total length in a 4-byte big-endian header,
//! followed by a deterministic content pattern:
//!
//! ```text
//! offset:  0   1   2   3   4   5   6  ...  L-1
//!         [ L as u32 (BE) ][ 4 ][ 5 ][ 6 ] ... [(L-1) % 256]
//! ```
//!
//! ## Components
//! - `generator`: builds batches of random-length messages
//! - `accumulator`: reassembles fragments into complete messages
//! - `validator`: checks a message against its header and pattern

pub mod accumulator;
pub mod generator;
pub mod validator;

pub use accumulator::{Accumulator, ReassemblyError};
pub use generator::{generate, generate_one};
pub use validator::{validate, EchoPolicy, Validation};

use bytes::Bytes;
use std::ops::Deref;

/// Size of the length header in bytes.
pub const HEADER_SIZE: usize = 4;

/// Smallest message that can hold its own header.
pub const MIN_MESSAGE_LENGTH: usize = HEADER_SIZE;

/// Expected content byte at `offset` (only meaningful for `offset >= HEADER_SIZE`).
#[inline]
pub fn pattern_byte(offset: usize) -> u8 {
    (offset % 256) as u8
}

/// Decode the declared length from the first four bytes, if present.
pub fn declared_length(bytes: &[u8]) -> Option<u32> {
    let header: [u8; HEADER_SIZE] = bytes.get(..HEADER_SIZE)?.try_into().ok()?;
    Some(u32::from_be_bytes(header))
}

/// An immutable, complete message.
///
/// Backed by `Bytes`, so cloning is a reference count bump and handing the
/// same message back to the channel never copies the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message(Bytes);

impl Message {
    /// Wrap raw bytes as a message. No validation is performed.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// Length of the message in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if the message has no bytes at all.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Length declared by the message header.
    pub fn declared_length(&self) -> Option<u32> {
        declared_length(&self.0)
    }

    /// Underlying shared buffer.
    pub fn bytes(&self) -> &Bytes {
        &self.0
    }

    /// Consume the message, returning its buffer.
    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

impl Deref for Message {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl AsRef<[u8]> for Message {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}
