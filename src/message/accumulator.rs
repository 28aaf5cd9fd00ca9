//! Fragment reassembly.
//!
//! Uses `bytes::BytesMut` as the growable reassembly buffer (amortized
//! doubling on extend). Implements a small state machine per message:
//! - `Idle`: nothing buffered, next fragment must start a message
//! - `Assembling`: a message is in progress, waiting for its final fragment
//! - `Discarding`: skipping the rest of a message that was rejected
//!
//! A message delivered as a single final fragment bypasses the buffer
//! entirely: its payload becomes the message without a copy.

use bytes::{Bytes, BytesMut};
use thiserror::Error;

use super::Message;

/// Whether a fragment opens a message or continues one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentKind {
    /// First fragment of a binary message.
    Binary,
    /// Subsequent fragment of the message in progress.
    Continuation,
}

/// One piece of a message as delivered by the channel.
#[derive(Debug, Clone)]
pub struct Fragment {
    pub kind: FragmentKind,
    pub payload: Bytes,
    pub is_final: bool,
}

impl Fragment {
    /// Opening fragment.
    pub fn binary(payload: impl Into<Bytes>, is_final: bool) -> Self {
        Self {
            kind: FragmentKind::Binary,
            payload: payload.into(),
            is_final,
        }
    }

    /// Continuation fragment.
    pub fn continuation(payload: impl Into<Bytes>, is_final: bool) -> Self {
        Self {
            kind: FragmentKind::Continuation,
            payload: payload.into(),
            is_final,
        }
    }
}

/// Ordering or size violations seen while reassembling.
///
/// All of these are recoverable: the accumulator is left ready for the next
/// message and the channel stays open.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReassemblyError {
    /// A continuation arrived with no message in progress.
    #[error("continuation fragment without a message in progress")]
    UnexpectedContinuation,

    /// A new message started before the previous one finished.
    #[error("message interrupted by a new binary fragment ({discarded} bytes discarded)")]
    Interrupted { discarded: usize },

    /// The message grew past the configured limit.
    #[error("message exceeds maximum size of {limit} bytes")]
    TooLarge { limit: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Assembling,
    Discarding,
}

/// Reassembly buffer owned by a single receive path.
#[derive(Debug)]
pub struct Accumulator {
    buffer: BytesMut,
    state: State,
    max_message_size: usize,
}

impl Accumulator {
    /// Create an accumulator that rejects messages over `max_message_size` bytes.
    pub fn new(max_message_size: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            state: State::Idle,
            max_message_size,
        }
    }

    /// Feed the next fragment in receipt order.
    ///
    /// Returns the complete message when `fragment` is final.
    pub fn accept(&mut self, fragment: Fragment) -> Result<Option<Message>, ReassemblyError> {
        match (self.state, fragment.kind) {
            (State::Discarding, FragmentKind::Continuation) => {
                if fragment.is_final {
                    self.state = State::Idle;
                }
                Ok(None)
            }

            (State::Idle | State::Discarding, FragmentKind::Binary) => {
                self.state = State::Idle;
                self.start(fragment)
            }

            (State::Idle, FragmentKind::Continuation) => {
                self.skip_rest(fragment.is_final);
                Err(ReassemblyError::UnexpectedContinuation)
            }

            (State::Assembling, FragmentKind::Binary) => {
                let discarded = self.buffer.len();
                self.reset();
                self.skip_rest(fragment.is_final);
                Err(ReassemblyError::Interrupted { discarded })
            }

            (State::Assembling, FragmentKind::Continuation) => {
                self.extend(&fragment.payload, fragment.is_final)?;
                if fragment.is_final {
                    Ok(Some(self.take_message()))
                } else {
                    Ok(None)
                }
            }
        }
    }

    fn start(&mut self, fragment: Fragment) -> Result<Option<Message>, ReassemblyError> {
        if fragment.is_final && self.buffer.is_empty() {
            if fragment.payload.len() > self.max_message_size {
                return Err(ReassemblyError::TooLarge {
                    limit: self.max_message_size,
                });
            }
            return Ok(Some(Message::from_bytes(fragment.payload)));
        }

        self.extend(&fragment.payload, fragment.is_final)?;
        if fragment.is_final {
            Ok(Some(self.take_message()))
        } else {
            self.state = State::Assembling;
            Ok(None)
        }
    }

    fn extend(&mut self, payload: &[u8], is_final: bool) -> Result<(), ReassemblyError> {
        if self.buffer.len() + payload.len() > self.max_message_size {
            self.reset();
            self.skip_rest(is_final);
            return Err(ReassemblyError::TooLarge {
                limit: self.max_message_size,
            });
        }
        self.copy_fragment(payload);
        Ok(())
    }

    fn skip_rest(&mut self, is_final: bool) {
        self.state = if is_final {
            State::Idle
        } else {
            State::Discarding
        };
    }

    /// Append fragment bytes to the message in progress.
    pub fn copy_fragment(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
        self.state = State::Assembling;
    }

    /// Take everything accumulated so far as a message, leaving the buffer empty.
    pub fn take_message(&mut self) -> Message {
        self.state = State::Idle;
        Message::from_bytes(self.buffer.split().freeze())
    }

    /// Drop any partial message and release the buffer's memory.
    pub fn reset(&mut self) {
        self.buffer = BytesMut::new();
        self.state = State::Idle;
    }

    /// Number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// True while a message is waiting for its final fragment.
    pub fn is_assembling(&self) -> bool {
        self.state == State::Assembling
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{generate_one, validate};

    const LIMIT: usize = 1024 * 1024;

    /// Split `bytes` at the given cut points and feed the pieces in order.
    fn feed_partitioned(acc: &mut Accumulator, bytes: &Bytes, cuts: &[usize]) -> Option<Message> {
        let mut bounds = vec![0];
        bounds.extend_from_slice(cuts);
        bounds.push(bytes.len());

        let mut result = None;
        let pieces = bounds.len() - 1;
        for i in 0..pieces {
            let payload = bytes.slice(bounds[i]..bounds[i + 1]);
            let is_final = i == pieces - 1;
            let fragment = if i == 0 {
                Fragment::binary(payload, is_final)
            } else {
                Fragment::continuation(payload, is_final)
            };
            let out = acc.accept(fragment).unwrap();
            if is_final {
                result = out;
            } else {
                assert!(out.is_none());
            }
        }
        result
    }

    #[test]
    fn test_single_fragment_is_zero_copy() {
        let mut acc = Accumulator::new(LIMIT);
        let msg = generate_one(100);

        let out = acc
            .accept(Fragment::binary(msg.bytes().clone(), true))
            .unwrap()
            .unwrap();

        assert_eq!(out, msg);
        assert_eq!(out.bytes().as_ptr(), msg.bytes().as_ptr());
        assert!(acc.is_empty());
        assert!(validate(&out).is_valid());
    }

    #[test]
    fn test_fragmentation_invariance() {
        let msg = generate_one(3000);
        let bytes = msg.bytes().clone();
        let partitions: &[&[usize]] = &[
            &[],
            &[1],
            &[2],
            &[4],
            &[1024, 2048],
            &[1, 2, 3, 4, 5],
            &[1500, 2999],
            &[100, 200, 300, 1000, 2000, 2500],
        ];

        for cuts in partitions {
            let mut acc = Accumulator::new(LIMIT);
            let out = feed_partitioned(&mut acc, &bytes, cuts).unwrap();
            assert_eq!(out, msg, "cuts {cuts:?}");
            assert!(acc.is_empty());
        }
    }

    #[test]
    fn test_byte_at_a_time() {
        let msg = generate_one(300);
        let bytes = msg.bytes().clone();
        let cuts: Vec<usize> = (1..bytes.len()).collect();

        let mut acc = Accumulator::new(LIMIT);
        let out = feed_partitioned(&mut acc, &bytes, &cuts).unwrap();
        assert_eq!(out, msg);
        assert!(validate(&out).is_valid());
    }

    #[test]
    fn test_no_residue_between_messages() {
        let first = generate_one(500);
        let second = generate_one(9);
        let mut acc = Accumulator::new(LIMIT);

        let out = feed_partitioned(&mut acc, first.bytes(), &[200]).unwrap();
        assert_eq!(out, first);
        assert_eq!(acc.len(), 0);

        let out = feed_partitioned(&mut acc, second.bytes(), &[4]).unwrap();
        assert_eq!(out, second);
        assert_eq!(out.len(), 9);
    }

    #[test]
    fn test_take_message_empties_buffer() {
        let mut acc = Accumulator::new(LIMIT);
        acc.copy_fragment(b"abc");
        acc.copy_fragment(b"def");
        assert!(acc.is_assembling());

        let msg = acc.take_message();
        assert_eq!(&msg[..], b"abcdef");
        assert!(acc.is_empty());
        assert!(!acc.is_assembling());
    }

    #[test]
    fn test_reset_drops_partial_message() {
        let mut acc = Accumulator::new(LIMIT);
        acc.accept(Fragment::binary(vec![1u8; 64], false)).unwrap();
        assert_eq!(acc.len(), 64);

        acc.reset();
        assert!(acc.is_empty());

        let msg = generate_one(4);
        let out = acc
            .accept(Fragment::binary(msg.bytes().clone(), true))
            .unwrap();
        assert_eq!(out, Some(msg));
    }

    #[test]
    fn test_unexpected_continuation() {
        let mut acc = Accumulator::new(LIMIT);
        let result = acc.accept(Fragment::continuation(vec![0u8; 8], true));
        assert_eq!(result, Err(ReassemblyError::UnexpectedContinuation));
        assert!(acc.is_empty());
    }

    #[test]
    fn test_orphan_continuations_are_skipped() {
        let mut acc = Accumulator::new(LIMIT);
        assert!(acc.accept(Fragment::continuation(vec![0u8; 8], false)).is_err());
        assert_eq!(
            acc.accept(Fragment::continuation(vec![0u8; 8], true)),
            Ok(None)
        );

        let msg = generate_one(20);
        let out = feed_partitioned(&mut acc, msg.bytes(), &[10]).unwrap();
        assert_eq!(out, msg);
    }

    #[test]
    fn test_interrupted_message() {
        let mut acc = Accumulator::new(LIMIT);
        acc.accept(Fragment::binary(vec![7u8; 10], false)).unwrap();

        let result = acc.accept(Fragment::binary(vec![8u8; 10], true));
        assert_eq!(result, Err(ReassemblyError::Interrupted { discarded: 10 }));
        assert!(acc.is_empty());
        assert!(!acc.is_assembling());
    }

    #[test]
    fn test_too_large_skips_remaining_fragments() {
        let mut acc = Accumulator::new(16);
        acc.accept(Fragment::binary(vec![0u8; 10], false)).unwrap();

        let result = acc.accept(Fragment::continuation(vec![0u8; 10], false));
        assert_eq!(result, Err(ReassemblyError::TooLarge { limit: 16 }));
        assert!(acc.is_empty());

        // Tail of the rejected message is dropped silently
        assert_eq!(
            acc.accept(Fragment::continuation(vec![0u8; 10], true)),
            Ok(None)
        );

        let msg = generate_one(12);
        let out = acc
            .accept(Fragment::binary(msg.bytes().clone(), true))
            .unwrap();
        assert_eq!(out, Some(msg));
    }

    #[test]
    fn test_too_large_single_fragment() {
        let mut acc = Accumulator::new(16);
        let result = acc.accept(Fragment::binary(vec![0u8; 17], true));
        assert_eq!(result, Err(ReassemblyError::TooLarge { limit: 16 }));
    }
}
