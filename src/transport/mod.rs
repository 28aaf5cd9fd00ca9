//! Framed binary channel over TCP.
//!
//! A logical message travels as one or more ordered frames; every frame but
//! the last is non-final. Messages that fit in `max_frame_size` use a single
//! frame. The receive side hands each frame to its endpoint as a
//! [`Fragment`](crate::message::accumulator::Fragment).
//!
//! ## Modules
//! - `frame`: wire encoding, `FrameReader`, fragmenting `FrameWriter`
//! - `handshake`: path request/reply before framing starts
//! - `channel`: socket setup, writer task, `Outbound` send handle

pub mod channel;
pub mod frame;
pub mod handshake;

pub use channel::{configure_socket, Channel, ChannelOptions, Outbound, WriterHandle};
pub use frame::{Frame, FrameReader, Opcode};
