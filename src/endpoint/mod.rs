//! Endpoint state machines for both roles.
//!
//! Each channel has exactly one endpoint, owned by its receive path. The
//! endpoint owns a [`SessionState`] (accumulator plus counters), so no
//! locking is needed: fragments for one channel are handled one at a time.
//!
//! - `echo`: server role, validates and sends valid messages back
//! - `drive`: client role, sends a batch and validates the echoes

pub mod drive;
pub mod echo;

pub use drive::{BatchSender, DriveEndpoint, DriveReport};
pub use echo::EchoEndpoint;

use std::net::SocketAddr;
use tokio::io::AsyncRead;
use tracing::{debug, trace, warn};

use crate::error::{Result, TransportError};
use crate::message::accumulator::Fragment;
use crate::message::{validate, Accumulator, Message, Validation};
use crate::transport::{FrameReader, Opcode, Outbound};

/// Receive-side callbacks of a channel endpoint.
pub trait Endpoint {
    /// Channel is open; `outbound` sends on it.
    fn on_open(&mut self, peer: SocketAddr, outbound: &Outbound);

    /// A data fragment arrived. Returns a message to send back, if any.
    fn on_fragment(&mut self, fragment: Fragment) -> Option<Message>;

    /// Channel closed, orderly or not.
    fn on_close(&mut self);
}

/// Per-session counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SessionStats {
    pub received: u64,
    pub valid: u64,
    pub invalid: u64,
    pub intact: u64,
    pub echoed: u64,
    pub reassembly_errors: u64,
    pub bytes_received: u64,
}

/// Mutable state owned by one channel's receive path.
#[derive(Debug)]
pub struct SessionState {
    role: &'static str,
    accumulator: Accumulator,
    stats: SessionStats,
}

impl SessionState {
    pub fn new(role: &'static str, max_message_size: usize) -> Self {
        Self {
            role,
            accumulator: Accumulator::new(max_message_size),
            stats: SessionStats::default(),
        }
    }

    /// Feed a fragment; on a final fragment, validate the reassembled message.
    ///
    /// Reassembly errors are logged and counted, never propagated.
    pub fn receive(&mut self, fragment: Fragment) -> Option<(Message, Validation)> {
        let message = match self.accumulator.accept(fragment) {
            Ok(Some(message)) => message,
            Ok(None) => return None,
            Err(e) => {
                self.stats.reassembly_errors += 1;
                warn!(role = self.role, error = %e, "Reassembly error");
                return None;
            }
        };

        let validation = validate(&message);
        self.record(&validation);
        Some((message, validation))
    }

    fn record(&mut self, validation: &Validation) {
        self.stats.received += 1;
        self.stats.bytes_received += validation.actual_length as u64;

        if validation.is_valid() {
            self.stats.valid += 1;
        } else {
            self.stats.invalid += 1;
            warn!(
                role = self.role,
                expected = ?validation.declared_length,
                received = validation.actual_length,
                "Length mismatch"
            );
        }

        if validation.mismatches.is_empty() {
            if validation.is_valid() {
                self.stats.intact += 1;
            }
        } else {
            warn!(
                role = self.role,
                count = validation.mismatches.len(),
                first = validation.mismatches[0].offset,
                "Content mismatch"
            );
            for m in &validation.mismatches {
                debug!(
                    role = self.role,
                    offset = m.offset,
                    expected = m.expected,
                    found = m.actual,
                    "Unexpected byte"
                );
            }
        }

        trace!(role = self.role, length = validation.actual_length, "Message checked");
    }

    pub fn record_echo(&mut self) {
        self.stats.echoed += 1;
    }

    /// Release any partial message. Called when the channel closes.
    pub fn close(&mut self) {
        if self.accumulator.is_assembling() {
            debug!(
                role = self.role,
                buffered = self.accumulator.len(),
                "Dropping unterminated message"
            );
        }
        self.accumulator.reset();
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }
}

/// Drive `endpoint` with frames from `reader` until the peer sends close.
///
/// Replies from the endpoint are queued on `outbound` in order. EOF
/// without a close frame is reported as [`TransportError::ChannelClosed`].
pub async fn receive_loop<E, R>(
    reader: &mut FrameReader<R>,
    endpoint: &mut E,
    outbound: &Outbound,
) -> Result<()>
where
    E: Endpoint,
    R: AsyncRead + Unpin,
{
    loop {
        let frame = match reader.read_frame().await? {
            Some(frame) => frame,
            None => return Err(TransportError::ChannelClosed),
        };

        if frame.header.opcode == Opcode::Close {
            return Ok(());
        }

        if let Some(fragment) = frame.into_fragment() {
            if let Some(reply) = endpoint.on_fragment(fragment) {
                outbound.send(reply).await?;
            }
        }
    }
}
