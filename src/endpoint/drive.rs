//! Client-side endpoint: sends a batch, validates what comes back.

use std::net::SocketAddr;
use tracing::{debug, trace};

use super::{Endpoint, SessionState, SessionStats};
use crate::error::Result;
use crate::message::accumulator::Fragment;
use crate::message::Message;
use crate::transport::Outbound;

/// Receives echoes and validates them. Never replies.
#[derive(Debug)]
pub struct DriveEndpoint {
    state: SessionState,
    outbound: Option<Outbound>,
    peer: Option<SocketAddr>,
}

impl DriveEndpoint {
    pub fn new(max_message_size: usize) -> Self {
        Self {
            state: SessionState::new("client", max_message_size),
            outbound: None,
            peer: None,
        }
    }

    /// Sending half, available once the channel is open.
    pub fn sender(&self) -> Option<BatchSender> {
        self.outbound.clone().map(|outbound| BatchSender { outbound })
    }

    pub fn stats(&self) -> &SessionStats {
        self.state.stats()
    }
}

impl Endpoint for DriveEndpoint {
    fn on_open(&mut self, peer: SocketAddr, outbound: &Outbound) {
        debug!(%peer, "Drive session opened");
        self.peer = Some(peer);
        self.outbound = Some(outbound.clone());
    }

    fn on_fragment(&mut self, fragment: Fragment) -> Option<Message> {
        self.state.receive(fragment);
        None
    }

    fn on_close(&mut self) {
        self.state.close();
        self.outbound = None;
        debug!(peer = ?self.peer, received = self.state.stats().received, "Drive session closed");
    }
}

/// Counters for the sending half.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SendStats {
    pub sent: u64,
    pub bytes_sent: u64,
}

/// Transmits messages one at a time, each as a complete logical message.
///
/// Fragmentation, if any, happens in the channel's writer.
#[derive(Clone)]
pub struct BatchSender {
    outbound: Outbound,
}

impl BatchSender {
    /// Send every message in order. Stops at the first transport failure.
    pub async fn send_batch(&self, messages: Vec<Message>) -> Result<SendStats> {
        let mut stats = SendStats::default();
        for message in messages {
            let len = message.len() as u64;
            self.outbound.send(message).await?;
            stats.sent += 1;
            stats.bytes_sent += len;
            trace!(sent = stats.sent, length = len, "Message queued");
        }
        Ok(stats)
    }

    /// Send a close frame after the batch; the peer answers once its echoes are out.
    pub async fn finish(self) -> Result<()> {
        self.outbound.close().await
    }
}

/// Outcome of one client exchange.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DriveReport {
    pub sent: u64,
    pub bytes_sent: u64,
    pub received: u64,
    pub bytes_received: u64,
    pub valid: u64,
    pub invalid: u64,
    pub intact: u64,
    pub reassembly_errors: u64,
}

impl DriveReport {
    pub fn new(send: SendStats, receive: &SessionStats) -> Self {
        Self {
            sent: send.sent,
            bytes_sent: send.bytes_sent,
            received: receive.received,
            bytes_received: receive.bytes_received,
            valid: receive.valid,
            invalid: receive.invalid,
            intact: receive.intact,
            reassembly_errors: receive.reassembly_errors,
        }
    }

    /// Every sent message came back intact.
    pub fn is_complete(&self) -> bool {
        self.received == self.sent
            && self.intact == self.sent
            && self.bytes_received == self.bytes_sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::generate_one;

    #[test]
    fn test_never_replies() {
        let mut endpoint = DriveEndpoint::new(1 << 20);
        let msg = generate_one(64);
        assert!(endpoint
            .on_fragment(Fragment::binary(msg.into_bytes(), true))
            .is_none());
        assert_eq!(endpoint.stats().valid, 1);
    }

    #[test]
    fn test_sender_requires_open_channel() {
        let endpoint = DriveEndpoint::new(1 << 20);
        assert!(endpoint.sender().is_none());
    }

    #[test]
    fn test_report_completeness() {
        let send = SendStats {
            sent: 2,
            bytes_sent: 20,
        };
        let receive = SessionStats {
            received: 2,
            valid: 2,
            intact: 2,
            bytes_received: 20,
            ..SessionStats::default()
        };
        assert!(DriveReport::new(send, &receive).is_complete());

        let partial = SessionStats {
            received: 1,
            valid: 1,
            intact: 1,
            bytes_received: 10,
            ..SessionStats::default()
        };
        assert!(!DriveReport::new(send, &partial).is_complete());
    }
}
