//! Server-side endpoint: reassemble, validate, echo.

use std::net::SocketAddr;
use tracing::debug;

use super::{Endpoint, SessionState, SessionStats};
use crate::message::accumulator::Fragment;
use crate::message::{EchoPolicy, Message};
use crate::transport::Outbound;

/// Echoes every message that passes the configured [`EchoPolicy`].
///
/// Invalid messages are reported and dropped; the channel stays open.
#[derive(Debug)]
pub struct EchoEndpoint {
    state: SessionState,
    policy: EchoPolicy,
    peer: Option<SocketAddr>,
}

impl EchoEndpoint {
    pub fn new(max_message_size: usize, policy: EchoPolicy) -> Self {
        Self {
            state: SessionState::new("server", max_message_size),
            policy,
            peer: None,
        }
    }

    pub fn stats(&self) -> &SessionStats {
        self.state.stats()
    }
}

impl Endpoint for EchoEndpoint {
    fn on_open(&mut self, peer: SocketAddr, _outbound: &Outbound) {
        debug!(%peer, policy = ?self.policy, "Echo session opened");
        self.peer = Some(peer);
    }

    fn on_fragment(&mut self, fragment: Fragment) -> Option<Message> {
        let (message, validation) = self.state.receive(fragment)?;

        if self.policy.allows(&validation) {
            self.state.record_echo();
            Some(message)
        } else {
            None
        }
    }

    fn on_close(&mut self) {
        self.state.close();
        let stats = self.state.stats();
        debug!(
            peer = ?self.peer,
            received = stats.received,
            echoed = stats.echoed,
            invalid = stats.invalid,
            "Echo session closed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::generate_one;

    fn fragments_of(message: &Message, size: usize) -> Vec<Fragment> {
        let bytes = message.bytes();
        let count = bytes.len().div_ceil(size);
        (0..count)
            .map(|i| {
                let end = ((i + 1) * size).min(bytes.len());
                let payload = bytes.slice(i * size..end);
                let is_final = i == count - 1;
                if i == 0 {
                    Fragment::binary(payload, is_final)
                } else {
                    Fragment::continuation(payload, is_final)
                }
            })
            .collect()
    }

    #[test]
    fn test_echoes_valid_message_unchanged() {
        let mut endpoint = EchoEndpoint::new(1 << 20, EchoPolicy::Length);
        let msg = generate_one(2500);

        let mut replies = Vec::new();
        for fragment in fragments_of(&msg, 1024) {
            replies.extend(endpoint.on_fragment(fragment));
        }

        assert_eq!(replies, vec![msg]);
        assert_eq!(endpoint.stats().echoed, 1);
    }

    #[test]
    fn test_does_not_echo_bad_length() {
        let mut endpoint = EchoEndpoint::new(1 << 20, EchoPolicy::Length);
        let mut bytes = generate_one(100).to_vec();
        bytes[..4].copy_from_slice(&101u32.to_be_bytes());

        let reply = endpoint.on_fragment(Fragment::binary(bytes, true));
        assert!(reply.is_none());
        assert_eq!(endpoint.stats().invalid, 1);
        assert_eq!(endpoint.stats().echoed, 0);

        // Channel keeps working for the next message
        let msg = generate_one(10);
        let reply = endpoint.on_fragment(Fragment::binary(msg.bytes().clone(), true));
        assert_eq!(reply, Some(msg));
    }

    #[test]
    fn test_minimum_message_round_trips() {
        let mut endpoint = EchoEndpoint::new(1 << 20, EchoPolicy::Length);
        let msg = generate_one(4);
        let reply = endpoint.on_fragment(Fragment::binary(msg.bytes().clone(), true));
        assert_eq!(reply, Some(msg));
    }

    #[test]
    fn test_policy_gates_content_errors() {
        let mut bytes = generate_one(50).to_vec();
        bytes[30] = 0;

        let mut lenient = EchoEndpoint::new(1 << 20, EchoPolicy::Length);
        assert!(lenient
            .on_fragment(Fragment::binary(bytes.clone(), true))
            .is_some());

        let mut strict = EchoEndpoint::new(1 << 20, EchoPolicy::Strict);
        assert!(strict.on_fragment(Fragment::binary(bytes, true)).is_none());
    }
}
