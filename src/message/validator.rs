//! Message validation against the self-declared length and content pattern.

use super::{declared_length, pattern_byte, HEADER_SIZE};

/// A content byte that does not match the expected pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mismatch {
    pub offset: usize,
    pub expected: u8,
    pub actual: u8,
}

/// Outcome of validating one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validation {
    /// Length from the header, `None` if the message is shorter than the header.
    pub declared_length: Option<u32>,
    /// Number of bytes actually received.
    pub actual_length: usize,
    /// Every content byte that deviates from the pattern, in offset order.
    pub mismatches: Vec<Mismatch>,
}

impl Validation {
    /// Declared length matches the actual length.
    ///
    /// This is the gate used for echoing; content mismatches are diagnostic.
    pub fn is_valid(&self) -> bool {
        self.declared_length
            .is_some_and(|declared| declared as usize == self.actual_length)
    }

    /// Length matches and every content byte follows the pattern.
    pub fn is_intact(&self) -> bool {
        self.is_valid() && self.mismatches.is_empty()
    }
}

/// Which validation result allows the server to echo a message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EchoPolicy {
    /// Echo when the declared length matches.
    #[default]
    Length,
    /// Echo only when length and content both check out.
    Strict,
}

impl EchoPolicy {
    pub fn allows(self, validation: &Validation) -> bool {
        match self {
            EchoPolicy::Length => validation.is_valid(),
            EchoPolicy::Strict => validation.is_intact(),
        }
    }
}

/// Validate `message`, collecting every content mismatch.
///
/// Never fails: problems are reported in the returned [`Validation`].
pub fn validate(message: &[u8]) -> Validation {
    let mismatches = message
        .iter()
        .enumerate()
        .skip(HEADER_SIZE)
        .filter_map(|(offset, &actual)| {
            let expected = pattern_byte(offset);
            (actual != expected).then_some(Mismatch {
                offset,
                expected,
                actual,
            })
        })
        .collect();

    Validation {
        declared_length: declared_length(message),
        actual_length: message.len(),
        mismatches,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::generate_one;

    #[test]
    fn test_generated_message_is_intact() {
        for capacity in [4, 5, 300, 4095] {
            let msg = generate_one(capacity);
            let result = validate(&msg);
            assert!(result.is_valid());
            assert!(result.is_intact());
            assert_eq!(result.actual_length, capacity as usize);
        }
    }

    #[test]
    fn test_minimum_size_message() {
        let result = validate(&[0, 0, 0, 4]);
        assert!(result.is_intact());
        assert_eq!(result.declared_length, Some(4));
    }

    #[test]
    fn test_declared_length_off_by_one() {
        let mut bytes = generate_one(64).to_vec();
        bytes[..4].copy_from_slice(&65u32.to_be_bytes());

        let result = validate(&bytes);
        assert!(!result.is_valid());
        assert_eq!(result.declared_length, Some(65));
        assert_eq!(result.actual_length, 64);
        assert!(result.mismatches.is_empty());
    }

    #[test]
    fn test_truncated_header() {
        let result = validate(&[0, 0]);
        assert!(!result.is_valid());
        assert_eq!(result.declared_length, None);
        assert_eq!(result.actual_length, 2);
    }

    #[test]
    fn test_reports_all_mismatches() {
        let mut bytes = generate_one(600).to_vec();
        bytes[10] = 0xFF;
        bytes[300] = 0;
        bytes[599] = 1;

        let result = validate(&bytes);
        assert!(result.is_valid());
        assert!(!result.is_intact());
        assert_eq!(
            result.mismatches,
            vec![
                Mismatch {
                    offset: 10,
                    expected: 10,
                    actual: 0xFF,
                },
                Mismatch {
                    offset: 300,
                    expected: 44,
                    actual: 0,
                },
                Mismatch {
                    offset: 599,
                    expected: 87,
                    actual: 1,
                },
            ]
        );
    }

    #[test]
    fn test_echo_policy() {
        let mut bytes = generate_one(32).to_vec();
        bytes[20] ^= 0x01;
        let result = validate(&bytes);

        assert!(EchoPolicy::Length.allows(&result));
        assert!(!EchoPolicy::Strict.allows(&result));
    }
}
