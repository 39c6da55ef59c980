//! Recognizes HTTP responses from the first bytes of a `write`.
//!
//! Only a fixed-size prefix of the written data is inspected. A write is a
//! response if it starts with `HTTP`, and its status class is the single byte
//! where the first status digit sits in a well formed `HTTP/1.1 NNN` status
//! line. This is an approximation: other protocol versions, headers split
//! across writes, and the remaining status digits are not handled. Later
//! writes on the same connection are body data that does not start with
//! `HTTP`, so they fall through without any per-connection state.

use serde::{Deserialize, Serialize};

use std::fmt;

/// The number of payload bytes available for inspection. This matches the
/// largest buffer the kernel side can place on its stack.
pub const PREFIX_LEN: usize = 300;

/// Offset of the first status digit in `HTTP/1.1 NNN`.
const STATUS_OFFSET: usize = 9;

const RESPONSE_LITERAL: &[u8; 4] = b"HTTP";

/// A zero-filled buffer holding at most `N` bytes copied from a payload.
struct PrefixBuffer<const N: usize> {
    bytes: [u8; N],
}

impl<const N: usize> PrefixBuffer<N> {
    /// Copies `min(count, N)` bytes from `payload`. Positions beyond the
    /// copied bytes, including any the payload is too short to provide,
    /// remain zero.
    fn copy_from(payload: &[u8], count: usize) -> Self {
        let mut bytes = [0; N];
        let len = count.min(N).min(payload.len());

        bytes[..len].copy_from_slice(&payload[..len]);

        Self { bytes }
    }

    fn starts_with(&self, literal: &[u8]) -> bool {
        self.bytes.starts_with(literal)
    }

    /// Byte at `idx`. Reads past the copied region, or past `N`, yield zero.
    fn byte(&self, idx: usize) -> u8 {
        self.bytes.get(idx).copied().unwrap_or(0)
    }
}

/// A single-byte approximation of a response status, normally the leading
/// digit (`'2'` for 2xx, `'5'` for 5xx).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusClass(u8);

impl StatusClass {
    #[cfg(test)]
    pub const fn new(byte: u8) -> Self {
        Self(byte)
    }

    /// A class is indeterminate when the byte at the status offset is not an
    /// ASCII digit. This covers payloads shorter than the offset, where the
    /// byte is the zero fill.
    pub const fn is_indeterminate(self) -> bool {
        !self.0.is_ascii_digit()
    }
}

impl fmt::Display for StatusClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_indeterminate() {
            write!(f, "unknown")
        } else {
            write!(f, "{}", self.0 as char)
        }
    }
}

/// Classifies a write of `count` bytes whose leading bytes are `payload`.
///
/// Returns `None` when the write does not start with the HTTP response
/// literal. A returned class may still be indeterminate.
///
/// Callers must only classify writes on descriptors known to be accepted
/// connections. The classifier itself has no notion of descriptors.
pub fn classify(payload: &[u8], count: usize) -> Option<StatusClass> {
    let buf = PrefixBuffer::<PREFIX_LEN>::copy_from(payload, count);

    if !buf.starts_with(RESPONSE_LITERAL) {
        return None;
    }

    Some(StatusClass(buf.byte(STATUS_OFFSET)))
}
