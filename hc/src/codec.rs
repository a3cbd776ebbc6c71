//! Binary command envelope
//!
//! Wire layout, bit-exact with the platform's other components:
//!
//! ```text
//! [u32 big-endian session id length][session id, UTF-8][u8 command id][payload to end of message]
//! ```
//!
//! Decoding never fails on a foreign session id; filtering is the router's job.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::error::DecodeError;

const LENGTH_PREFIX: usize = 4;

/// Identity of one experiment run
///
/// Every envelope and every session-specific queue name is scoped by it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(Arc<str>);

impl SessionId {
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self::new(id)
    }
}

/// A decoded or to-be-sent control message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandEnvelope {
    session_id: String,
    command_id: u8,
    payload: Vec<u8>,
}

impl CommandEnvelope {
    pub fn new(session_id: impl Into<String>, command_id: u8, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            session_id: session_id.into(),
            command_id,
            payload: payload.into(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn command_id(&self) -> u8 {
        self.command_id
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// True if this envelope belongs to the given session
    pub fn is_for(&self, session: &SessionId) -> bool {
        self.session_id == session.as_str()
    }

    /// Serialize into the wire layout
    pub fn encode(&self) -> Vec<u8> {
        let id = self.session_id.as_bytes();
        let mut buf = Vec::with_capacity(LENGTH_PREFIX + id.len() + 1 + self.payload.len());
        buf.extend_from_slice(&(id.len() as u32).to_be_bytes());
        buf.extend_from_slice(id);
        buf.push(self.command_id);
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Parse the wire layout
    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        if buf.len() < LENGTH_PREFIX {
            debug!(len = buf.len(), "CommandEnvelope::decode: buffer shorter than length prefix");
            return Err(DecodeError::TooShort { len: buf.len() });
        }

        let (prefix, rest) = buf.split_at(LENGTH_PREFIX);
        let declared = u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
        if declared > rest.len() {
            return Err(DecodeError::SessionIdOverrun {
                declared,
                available: rest.len(),
            });
        }

        let (id, rest) = rest.split_at(declared);
        let session_id = std::str::from_utf8(id).map_err(|_| DecodeError::InvalidSessionId)?;
        let (&command_id, payload) = rest.split_first().ok_or(DecodeError::MissingCommandId)?;

        Ok(Self {
            session_id: session_id.to_string(),
            command_id,
            payload: payload.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_encode_known_bytes() {
        let envelope = CommandEnvelope::new("s1", 15, Vec::new());
        assert_eq!(envelope.encode(), vec![0x00, 0x00, 0x00, 0x02, 0x73, 0x31, 0x0F]);
    }

    #[test]
    fn test_decode_known_bytes() {
        let envelope = CommandEnvelope::decode(&[0x00, 0x00, 0x00, 0x02, 0x73, 0x31, 0x0F]).unwrap();
        assert_eq!(envelope.session_id(), "s1");
        assert_eq!(envelope.command_id(), 15);
        assert!(envelope.payload().is_empty());
    }

    #[test]
    fn test_payload_runs_to_end_of_message() {
        let bytes = CommandEnvelope::new("abc", 17, b"system-1".to_vec()).encode();
        let envelope = CommandEnvelope::decode(&bytes).unwrap();
        assert_eq!(envelope.payload(), b"system-1");
    }

    #[test]
    fn test_decode_rejects_short_buffers() {
        for len in 0..4 {
            let buf = vec![0u8; len];
            assert_eq!(CommandEnvelope::decode(&buf), Err(DecodeError::TooShort { len }));
        }
    }

    #[test]
    fn test_decode_rejects_length_overrun() {
        let buf = [0x00, 0x00, 0x00, 0x09, b's', b'1', 0x0F];
        assert_eq!(
            CommandEnvelope::decode(&buf),
            Err(DecodeError::SessionIdOverrun {
                declared: 9,
                available: 3
            })
        );
    }

    #[test]
    fn test_decode_huge_declared_length_does_not_allocate() {
        let buf = [0xFF, 0xFF, 0xFF, 0xFF, b'x'];
        assert!(matches!(
            CommandEnvelope::decode(&buf),
            Err(DecodeError::SessionIdOverrun { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_missing_command_id() {
        let buf = [0x00, 0x00, 0x00, 0x02, b's', b'1'];
        assert_eq!(CommandEnvelope::decode(&buf), Err(DecodeError::MissingCommandId));
    }

    #[test]
    fn test_decode_rejects_invalid_utf8_session() {
        let buf = [0x00, 0x00, 0x00, 0x01, 0xFF, 0x01];
        assert_eq!(CommandEnvelope::decode(&buf), Err(DecodeError::InvalidSessionId));
    }

    #[test]
    fn test_foreign_session_is_a_valid_decode() {
        let bytes = CommandEnvelope::new("other", 1, Vec::new()).encode();
        let envelope = CommandEnvelope::decode(&bytes).unwrap();
        assert!(!envelope.is_for(&SessionId::from("s1")));
        assert!(envelope.is_for(&SessionId::from("other")));
    }

    #[test]
    fn test_empty_session_id() {
        let bytes = CommandEnvelope::new("", 2, Vec::new()).encode();
        assert_eq!(bytes, vec![0, 0, 0, 0, 2]);
        assert_eq!(CommandEnvelope::decode(&bytes).unwrap().session_id(), "");
    }

    proptest! {
        #[test]
        fn prop_roundtrip(
            session in ".{0,64}",
            command in any::<u8>(),
            payload in proptest::collection::vec(any::<u8>(), 0..256),
        ) {
            let envelope = CommandEnvelope::new(session, command, payload);
            let decoded = CommandEnvelope::decode(&envelope.encode()).unwrap();
            prop_assert_eq!(decoded, envelope);
        }

        #[test]
        fn prop_decode_never_panics(buf in proptest::collection::vec(any::<u8>(), 0..64)) {
            let _ = CommandEnvelope::decode(&buf);
        }
    }
}
