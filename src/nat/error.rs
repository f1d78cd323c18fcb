use std::io;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while turning bytes into a STUN message
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Fewer bytes than a STUN header
    #[error("Message too short: {0} bytes, need at least 20")]
    TooShort(usize),

    /// Bytes 4..8 are not the magic cookie
    #[error("Invalid magic cookie: expected 0x2112A442, got 0x{0:08X}")]
    BadMagicCookie(u32),

    /// Header length field is not a multiple of 4
    #[error("Message length {0} is not a multiple of 4")]
    UnalignedLength(usize),

    /// Attribute header or value runs past the end of the buffer
    #[error("Attribute 0x{attr_type:04X} declares {declared} bytes but only {available} remain")]
    TruncatedAttribute {
        attr_type: u16,
        declared: usize,
        available: usize,
    },
}

/// Errors raised while turning a STUN message into bytes
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    /// Attribute value does not fit the 16-bit length field
    #[error("Attribute 0x{attr_type:04X} value of {len} bytes exceeds 65535")]
    AttributeTooLarge { attr_type: u16, len: usize },

    /// Encoded body does not fit the 16-bit header length field
    #[error("Message body of {0} bytes exceeds 65535")]
    MessageTooLarge(usize),
}

/// STUN wire-format errors
#[derive(Debug, Error)]
pub enum StunError {
    /// Malformed bytes received
    #[error("Failed to decode STUN message: {0}")]
    Decode(#[from] DecodeError),

    /// Message could not be encoded
    #[error("Failed to encode STUN message: {0}")]
    Encode(#[from] EncodeError),
}

/// Errors surfaced by the transport and configuration layers
#[derive(Debug, Error)]
pub enum NatError {
    /// STUN protocol errors
    #[error("STUN error: {0}")]
    Stun(#[from] StunError),

    /// Network I/O errors
    #[error("Network I/O error: {0}")]
    Io(#[from] io::Error),

    /// Timeout errors
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Peer closed the stream before a full message arrived
    #[error("Connection closed by peer")]
    ConnectionClosed,
}

impl From<DecodeError> for NatError {
    fn from(err: DecodeError) -> Self {
        NatError::Stun(StunError::Decode(err))
    }
}

impl From<EncodeError> for NatError {
    fn from(err: EncodeError) -> Self {
        NatError::Stun(StunError::Encode(err))
    }
}

/// Result type for NAT operations
pub type NatResult<T> = Result<T, NatError>;

/// Terminal failure of one allocation attempt.
///
/// Every variant ends the attempt; none is retried by the state machine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocationError {
    /// Transport could not be opened
    #[error("Failed to connect to {server}: {reason}")]
    ConnectFailure { server: String, reason: String },

    /// No response within the deadline
    #[error("No response within {0:?}")]
    Timeout(Duration),

    /// Malformed bytes from the server
    #[error("Malformed response: {0}")]
    Decode(DecodeError),

    /// Well-formed message missing something its type requires
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// 401 response without REALM or NONCE
    #[error("Authentication challenge is missing REALM or NONCE")]
    AuthChallengeMissing,

    /// Server answered with an error code other than the expected challenge
    #[error("Server rejected request: {code} {reason}")]
    ServerRejected { code: u16, reason: String },

    /// I/O failure or peer close after the connection was established
    #[error("Transport failure: {0}")]
    Transport(String),
}

impl AllocationError {
    /// Server-reported error code, if any
    pub fn code(&self) -> Option<u16> {
        match self {
            Self::ServerRejected { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Stable label used in serialised results
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConnectFailure { .. } => "connect_failure",
            Self::Timeout(_) => "timeout",
            Self::Decode(_) => "decode_error",
            Self::ProtocolViolation(_) => "protocol_violation",
            Self::AuthChallengeMissing => "auth_challenge_missing",
            Self::ServerRejected { .. } => "server_rejected",
            Self::Transport(_) => "transport",
        }
    }
}

impl From<NatError> for AllocationError {
    fn from(err: NatError) -> Self {
        match err {
            NatError::Stun(StunError::Decode(e)) => Self::Decode(e),
            NatError::Stun(StunError::Encode(e)) => Self::ProtocolViolation(e.to_string()),
            NatError::Timeout(d) => Self::Timeout(d),
            NatError::Io(e) => Self::Transport(e.to_string()),
            NatError::ConnectionClosed => Self::Transport("connection closed by peer".to_string()),
            NatError::Configuration(msg) => Self::ProtocolViolation(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_error_lifts_into_allocation_error() {
        let err: NatError = DecodeError::BadMagicCookie(0xDEADBEEF).into();
        assert_eq!(
            AllocationError::from(err),
            AllocationError::Decode(DecodeError::BadMagicCookie(0xDEADBEEF))
        );
    }

    #[test]
    fn test_server_rejected_exposes_code() {
        let err = AllocationError::ServerRejected { code: 437, reason: "Allocation Mismatch".into() };
        assert_eq!(err.code(), Some(437));
        assert_eq!(err.kind(), "server_rejected");
        assert_eq!(AllocationError::AuthChallengeMissing.code(), None);
    }

    #[test]
    fn test_display_mentions_cookie() {
        let msg = DecodeError::BadMagicCookie(0).to_string();
        assert!(msg.contains("0x2112A442"));
    }
}
