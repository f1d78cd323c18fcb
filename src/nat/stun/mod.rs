// src/nat/stun/mod.rs
//! STUN message layer used by the TURN allocation probe
//!
//! - `protocol`: header and TLV attribute codec (RFC 5389 Section 6, 15)
//! - `address`: XOR-obfuscated transport addresses
//! - `auth`: long-term credential key derivation and MESSAGE-INTEGRITY
//! - `codec`: framing of STUN messages over a TCP byte stream

pub mod protocol;
pub mod address;
pub mod auth;
pub mod codec;

// Re-export core types for easy access
pub use protocol::{
    Message, MessageType, MessageClass, TransactionId,
    Attribute, AttributeType, ErrorCode,
    encode, decode, padding_len,
    MAGIC_COOKIE, HEADER_SIZE, ATTRIBUTE_HEADER_SIZE, TRANSPORT_UDP,
};

pub use address::{decode_xor_address, encode_xor_address, FAMILY_IPV4, FAMILY_IPV6};

pub use auth::{
    AuthKey, derive_key, append_integrity, verify_integrity,
    INTEGRITY_LEN, INTEGRITY_ATTRIBUTE_SIZE,
};

pub use codec::{StunCodec, StunFrame};
