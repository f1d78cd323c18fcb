// src/nat/stun/auth.rs
//! Long-term credential mechanism (RFC 5389 Section 10.2, RFC 5766).
//!
//! - Key derivation: `MD5(username ":" realm ":" password)`
//! - MESSAGE-INTEGRITY: HMAC-SHA1 over the message with its length field
//!   already covering the integrity attribute

use std::fmt;
use bytes::{BufMut, Bytes, BytesMut};
use hmac::{Hmac, Mac};
use md5::{Digest, Md5};
use sha1::Sha1;

use crate::nat::error::{DecodeError, EncodeError, StunError, NatResult};
use super::protocol::{padding_len, AttributeType, ATTRIBUTE_HEADER_SIZE, HEADER_SIZE};

type HmacSha1 = Hmac<Sha1>;

/// MESSAGE-INTEGRITY digest length (HMAC-SHA1)
pub const INTEGRITY_LEN: usize = 20;

/// MESSAGE-INTEGRITY size on the wire: attribute header + digest
pub const INTEGRITY_ATTRIBUTE_SIZE: usize = ATTRIBUTE_HEADER_SIZE + INTEGRITY_LEN;

/// Long-term credential key
#[derive(Clone, PartialEq, Eq)]
pub struct AuthKey([u8; 16]);

impl AuthKey {
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Debug for AuthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthKey(..)")
    }
}

/// Derive the long-term key the relay server computes for this user.
///
/// MD5 is mandated by the credential mechanism; it is used for
/// interoperability only.
pub fn derive_key(username: &str, realm: &str, password: &str) -> AuthKey {
    let mut hasher = Md5::new();
    hasher.update(username.as_bytes());
    hasher.update(b":");
    hasher.update(realm.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    AuthKey(hasher.finalize().into())
}

/// Append MESSAGE-INTEGRITY to a fully encoded message.
///
/// The header length is first raised by the size of the attribute about to
/// be appended, the HMAC is taken over those bytes, then the attribute is
/// written. The digest is a multiple of 4 so no padding follows.
pub fn append_integrity(message: &[u8], key: &AuthKey) -> NatResult<Bytes> {
    if message.len() < HEADER_SIZE {
        return Err(DecodeError::TooShort(message.len()).into());
    }

    let body_len = message.len() - HEADER_SIZE + INTEGRITY_ATTRIBUTE_SIZE;
    if body_len > u16::MAX as usize {
        return Err(StunError::Encode(EncodeError::MessageTooLarge(body_len)).into());
    }

    let mut buf = BytesMut::with_capacity(message.len() + INTEGRITY_ATTRIBUTE_SIZE);
    buf.put_slice(message);
    buf[2..4].copy_from_slice(&(body_len as u16).to_be_bytes());

    let digest = hmac_sha1(key, &buf);

    buf.put_u16(AttributeType::MessageIntegrity.as_u16());
    buf.put_u16(INTEGRITY_LEN as u16);
    buf.put_slice(&digest);

    Ok(buf.freeze())
}

/// Verify the MESSAGE-INTEGRITY of a received message.
///
/// Returns `false` when the attribute is absent, malformed or does not match.
/// Attributes after MESSAGE-INTEGRITY (e.g. FINGERPRINT) are excluded from
/// the recomputation, as the length field is set to end at the integrity
/// attribute.
pub fn verify_integrity(raw_msg: &[u8], key: &AuthKey) -> bool {
    let Some(pos) = find_attribute_position(raw_msg, AttributeType::MessageIntegrity) else {
        return false;
    };

    let digest_start = pos + ATTRIBUTE_HEADER_SIZE;
    let digest_end = digest_start + INTEGRITY_LEN;
    let declared = u16::from_be_bytes([raw_msg[pos + 2], raw_msg[pos + 3]]) as usize;
    if declared != INTEGRITY_LEN || raw_msg.len() < digest_end {
        return false;
    }

    let mut prefix = raw_msg[..pos].to_vec();
    let adjusted_len = (digest_end - HEADER_SIZE) as u16;
    prefix[2..4].copy_from_slice(&adjusted_len.to_be_bytes());

    let mut mac = match HmacSha1::new_from_slice(key.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(&prefix);
    mac.verify_slice(&raw_msg[digest_start..digest_end]).is_ok()
}

fn hmac_sha1(key: &AuthKey, data: &[u8]) -> [u8; INTEGRITY_LEN] {
    let mut mac = HmacSha1::new_from_slice(key.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// Find attribute position in raw message
fn find_attribute_position(raw_msg: &[u8], attr_type: AttributeType) -> Option<usize> {
    let mut pos = HEADER_SIZE;

    while pos + ATTRIBUTE_HEADER_SIZE <= raw_msg.len() {
        let attr = u16::from_be_bytes([raw_msg[pos], raw_msg[pos + 1]]);
        let len = u16::from_be_bytes([raw_msg[pos + 2], raw_msg[pos + 3]]) as usize;

        if attr == attr_type.as_u16() {
            return Some(pos);
        }

        pos += ATTRIBUTE_HEADER_SIZE + len + padding_len(len);
    }

    None
}
