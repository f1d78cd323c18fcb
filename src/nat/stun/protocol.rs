use std::fmt;
use std::net::SocketAddr;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use rand::RngCore;

use crate::nat::error::{DecodeError, EncodeError};
use super::address::{decode_xor_address, encode_xor_address};

/// STUN magic cookie as defined in RFC 5389
pub const MAGIC_COOKIE: u32 = 0x2112A442;

/// STUN header size (20 bytes)
pub const HEADER_SIZE: usize = 20;

/// Attribute type + length prefix
pub const ATTRIBUTE_HEADER_SIZE: usize = 4;

/// IANA protocol number for UDP, the only REQUESTED-TRANSPORT TURN defines
pub const TRANSPORT_UDP: u8 = 17;

/// Number of zero bytes that follow a value of `len` bytes
pub fn padding_len(len: usize) -> usize {
    (4 - (len % 4)) % 4
}

/// STUN message types used by the allocation exchange.
///
/// Anything else is carried as `Other` so it survives a decode/encode cycle.
/// Build from raw values with `MessageType::from(u16)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    // Allocate (TURN)
    AllocateRequest,
    AllocateResponse,
    AllocateError,

    // CreatePermission (TURN)
    CreatePermissionRequest,
    CreatePermissionResponse,
    CreatePermissionError,

    Other(u16),
}

impl MessageType {
    /// Wire value
    pub fn as_u16(&self) -> u16 {
        match self {
            Self::AllocateRequest => 0x0003,
            Self::AllocateResponse => 0x0103,
            Self::AllocateError => 0x0113,
            Self::CreatePermissionRequest => 0x0008,
            Self::CreatePermissionResponse => 0x0108,
            Self::CreatePermissionError => 0x0118,
            Self::Other(value) => *value,
        }
    }

    /// Get message class (request, indication, response, error)
    pub fn class(&self) -> MessageClass {
        match self.as_u16() & 0x0110 {
            0x0000 => MessageClass::Request,
            0x0010 => MessageClass::Indication,
            0x0100 => MessageClass::SuccessResponse,
            _ => MessageClass::ErrorResponse,
        }
    }

    /// Get message method
    pub fn method(&self) -> u16 {
        let value = self.as_u16();
        (value & 0x000F) | ((value & 0x00E0) >> 1) | ((value & 0x3E00) >> 2)
    }

    /// Whether `self` is a response (success or error) to `request`
    pub fn answers(&self, request: MessageType) -> bool {
        self.method() == request.method()
            && matches!(self.class(), MessageClass::SuccessResponse | MessageClass::ErrorResponse)
    }
}

impl From<u16> for MessageType {
    fn from(value: u16) -> Self {
        match value {
            0x0003 => Self::AllocateRequest,
            0x0103 => Self::AllocateResponse,
            0x0113 => Self::AllocateError,
            0x0008 => Self::CreatePermissionRequest,
            0x0108 => Self::CreatePermissionResponse,
            0x0118 => Self::CreatePermissionError,
            other => Self::Other(other),
        }
    }
}

/// STUN message class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageClass {
    Request,
    Indication,
    SuccessResponse,
    ErrorResponse,
}

/// STUN/TURN attribute types (RFC 5389 Section 18.2, RFC 5766 Section 14)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeType {
    Username,
    MessageIntegrity,
    ErrorCode,
    Lifetime,
    XorPeerAddress,
    Realm,
    Nonce,
    XorRelayedAddress,
    RequestedTransport,
    XorMappedAddress,
    Software,
    Fingerprint,
    Unknown(u16),
}

impl AttributeType {
    /// Wire value
    pub fn as_u16(&self) -> u16 {
        match self {
            Self::Username => 0x0006,
            Self::MessageIntegrity => 0x0008,
            Self::ErrorCode => 0x0009,
            Self::Lifetime => 0x000D,
            Self::XorPeerAddress => 0x0012,
            Self::Realm => 0x0014,
            Self::Nonce => 0x0015,
            Self::XorRelayedAddress => 0x0016,
            Self::RequestedTransport => 0x0019,
            Self::XorMappedAddress => 0x0020,
            Self::Software => 0x8022,
            Self::Fingerprint => 0x8028,
            Self::Unknown(value) => *value,
        }
    }
}

impl From<u16> for AttributeType {
    fn from(value: u16) -> Self {
        match value {
            0x0006 => Self::Username,
            0x0008 => Self::MessageIntegrity,
            0x0009 => Self::ErrorCode,
            0x000D => Self::Lifetime,
            0x0012 => Self::XorPeerAddress,
            0x0014 => Self::Realm,
            0x0015 => Self::Nonce,
            0x0016 => Self::XorRelayedAddress,
            0x0019 => Self::RequestedTransport,
            0x0020 => Self::XorMappedAddress,
            0x8022 => Self::Software,
            0x8028 => Self::Fingerprint,
            other => Self::Unknown(other),
        }
    }
}

/// STUN transaction ID (96 bits)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionId([u8; 12]);

impl TransactionId {
    /// Generate new random transaction ID with cryptographically secure RNG
    pub fn new() -> Self {
        let mut id = [0u8; 12];
        use rand::rngs::OsRng;
        OsRng.fill_bytes(&mut id);
        Self(id)
    }

    /// Create from bytes
    pub fn from_bytes(bytes: [u8; 12]) -> Self {
        Self(bytes)
    }

    /// Get as bytes
    pub fn as_bytes(&self) -> &[u8; 12] {
        &self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// ERROR-CODE attribute contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorCode {
    /// `class * 100 + number`, e.g. 401, 437, 438
    pub code: u16,
    pub reason: String,
}

/// STUN attribute: a type and its logical (unpadded) value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub attr_type: AttributeType,
    pub value: Bytes,
}

impl Attribute {
    /// Create new attribute
    pub fn new(attr_type: AttributeType, value: impl Into<Bytes>) -> Self {
        Self { attr_type, value: value.into() }
    }

    pub fn username(username: &str) -> Self {
        Self::new(AttributeType::Username, Bytes::copy_from_slice(username.as_bytes()))
    }

    pub fn realm(realm: &str) -> Self {
        Self::new(AttributeType::Realm, Bytes::copy_from_slice(realm.as_bytes()))
    }

    pub fn nonce(nonce: &str) -> Self {
        Self::new(AttributeType::Nonce, Bytes::copy_from_slice(nonce.as_bytes()))
    }

    pub fn software(software: &str) -> Self {
        Self::new(AttributeType::Software, Bytes::copy_from_slice(software.as_bytes()))
    }

    /// REQUESTED-TRANSPORT: protocol number followed by 3 reserved bytes
    pub fn requested_transport(protocol: u8) -> Self {
        Self::new(AttributeType::RequestedTransport, Bytes::copy_from_slice(&[protocol, 0, 0, 0]))
    }

    pub fn lifetime(seconds: u32) -> Self {
        Self::new(AttributeType::Lifetime, Bytes::copy_from_slice(&seconds.to_be_bytes()))
    }

    /// ERROR-CODE: 2 reserved bytes, class, number, UTF-8 reason phrase.
    ///
    /// The class occupies the low 3 bits of its byte, so only codes
    /// 300..=699 are representable; higher bits are never set.
    pub fn error_code(code: u16, reason: &str) -> Self {
        let mut buf = BytesMut::with_capacity(4 + reason.len());
        buf.put_u16(0); // Reserved
        buf.put_u8(((code / 100) & 0x07) as u8);
        buf.put_u8((code % 100) as u8);
        buf.put_slice(reason.as_bytes());
        Self::new(AttributeType::ErrorCode, buf.freeze())
    }

    /// XOR-encoded address attribute of the given type
    pub fn xor_address(attr_type: AttributeType, addr: &SocketAddr, tid: &TransactionId) -> Self {
        Self::new(attr_type, encode_xor_address(addr, tid))
    }

    /// Value as UTF-8 text
    pub fn as_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.value).ok()
    }

    /// Value as a big-endian u32 (LIFETIME)
    pub fn as_u32(&self) -> Option<u32> {
        let bytes: [u8; 4] = self.value.get(..4)?.try_into().ok()?;
        Some(u32::from_be_bytes(bytes))
    }

    /// Value as ERROR-CODE
    pub fn as_error_code(&self) -> Option<ErrorCode> {
        if self.value.len() < 4 {
            return None;
        }
        let class = (self.value[2] & 0x07) as u16;
        let number = self.value[3] as u16;
        let reason = String::from_utf8_lossy(&self.value[4..]).into_owned();
        Some(ErrorCode { code: class * 100 + number, reason })
    }

    /// Value as an XOR address, keyed by the carrying message's transaction ID
    pub fn as_xor_address(&self, tid: &TransactionId) -> Option<SocketAddr> {
        decode_xor_address(&self.value, tid)
    }

    /// Bytes this attribute occupies on the wire, padding included
    pub fn encoded_len(&self) -> usize {
        ATTRIBUTE_HEADER_SIZE + self.value.len() + padding_len(self.value.len())
    }

    /// Encode attribute
    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        let value_len = self.value.len();
        if value_len > u16::MAX as usize {
            return Err(EncodeError::AttributeTooLarge {
                attr_type: self.attr_type.as_u16(),
                len: value_len,
            });
        }

        buf.put_u16(self.attr_type.as_u16());
        buf.put_u16(value_len as u16);
        buf.put_slice(&self.value);

        // Add padding to 4-byte boundary
        buf.put_bytes(0, padding_len(value_len));

        Ok(())
    }
}

/// STUN message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub message_type: MessageType,
    pub transaction_id: TransactionId,
    pub attributes: Vec<Attribute>,
}

impl Message {
    /// Create new STUN message
    pub fn new(message_type: MessageType, transaction_id: TransactionId) -> Self {
        Self {
            message_type,
            transaction_id,
            attributes: Vec::new(),
        }
    }

    /// Add attribute to message
    pub fn add_attribute(&mut self, attribute: Attribute) {
        self.attributes.push(attribute);
    }

    /// Builder form of `add_attribute`
    pub fn with_attribute(mut self, attribute: Attribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    /// First attribute of a type
    pub fn get_attribute(&self, attr_type: AttributeType) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.attr_type == attr_type)
    }

    /// Get all attributes of a type, in wire order
    pub fn get_attributes(&self, attr_type: AttributeType) -> Vec<&Attribute> {
        self.attributes.iter()
            .filter(|a| a.attr_type == attr_type)
            .collect()
    }

    pub fn text(&self, attr_type: AttributeType) -> Option<&str> {
        self.get_attribute(attr_type).and_then(Attribute::as_text)
    }

    pub fn realm(&self) -> Option<&str> {
        self.text(AttributeType::Realm)
    }

    pub fn nonce(&self) -> Option<&str> {
        self.text(AttributeType::Nonce)
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        self.get_attribute(AttributeType::ErrorCode).and_then(Attribute::as_error_code)
    }

    pub fn lifetime(&self) -> Option<u32> {
        self.get_attribute(AttributeType::Lifetime).and_then(Attribute::as_u32)
    }

    /// Decode the first XOR address attribute of a type
    pub fn xor_address(&self, attr_type: AttributeType) -> Option<SocketAddr> {
        self.get_attribute(attr_type)
            .and_then(|a| a.as_xor_address(&self.transaction_id))
    }

    /// Encode message to bytes
    pub fn encode(&self) -> Result<Bytes, EncodeError> {
        encode(self.message_type, &self.transaction_id, &self.attributes)
    }

    /// Decode message from bytes
    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        decode(buf)
    }
}

/// Encode a header and attribute list.
///
/// The header length is the sum of the encoded attributes (header, value
/// and padding of each), excluding the 20-byte message header.
pub fn encode(
    message_type: MessageType,
    transaction_id: &TransactionId,
    attributes: &[Attribute],
) -> Result<Bytes, EncodeError> {
    let body_len: usize = attributes.iter().map(Attribute::encoded_len).sum();
    if body_len > u16::MAX as usize {
        return Err(EncodeError::MessageTooLarge(body_len));
    }

    let mut buf = BytesMut::with_capacity(HEADER_SIZE + body_len);
    buf.put_u16(message_type.as_u16());
    buf.put_u16(body_len as u16);
    buf.put_u32(MAGIC_COOKIE);
    buf.put_slice(transaction_id.as_bytes());

    for attr in attributes {
        attr.encode(&mut buf)?;
    }

    Ok(buf.freeze())
}

/// Decode a complete message.
///
/// Attributes are read until the header-declared length or the end of the
/// buffer, whichever comes first.
pub fn decode(buf: &[u8]) -> Result<Message, DecodeError> {
    if buf.len() < HEADER_SIZE {
        return Err(DecodeError::TooShort(buf.len()));
    }

    let mut header = &buf[..HEADER_SIZE];
    let msg_type_raw = header.get_u16();
    let msg_len = header.get_u16() as usize;
    let magic = header.get_u32();

    if magic != MAGIC_COOKIE {
        return Err(DecodeError::BadMagicCookie(magic));
    }

    let mut tid_bytes = [0u8; 12];
    header.copy_to_slice(&mut tid_bytes);
    let transaction_id = TransactionId::from_bytes(tid_bytes);

    let end = buf.len().min(HEADER_SIZE + msg_len);
    let mut pos = HEADER_SIZE;
    let mut attributes = Vec::new();

    while pos < end {
        let remaining = buf.len() - pos;
        if remaining < ATTRIBUTE_HEADER_SIZE {
            let attr_type = if remaining >= 2 {
                u16::from_be_bytes([buf[pos], buf[pos + 1]])
            } else {
                0
            };
            return Err(DecodeError::TruncatedAttribute {
                attr_type,
                declared: ATTRIBUTE_HEADER_SIZE,
                available: remaining,
            });
        }

        let mut attr_header = &buf[pos..pos + ATTRIBUTE_HEADER_SIZE];
        let attr_type_raw = attr_header.get_u16();
        let attr_len = attr_header.get_u16() as usize;

        let value_start = pos + ATTRIBUTE_HEADER_SIZE;
        let available = buf.len() - value_start;
        if attr_len > available {
            return Err(DecodeError::TruncatedAttribute {
                attr_type: attr_type_raw,
                declared: attr_len,
                available,
            });
        }

        attributes.push(Attribute::new(
            AttributeType::from(attr_type_raw),
            Bytes::copy_from_slice(&buf[value_start..value_start + attr_len]),
        ));

        // Skip padding to 4-byte boundary
        pos = value_start + attr_len + padding_len(attr_len);
    }

    Ok(Message {
        message_type: MessageType::from(msg_type_raw),
        transaction_id,
        attributes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tid() -> TransactionId {
        TransactionId::from_bytes([1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12])
    }

    #[test]
    fn test_message_encode_decode() {
        let tid = TransactionId::new();
        let msg = Message::new(MessageType::AllocateRequest, tid)
            .with_attribute(Attribute::requested_transport(TRANSPORT_UDP))
            .with_attribute(Attribute::username("alice"))
            .with_attribute(Attribute::software("turn-probe"));

        let encoded = msg.encode().unwrap();
        let decoded = Message::decode(&encoded).unwrap();

        assert_eq!(decoded, msg);
        assert_eq!(decoded.text(AttributeType::Username), Some("alice"));
    }

    #[test]
    fn test_header_layout_and_length() {
        let msg = Message::new(MessageType::AllocateRequest, sample_tid())
            .with_attribute(Attribute::requested_transport(TRANSPORT_UDP)) // 4 + 4
            .with_attribute(Attribute::username("bob")); // 4 + 3 + 1 pad

        let encoded = msg.encode().unwrap();

        assert_eq!(&encoded[0..2], &[0x00, 0x03]);
        assert_eq!(u16::from_be_bytes([encoded[2], encoded[3]]), 16);
        assert_eq!(&encoded[4..8], &MAGIC_COOKIE.to_be_bytes());
        assert_eq!(&encoded[8..20], sample_tid().as_bytes());
        assert_eq!(encoded.len(), HEADER_SIZE + 16);

        // Padding is zero-filled, not copied from anywhere
        assert_eq!(&encoded[28..36], &[0x00, 0x06, 0x00, 0x03, b'b', b'o', b'b', 0x00]);
    }

    #[test]
    fn test_padding_stripped_on_decode() {
        for len in 0..9 {
            let value = vec![0xAB; len];
            let msg = Message::new(MessageType::AllocateResponse, sample_tid())
                .with_attribute(Attribute::new(AttributeType::Unknown(0x7777), value.clone()))
                .with_attribute(Attribute::lifetime(600));

            let encoded = msg.encode().unwrap();
            assert_eq!(encoded.len() % 4, 0);

            let decoded = Message::decode(&encoded).unwrap();
            assert_eq!(decoded.attributes[0].value.as_ref(), value.as_slice());
            assert_eq!(decoded.lifetime(), Some(600));
        }
    }

    #[test]
    fn test_repeated_attributes_keep_order() {
        let msg = Message::new(MessageType::CreatePermissionRequest, sample_tid())
            .with_attribute(Attribute::xor_address(
                AttributeType::XorPeerAddress, &"10.0.0.1:0".parse().unwrap(), &sample_tid()))
            .with_attribute(Attribute::xor_address(
                AttributeType::XorPeerAddress, &"10.0.0.2:0".parse().unwrap(), &sample_tid()));

        let decoded = Message::decode(&msg.encode().unwrap()).unwrap();
        let peers = decoded.get_attributes(AttributeType::XorPeerAddress);
        assert_eq!(peers.len(), 2);
        assert_eq!(
            decoded.xor_address(AttributeType::XorPeerAddress),
            Some("10.0.0.1:0".parse().unwrap())
        );
        assert_eq!(
            peers[1].as_xor_address(&decoded.transaction_id),
            Some("10.0.0.2:0".parse().unwrap())
        );
    }

    #[test]
    fn test_too_short() {
        assert_eq!(Message::decode(&[0u8; 19]), Err(DecodeError::TooShort(19)));
        assert_eq!(Message::decode(&[]), Err(DecodeError::TooShort(0)));
    }

    #[test]
    fn test_bad_magic_cookie() {
        let mut bytes = Message::new(MessageType::AllocateRequest, sample_tid())
            .encode()
            .unwrap()
            .to_vec();
        bytes[4..8].copy_from_slice(&0x2112A443u32.to_be_bytes());

        assert_eq!(Message::decode(&bytes), Err(DecodeError::BadMagicCookie(0x2112A443)));

        // Any header-sized buffer without the cookie is rejected
        assert_eq!(Message::decode(&[0u8; 20]), Err(DecodeError::BadMagicCookie(0)));
    }

    #[test]
    fn test_truncated_attribute() {
        let encoded = Message::new(MessageType::AllocateError, sample_tid())
            .with_attribute(Attribute::realm("example.org"))
            .encode()
            .unwrap();

        // Cut into the value of REALM
        let cut = &encoded[..HEADER_SIZE + 8];
        assert_eq!(
            Message::decode(cut),
            Err(DecodeError::TruncatedAttribute { attr_type: 0x0014, declared: 11, available: 4 })
        );

        // Cut into the attribute header
        let cut = &encoded[..HEADER_SIZE + 3];
        assert!(matches!(
            Message::decode(cut),
            Err(DecodeError::TruncatedAttribute { attr_type: 0x0014, .. })
        ));
    }

    #[test]
    fn test_declared_length_bounds_attribute_walk() {
        let mut bytes = Message::new(MessageType::AllocateResponse, sample_tid())
            .with_attribute(Attribute::lifetime(300))
            .encode()
            .unwrap()
            .to_vec();

        // Trailing bytes beyond the declared length belong to the next frame
        bytes.extend_from_slice(&[0x00, 0x0D, 0x00, 0x04, 0, 0, 0, 1]);
        let decoded = Message::decode(&bytes).unwrap();
        assert_eq!(decoded.attributes.len(), 1);
        assert_eq!(decoded.lifetime(), Some(300));
    }

    #[test]
    fn test_error_code_composite() {
        let attr = Attribute::error_code(437, "Allocation Mismatch");
        assert_eq!(&attr.value[..4], &[0, 0, 4, 37]);

        let msg = Message::new(MessageType::AllocateError, sample_tid()).with_attribute(attr);
        let decoded = Message::decode(&msg.encode().unwrap()).unwrap();
        assert_eq!(
            decoded.error_code(),
            Some(ErrorCode { code: 437, reason: "Allocation Mismatch".into() })
        );

        let stale = Attribute::new(AttributeType::ErrorCode, vec![0, 0, 4, 38, b'S']);
        assert_eq!(stale.as_error_code().map(|e| e.code), Some(438));
    }

    #[test]
    fn test_error_code_class_stays_in_three_bits() {
        let attr = Attribute::error_code(801, "Out of range");
        assert_eq!(attr.value[2], 0);
        assert_eq!(attr.value[3], 1);

        let attr = Attribute::error_code(699, "Top");
        assert_eq!(attr.as_error_code().map(|e| e.code), Some(699));
    }

    #[test]
    fn test_unknown_types_roundtrip() {
        let msg = Message::new(MessageType::from(0x0111), sample_tid())
            .with_attribute(Attribute::new(AttributeType::from(0xC001), vec![1, 2, 3]));

        let decoded = Message::decode(&msg.encode().unwrap()).unwrap();
        assert_eq!(decoded.message_type, MessageType::Other(0x0111));
        assert_eq!(decoded.attributes[0].attr_type, AttributeType::Unknown(0xC001));
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_message_type_class_and_method() {
        assert_eq!(MessageType::AllocateRequest.class(), MessageClass::Request);
        assert_eq!(MessageType::AllocateResponse.class(), MessageClass::SuccessResponse);
        assert_eq!(MessageType::AllocateError.class(), MessageClass::ErrorResponse);
        assert_eq!(MessageType::CreatePermissionResponse.method(), 0x0008);

        assert!(MessageType::AllocateError.answers(MessageType::AllocateRequest));
        assert!(MessageType::CreatePermissionResponse.answers(MessageType::CreatePermissionRequest));
        assert!(!MessageType::AllocateResponse.answers(MessageType::CreatePermissionRequest));
        assert!(!MessageType::AllocateRequest.answers(MessageType::AllocateRequest));
    }

    #[test]
    fn test_oversized_attribute_rejected() {
        let attr = Attribute::new(AttributeType::Software, vec![0u8; 70_000]);
        let msg = Message::new(MessageType::AllocateRequest, sample_tid()).with_attribute(attr);
        assert!(matches!(msg.encode(), Err(EncodeError::MessageTooLarge(_))));

        let mut buf = BytesMut::new();
        let attr = Attribute::new(AttributeType::Software, vec![0u8; 70_000]);
        assert!(matches!(attr.encode(&mut buf), Err(EncodeError::AttributeTooLarge { .. })));
    }

    #[test]
    fn test_transaction_id_randomness() {
        let tid1 = TransactionId::new();
        let tid2 = TransactionId::new();
        assert_ne!(tid1, tid2);
        assert_eq!(sample_tid().to_string(), "0102030405060708090a0b0c");
    }
}
