// tests/wire_properties.rs
//! Property tests for the STUN wire format over arbitrary inputs.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use bytes::BytesMut;
use proptest::prelude::*;
use tokio_util::codec::Decoder;

use turn_probe::nat::error::{DecodeError, NatError, StunError};
use turn_probe::nat::stun::{
    decode, decode_xor_address, encode, encode_xor_address, Attribute, AttributeType, Message,
    MessageType, StunCodec, TransactionId, MAGIC_COOKIE,
};

fn attributes() -> impl Strategy<Value = Vec<Attribute>> {
    proptest::collection::vec(
        (any::<u16>(), proptest::collection::vec(any::<u8>(), 0..64))
            .prop_map(|(t, value)| Attribute::new(AttributeType::from(t), value)),
        0..8,
    )
}

proptest! {
    #[test]
    fn message_roundtrips(
        raw_type in any::<u16>(),
        tid in any::<[u8; 12]>(),
        attrs in attributes(),
    ) {
        let msg = Message {
            message_type: MessageType::from(raw_type),
            transaction_id: TransactionId::from_bytes(tid),
            attributes: attrs,
        };
        let bytes = encode(msg.message_type, &msg.transaction_id, &msg.attributes).unwrap();

        prop_assert_eq!(bytes.len() % 4, 0);
        prop_assert_eq!(decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn ipv4_xor_address_roundtrips(ip in any::<[u8; 4]>(), port in any::<u16>(), tid in any::<[u8; 12]>()) {
        let tid = TransactionId::from_bytes(tid);
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::from(ip)), port);
        prop_assert_eq!(decode_xor_address(&encode_xor_address(&addr, &tid), &tid), Some(addr));
    }

    #[test]
    fn ipv6_xor_address_roundtrips(ip in any::<[u8; 16]>(), port in any::<u16>(), tid in any::<[u8; 12]>()) {
        let tid = TransactionId::from_bytes(tid);
        let addr = SocketAddr::new(IpAddr::V6(Ipv6Addr::from(ip)), port);
        prop_assert_eq!(decode_xor_address(&encode_xor_address(&addr, &tid), &tid), Some(addr));
    }

    #[test]
    fn bad_cookie_is_rejected(
        mut buf in proptest::collection::vec(any::<u8>(), 20..256),
        cookie in any::<u32>(),
    ) {
        prop_assume!(cookie != MAGIC_COOKIE);
        buf[4..8].copy_from_slice(&cookie.to_be_bytes());

        prop_assert_eq!(decode(&buf), Err(DecodeError::BadMagicCookie(cookie)));

        let mut stream = BytesMut::from(&buf[..]);
        let framed = StunCodec::new().decode(&mut stream);
        prop_assert!(matches!(
            framed,
            Err(NatError::Stun(StunError::Decode(DecodeError::BadMagicCookie(c)))) if c == cookie
        ));
    }

    #[test]
    fn error_code_roundtrips(code in 300u16..=699, reason in "[A-Za-z ]{0,40}") {
        let decoded = Attribute::error_code(code, &reason).as_error_code().unwrap();
        prop_assert_eq!(decoded.code, code);
        prop_assert_eq!(decoded.reason, reason);
    }

    #[test]
    fn error_code_class_never_sets_reserved_bits(code in any::<u16>()) {
        prop_assert_eq!(Attribute::error_code(code, "").value[2] & !0x07, 0);
    }
}
