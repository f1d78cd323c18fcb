// src/nat/stun/address.rs
//! XOR-obfuscated transport addresses (XOR-MAPPED-ADDRESS,
//! XOR-RELAYED-ADDRESS, XOR-PEER-ADDRESS).
//!
//! The port is XORed with the high 16 bits of the magic cookie. An IPv4
//! address is XORed with the cookie itself; an IPv6 address is XORed with
//! the cookie followed by the transaction ID of the message carrying it.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use bytes::{BufMut, Bytes, BytesMut};

use super::protocol::{TransactionId, MAGIC_COOKIE};

/// Address family selector for IPv4
pub const FAMILY_IPV4: u8 = 0x01;

/// Address family selector for IPv6
pub const FAMILY_IPV6: u8 = 0x02;

/// Encoded size of an IPv4 XOR address value
pub const XOR_ADDRESS_V4_LEN: usize = 8;

/// Encoded size of an IPv6 XOR address value
pub const XOR_ADDRESS_V6_LEN: usize = 20;

/// 16-byte XOR key: magic cookie followed by the transaction ID
fn xor_key(tid: &TransactionId) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..4].copy_from_slice(&MAGIC_COOKIE.to_be_bytes());
    key[4..].copy_from_slice(tid.as_bytes());
    key
}

/// Encode `addr` as an XOR address attribute value.
///
/// Port 0 is allowed: a CreatePermission authorises an IP, not a port.
pub fn encode_xor_address(addr: &SocketAddr, tid: &TransactionId) -> Bytes {
    let key = xor_key(tid);
    let port = addr.port() ^ (MAGIC_COOKIE >> 16) as u16;

    match addr.ip() {
        IpAddr::V4(ip) => {
            let mut buf = BytesMut::with_capacity(XOR_ADDRESS_V4_LEN);
            buf.put_u8(0); // Reserved
            buf.put_u8(FAMILY_IPV4);
            buf.put_u16(port);
            for (byte, k) in ip.octets().iter().zip(&key[..4]) {
                buf.put_u8(byte ^ k);
            }
            buf.freeze()
        }
        IpAddr::V6(ip) => {
            let mut buf = BytesMut::with_capacity(XOR_ADDRESS_V6_LEN);
            buf.put_u8(0); // Reserved
            buf.put_u8(FAMILY_IPV6);
            buf.put_u16(port);
            for (byte, k) in ip.octets().iter().zip(key.iter()) {
                buf.put_u8(byte ^ k);
            }
            buf.freeze()
        }
    }
}

/// Decode an XOR address attribute value.
///
/// Returns `None` when the family is unknown or the value is too short for
/// its family; the attribute is then treated as absent.
pub fn decode_xor_address(value: &[u8], tid: &TransactionId) -> Option<SocketAddr> {
    if value.len() < 4 {
        return None;
    }

    let family = value[1];
    let port = u16::from_be_bytes([value[2], value[3]]) ^ (MAGIC_COOKIE >> 16) as u16;
    let key = xor_key(tid);

    match family {
        FAMILY_IPV4 => {
            if value.len() < XOR_ADDRESS_V4_LEN {
                return None;
            }
            let mut octets = [0u8; 4];
            for (i, octet) in octets.iter_mut().enumerate() {
                *octet = value[4 + i] ^ key[i];
            }
            Some(SocketAddr::new(IpAddr::V4(Ipv4Addr::from(octets)), port))
        }
        FAMILY_IPV6 => {
            if value.len() < XOR_ADDRESS_V6_LEN {
                return None;
            }
            let mut octets = [0u8; 16];
            for (i, octet) in octets.iter_mut().enumerate() {
                *octet = value[4 + i] ^ key[i];
            }
            Some(SocketAddr::new(IpAddr::V6(Ipv6Addr::from(octets)), port))
        }
        _ => None,
    }
}
