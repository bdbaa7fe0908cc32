//! Link, IPv4 and TCP header decoding down to the TCP payload.
//!
//! Only the first fragment of an IPv4 datagram carries the TCP header, so
//! later fragments are skipped. IPv6 is not decoded.

use crate::error::CaptureError;
use crate::pcap::LinkType;
use bytes::{BufMut, Bytes, BytesMut};
use std::net::{Ipv4Addr, SocketAddrV4};

const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_VLAN: u16 = 0x8100;
const ETHERNET_HEADER_LEN: usize = 14;
const SLL_HEADER_LEN: usize = 16;
const NULL_HEADER_LEN: usize = 4;
const AF_INET: u32 = 2;
const IPPROTO_TCP: u8 = 6;
const MIN_IPV4_HEADER_LEN: usize = 20;
const MIN_TCP_HEADER_LEN: usize = 20;

/// TCP payload with its endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpSegment {
    pub src: SocketAddrV4,
    pub dst: SocketAddrV4,
    pub payload: Bytes,
}

fn be16(buf: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([buf[at], buf[at + 1]])
}

/// Decodes a captured frame down to its TCP segment.
///
/// Returns `Ok(None)` for traffic that is not TCP over IPv4 and
/// `Err(Malformed)` when a header contradicts the bytes present.
pub fn decode_tcp(link_type: LinkType, frame: &Bytes) -> Result<Option<TcpSegment>, CaptureError> {
    let ip_start = match link_type {
        LinkType::Ethernet => {
            if frame.len() < ETHERNET_HEADER_LEN {
                return Err(CaptureError::malformed("ethernet", "short header"));
            }
            let mut offset = 12;
            let mut ethertype = be16(frame, offset);
            if ethertype == ETHERTYPE_VLAN {
                offset += 4;
                if frame.len() < offset + 2 {
                    return Err(CaptureError::malformed("ethernet", "short VLAN tag"));
                }
                ethertype = be16(frame, offset);
            }
            if ethertype != ETHERTYPE_IPV4 {
                return Ok(None);
            }
            offset + 2
        }
        LinkType::Null => {
            if frame.len() < NULL_HEADER_LEN {
                return Err(CaptureError::malformed("loopback", "short header"));
            }
            // Family is in the capturing host's byte order
            let raw = [frame[0], frame[1], frame[2], frame[3]];
            if u32::from_le_bytes(raw) != AF_INET && u32::from_be_bytes(raw) != AF_INET {
                return Ok(None);
            }
            NULL_HEADER_LEN
        }
        LinkType::LinuxSll => {
            if frame.len() < SLL_HEADER_LEN {
                return Err(CaptureError::malformed("sll", "short header"));
            }
            if be16(frame, 14) != ETHERTYPE_IPV4 {
                return Ok(None);
            }
            SLL_HEADER_LEN
        }
        LinkType::Raw => 0,
    };

    decode_ipv4(&frame.slice(ip_start..))
}

fn decode_ipv4(packet: &Bytes) -> Result<Option<TcpSegment>, CaptureError> {
    if packet.is_empty() {
        return Err(CaptureError::malformed("ipv4", "empty packet"));
    }
    if packet[0] >> 4 != 4 {
        return Ok(None);
    }
    if packet.len() < MIN_IPV4_HEADER_LEN {
        return Err(CaptureError::malformed("ipv4", "short header"));
    }

    let header_len = ((packet[0] & 0x0f) as usize) * 4;
    if header_len < MIN_IPV4_HEADER_LEN || header_len > packet.len() {
        return Err(CaptureError::malformed(
            "ipv4",
            format!("header length {}", header_len),
        ));
    }
    if packet[9] != IPPROTO_TCP {
        return Ok(None);
    }
    if be16(packet, 6) & 0x1fff != 0 {
        return Ok(None);
    }

    // Ethernet may pad short frames; trust total_length when it fits
    let total_len = be16(packet, 2) as usize;
    let end = if total_len >= header_len && total_len <= packet.len() {
        total_len
    } else {
        packet.len()
    };

    let src_ip = Ipv4Addr::new(packet[12], packet[13], packet[14], packet[15]);
    let dst_ip = Ipv4Addr::new(packet[16], packet[17], packet[18], packet[19]);
    let segment = packet.slice(header_len..end);

    if segment.len() < MIN_TCP_HEADER_LEN {
        return Err(CaptureError::malformed("tcp", "short header"));
    }
    let data_offset = ((segment[12] >> 4) as usize) * 4;
    if data_offset < MIN_TCP_HEADER_LEN || data_offset > segment.len() {
        return Err(CaptureError::malformed(
            "tcp",
            format!("data offset {}", data_offset),
        ));
    }

    Ok(Some(TcpSegment {
        src: SocketAddrV4::new(src_ip, be16(&segment, 0)),
        dst: SocketAddrV4::new(dst_ip, be16(&segment, 2)),
        payload: segment.slice(data_offset..),
    }))
}

/// Builds an Ethernet/IPv4/TCP frame around `payload`.
///
/// Checksums are left zero; the decoder does not verify them.
pub fn encode_ethernet_tcp(src: SocketAddrV4, dst: SocketAddrV4, payload: &[u8]) -> Bytes {
    let total_len = MIN_IPV4_HEADER_LEN + MIN_TCP_HEADER_LEN + payload.len();
    let mut buf = BytesMut::with_capacity(ETHERNET_HEADER_LEN + total_len);

    buf.put_slice(&[0x02, 0, 0, 0, 0, 0x02]);
    buf.put_slice(&[0x02, 0, 0, 0, 0, 0x01]);
    buf.put_u16(ETHERTYPE_IPV4);

    buf.put_u8(0x45);
    buf.put_u8(0);
    buf.put_u16(total_len as u16);
    buf.put_u16(0);
    buf.put_u16(0x4000);
    buf.put_u8(64);
    buf.put_u8(IPPROTO_TCP);
    buf.put_u16(0);
    buf.put_slice(&src.ip().octets());
    buf.put_slice(&dst.ip().octets());

    buf.put_u16(src.port());
    buf.put_u16(dst.port());
    buf.put_u32(1);
    buf.put_u32(0);
    buf.put_u8(5 << 4);
    buf.put_u8(0x18);
    buf.put_u16(65535);
    buf.put_u16(0);
    buf.put_u16(0);

    buf.put_slice(payload);
    buf.freeze()
}
