//! ICMP echo request/reply packet construction and parsing.
//!
//! Builds the wire bytes handed to the socket transport and extracts the
//! [`WireIdentity`] from a received datagram. The payload marker embedded
//! after the 8-byte ICMP header is what lets the multiplexer demultiplex
//! replies without trusting the kernel to preserve the ICMP `identifier`
//! field (IPv6 datagram sockets are free to rewrite it).

use std::net::Ipv6Addr;

use crate::error::{PingError, Result};

/// IPv4 header length assumed by the size budget (no options).
pub const IPV4_HEADER_LEN: usize = 20;
/// IPv6 header length (fixed, no extension headers).
pub const IPV6_HEADER_LEN: usize = 40;
/// ICMP header length, both families.
pub const ICMP_HEADER_LEN: usize = 8;
/// `[magic:8][send_timestamp_ns:8][session_id:4]`.
pub const MARKER_LEN: usize = 20;
/// Absolute minimum a caller may request, per the external configuration
/// contract. Per-family packets may need more than this to admit the marker.
pub const MIN_PACKET_SIZE: usize = 64;

const ICMPV4_ECHO_REQUEST: u8 = 8;
const ICMPV4_ECHO_REPLY: u8 = 0;
const ICMPV6_ECHO_REQUEST: u8 = 128;
const ICMPV6_ECHO_REPLY: u8 = 129;
const ICMPV6_NEXT_HEADER: u8 = 58;

/// Address family tag, derived from the textual form of an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    V4,
    V6,
}

impl AddressFamily {
    /// Classify an address string the way the spec requires: presence of
    /// `:` selects v6.
    pub fn of(addr: &str) -> Self {
        if addr.contains(':') {
            AddressFamily::V6
        } else {
            AddressFamily::V4
        }
    }

    pub fn from_ip(ip: std::net::IpAddr) -> Self {
        match ip {
            std::net::IpAddr::V4(_) => AddressFamily::V4,
            std::net::IpAddr::V6(_) => AddressFamily::V6,
        }
    }

    pub fn ip_header_len(self) -> usize {
        match self {
            AddressFamily::V4 => IPV4_HEADER_LEN,
            AddressFamily::V6 => IPV6_HEADER_LEN,
        }
    }

    /// The smallest `total_size` (including IP header) that leaves enough
    /// room for the ICMP header and the full payload marker.
    pub fn min_total_size(self) -> usize {
        self.ip_header_len() + ICMP_HEADER_LEN + MARKER_LEN
    }
}

/// Everything needed to correlate a received reply with the probe that
/// produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireIdentity {
    /// ICMP `identifier` field. Informational only on IPv6 datagram sockets.
    pub identifier: u16,
    pub sequence: u16,
    /// Session id embedded in the payload marker, when the reply carried one
    /// back (an echo reply always carries back exactly what was sent, so
    /// this is `Some` whenever the reply's payload is large enough to hold
    /// the marker and its magic matches).
    pub session_id: Option<u32>,
}

/// Build the ICMP payload bytes (the whole "packet" the spec means by
/// *packet codec*: everything that goes after the IP header, which is
/// synthesized by the kernel for datagram sockets or must be present for
/// raw ones depending on socket kind — the transport adds it back in if
/// needed).
///
/// `total_size` is the size *including* the IP header, matching the
/// external configuration contract.
pub fn build_echo_request(
    family: AddressFamily,
    identifier: u16,
    sequence: u16,
    session_id: u32,
    magic: u64,
    send_timestamp_ns: u64,
) -> Result<Vec<u8>> {
    build_echo_request_sized(family, identifier, sequence, session_id, magic, send_timestamp_ns, MIN_PACKET_SIZE)
}

/// As [`build_echo_request`], but with an explicit total packet size.
pub fn build_echo_request_sized(
    family: AddressFamily,
    identifier: u16,
    sequence: u16,
    session_id: u32,
    magic: u64,
    send_timestamp_ns: u64,
    total_size: usize,
) -> Result<Vec<u8>> {
    if total_size < family.min_total_size() {
        return Err(PingError::Config(format!(
            "size {total_size} is too small to admit the payload marker for {family:?} \
             (minimum is {})",
            family.min_total_size()
        )));
    }
    let icmp_len = total_size - family.ip_header_len();
    let mut packet = vec![0u8; icmp_len];

    let (echo_type, code) = match family {
        AddressFamily::V4 => (ICMPV4_ECHO_REQUEST, 0u8),
        AddressFamily::V6 => (ICMPV6_ECHO_REQUEST, 0u8),
    };
    packet[0] = echo_type;
    packet[1] = code;
    // packet[2..4] checksum, filled in below (zero for now).
    packet[4..6].copy_from_slice(&identifier.to_be_bytes());
    packet[6..8].copy_from_slice(&sequence.to_be_bytes());

    let marker = &mut packet[ICMP_HEADER_LEN..ICMP_HEADER_LEN + MARKER_LEN];
    marker[0..8].copy_from_slice(&magic.to_be_bytes());
    marker[8..16].copy_from_slice(&send_timestamp_ns.to_be_bytes());
    marker[16..20].copy_from_slice(&session_id.to_be_bytes());
    // Remaining bytes are left zero-filled, per spec.

    if family == AddressFamily::V4 {
        let checksum = icmpv4_checksum(&packet);
        packet[2..4].copy_from_slice(&checksum.to_be_bytes());
    }
    // ICMPv6: left at zero. The transport sets IPV6_CHECKSUM so the kernel
    // fills in the pseudo-header checksum on send; see `icmpv6_checksum`
    // below for the strategy used when that socket option isn't available.

    Ok(packet)
}

/// Parse a received ICMP message (header + payload, no IP header — the
/// transport is responsible for stripping it when the socket kind returns
/// one) and extract the [`WireIdentity`] if it is an echo reply matching
/// this multiplexer's `magic`.
///
/// Returns `None` for anything that isn't an echo reply for this
/// multiplexer: wrong type (including echo *requests*, which raw sockets
/// can see as loopback mirrors on some OSes), truncated packets, or a
/// marker whose magic doesn't match.
pub fn parse_reply(family: AddressFamily, magic: u64, buf: &[u8]) -> Option<WireIdentity> {
    if buf.len() < ICMP_HEADER_LEN {
        return None;
    }
    let expected_reply = match family {
        AddressFamily::V4 => ICMPV4_ECHO_REPLY,
        AddressFamily::V6 => ICMPV6_ECHO_REPLY,
    };
    if buf[0] != expected_reply {
        return None;
    }
    let identifier = u16::from_be_bytes([buf[4], buf[5]]);
    let sequence = u16::from_be_bytes([buf[6], buf[7]]);

    let session_id = if buf.len() >= ICMP_HEADER_LEN + MARKER_LEN {
        let marker = &buf[ICMP_HEADER_LEN..ICMP_HEADER_LEN + MARKER_LEN];
        let seen_magic = u64::from_be_bytes(marker[0..8].try_into().unwrap());
        if seen_magic == magic {
            Some(u32::from_be_bytes(marker[16..20].try_into().unwrap()))
        } else {
            None
        }
    } else {
        None
    };

    Some(WireIdentity {
        identifier,
        sequence,
        session_id,
    })
}

/// Standard 16-bit one's-complement checksum over an ICMPv4 message, with
/// the checksum field assumed to already be zero in `data`.
pub fn icmpv4_checksum(data: &[u8]) -> u16 {
    ones_complement_sum(&[data])
}

/// ICMPv6 pseudo-header checksum (RFC 4443 §2.3 / RFC 2460 §8.1): source
/// address, destination address, upper-layer length, next-header, then the
/// ICMPv6 message itself with its checksum field zeroed.
///
/// The transport prefers asking the kernel to do this via `IPV6_CHECKSUM`
/// (cheaper, and the only option on some platforms for echo requests sent
/// to link-local destinations), but this function is kept — and tested —
/// for platforms or socket kinds where the kernel does not compute it.
pub fn icmpv6_checksum(src: Ipv6Addr, dst: Ipv6Addr, icmp_message: &[u8]) -> u16 {
    let len = icmp_message.len() as u32;
    let mut pseudo = Vec::with_capacity(16 + 16 + 4 + 4);
    pseudo.extend_from_slice(&src.octets());
    pseudo.extend_from_slice(&dst.octets());
    pseudo.extend_from_slice(&len.to_be_bytes());
    pseudo.extend_from_slice(&[0, 0, 0, ICMPV6_NEXT_HEADER]);
    ones_complement_sum(&[&pseudo, icmp_message])
}

fn ones_complement_sum(parts: &[&[u8]]) -> u16 {
    let len: usize = parts.iter().map(|p| p.len()).sum();
    let mut joined = Vec::with_capacity(len);
    for part in parts {
        joined.extend_from_slice(part);
    }

    let mut sum: u32 = 0;
    let mut chunks = joined.chunks_exact(2);
    for chunk in &mut chunks {
        sum += u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
    }
    if let [last] = chunks.remainder() {
        sum += (*last as u32) << 8;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_undersized_v4_packet() {
        let err = build_echo_request_sized(AddressFamily::V4, 1, 1, 1, 0xdead, 0, 10).unwrap_err();
        assert!(matches!(err, PingError::Config(_)));
    }

    #[test]
    fn rejects_v6_packet_at_the_v4_floor() {
        // 64 bytes is the global config floor, but it's too small for v6
        // once the IPv6 header (40B) + ICMP header (8B) + marker (20B) are
        // accounted for (68B minimum).
        let err =
            build_echo_request_sized(AddressFamily::V6, 1, 1, 1, 0xdead, 0, MIN_PACKET_SIZE)
                .unwrap_err();
        assert!(matches!(err, PingError::Config(_)));
    }

    #[test]
    fn v4_round_trips_identity_and_checksum() {
        let packet =
            build_echo_request_sized(AddressFamily::V4, 0x1234, 42, 7, 0xabad1dea, 1_000, 64)
                .unwrap();
        // Flip the type byte to a reply the way the peer's kernel would.
        let mut reply = packet.clone();
        reply[0] = ICMPV4_ECHO_REPLY;
        // Checksum stays valid: type field doesn't change the ICMPv4
        // checksum semantics under test here (we only assert on parsing).
        let identity = parse_reply(AddressFamily::V4, 0xabad1dea, &reply).unwrap();
        assert_eq!(identity.identifier, 0x1234);
        assert_eq!(identity.sequence, 42);
        assert_eq!(identity.session_id, Some(7));

        // Checksum re-validates: recomputing over the message with the
        // checksum field zeroed reproduces the stored checksum.
        let mut zeroed = packet.clone();
        let stored = u16::from_be_bytes([zeroed[2], zeroed[3]]);
        zeroed[2] = 0;
        zeroed[3] = 0;
        assert_eq!(icmpv4_checksum(&zeroed), stored);
    }

    #[test]
    fn v6_pseudo_header_checksum_is_order_sensitive() {
        let src: Ipv6Addr = "fe80::1".parse().unwrap();
        let dst: Ipv6Addr = "fe80::2".parse().unwrap();
        let msg = [128u8, 0, 0, 0, 0, 1, 0, 1];
        let a = icmpv6_checksum(src, dst, &msg);
        let b = icmpv6_checksum(dst, src, &msg);
        assert_ne!(a, b);
    }

    #[test]
    fn parse_discards_echo_request_loopback() {
        let packet =
            build_echo_request_sized(AddressFamily::V4, 1, 1, 1, 0x42, 0, 64).unwrap();
        assert!(parse_reply(AddressFamily::V4, 0x42, &packet).is_none());
    }

    #[test]
    fn parse_discards_foreign_magic() {
        let mut packet =
            build_echo_request_sized(AddressFamily::V4, 1, 1, 1, 0x42, 0, 64).unwrap();
        packet[0] = ICMPV4_ECHO_REPLY;
        let identity = parse_reply(AddressFamily::V4, 0x99, &packet).unwrap();
        // Type matches, but the magic doesn't, so no session id should be
        // trusted even though a WireIdentity is still produced from the
        // header (caller falls back to identifier+sequence matching).
        assert_eq!(identity.session_id, None);
    }

    #[test]
    fn parse_rejects_truncated_datagram() {
        assert!(parse_reply(AddressFamily::V4, 0x42, &[0u8; 4]).is_none());
    }
}
