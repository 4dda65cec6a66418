//! Socket transport: one kernel socket per (address family, socket kind).

use std::io;
use std::net::{IpAddr, SocketAddr};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tracing::{debug, trace, warn};

use crate::codec::{self, AddressFamily, WireIdentity};
use crate::error::{PingError, Result};

/// Raw vs. datagram ICMP sockets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketKind {
    /// `SOCK_RAW` — sees all ICMP traffic for the host, needs elevated
    /// privilege on most platforms.
    Raw,
    /// `SOCK_DGRAM` with `IPPROTO_ICMP`/`IPPROTO_ICMPV6` — Linux-only
    /// unprivileged ICMP, gated by `net.ipv4.ping_group_range`.
    Dgram,
}

/// Ordered preference of socket kinds to try at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionPolicy {
    Raw,
    Dgram,
    /// Try raw first, fall back to datagram.
    RawThenDgram,
    /// Try datagram first, fall back to raw.
    DgramThenRaw,
}

impl SelectionPolicy {
    fn order(self) -> &'static [SocketKind] {
        use SocketKind::*;
        match self {
            SelectionPolicy::Raw => &[Raw],
            SelectionPolicy::Dgram => &[Dgram],
            SelectionPolicy::RawThenDgram => &[Raw, Dgram],
            SelectionPolicy::DgramThenRaw => &[Dgram, Raw],
        }
    }

    /// Parse the CLI spelling: `raw`, `dgram`, `raw,dgram`, `dgram,raw`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "raw" => Some(SelectionPolicy::Raw),
            "dgram" => Some(SelectionPolicy::Dgram),
            "raw,dgram" => Some(SelectionPolicy::RawThenDgram),
            "dgram,raw" => Some(SelectionPolicy::DgramThenRaw),
            _ => None,
        }
    }
}

/// Socket-level configuration, applied in order at construction.
#[derive(Debug, Clone, Default)]
pub struct TransportConfig {
    pub src_addr: Option<String>,
    pub ttl: Option<u32>,
    pub tos: Option<u32>,
    pub send_buffer_size: Option<usize>,
    pub recv_buffer_size: Option<usize>,
}

/// Owns the single kernel socket for one (address family, socket kind).
///
/// Wraps the raw/datagram socket in a [`tokio::net::UdpSocket`] purely to
/// get readiness registration with the tokio reactor; ICMP is connectionless
/// the same way UDP is, so the same mio-level readiness machinery applies.
pub struct Transport {
    family: AddressFamily,
    kind: SocketKind,
    inner: UdpSocket,
}

impl Transport {
    /// Open a socket per `policy`, applying `config` to whichever kind wins.
    /// The first candidate that opens successfully is used; earlier
    /// failures are logged and suppressed unless every candidate fails, in
    /// which case the last error is surfaced as [`PingError::PermissionDenied`].
    pub fn open(family: AddressFamily, policy: SelectionPolicy, config: &TransportConfig) -> Result<Self> {
        let mut tried = Vec::new();
        let mut last_err: Option<io::Error> = None;
        for &kind in policy.order() {
            match Self::open_kind(family, kind, config) {
                Ok(transport) => return Ok(transport),
                Err(e) => {
                    debug!(?family, ?kind, error = %e, "socket kind unavailable, trying next");
                    tried.push(kind);
                    last_err = Some(e);
                }
            }
        }
        Err(PingError::PermissionDenied(
            tried,
            last_err.unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "no socket kind attempted")),
        ))
    }

    fn open_kind(family: AddressFamily, kind: SocketKind, config: &TransportConfig) -> io::Result<Self> {
        let domain = match family {
            AddressFamily::V4 => Domain::IPV4,
            AddressFamily::V6 => Domain::IPV6,
        };
        let sock_type = match kind {
            SocketKind::Raw => Type::RAW,
            SocketKind::Dgram => Type::DGRAM,
        };
        let protocol = match family {
            AddressFamily::V4 => Protocol::ICMPV4,
            AddressFamily::V6 => Protocol::ICMPV6,
        };

        let socket = Socket::new(domain, sock_type, Some(protocol))?;
        socket.set_nonblocking(true)?;

        if let Some(ref addr) = config.src_addr {
            let ip: IpAddr = addr
                .parse()
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "invalid source address"))?;
            socket.bind(&SocketAddr::new(ip, 0).into())?;
        }

        if let Some(ttl) = config.ttl {
            match family {
                AddressFamily::V4 => socket.set_ttl(ttl)?,
                // Best-effort on some kernels for raw ICMPv6 sockets; a
                // failure here must not fail construction (§9 open question).
                AddressFamily::V6 => {
                    if let Err(e) = socket.set_unicast_hops_v6(ttl) {
                        warn!(error = %e, "failed to set IPv6 unicast hop limit, continuing");
                    }
                }
            }
        }
        if let Some(tos) = config.tos {
            match family {
                AddressFamily::V4 => socket.set_tos(tos)?,
                AddressFamily::V6 => {
                    if let Err(e) = socket.set_tclass_v6(tos) {
                        warn!(error = %e, "failed to set IPv6 traffic class, continuing");
                    }
                }
            }
        }
        if let Some(size) = config.send_buffer_size {
            socket.set_send_buffer_size(size)?;
        }
        if let Some(size) = config.recv_buffer_size {
            socket.set_recv_buffer_size(size)?;
        }
        // ICMPv6 checksums: Linux computes and validates them itself for
        // both raw and datagram ICMPv6 sockets, so the codec leaves the
        // checksum field zero on send. `codec::icmpv6_checksum` implements
        // the manual pseudo-header strategy for platforms that don't, and
        // is exercised directly by the codec's own tests.

        let std_socket: std::net::UdpSocket = socket.into();
        let inner = UdpSocket::from_std(std_socket)?;
        Ok(Self { family, kind, inner })
    }

    pub fn family(&self) -> AddressFamily {
        self.family
    }

    pub fn kind(&self) -> SocketKind {
        self.kind
    }

    /// Send one packet. Returns the byte count written, which must equal
    /// `packet.len()`.
    ///
    /// Non-blocking: a full kernel send buffer reports `WouldBlock`
    /// immediately as `PingError::Transport` rather than awaiting writability.
    /// `submit` runs on the single per-family actor alongside `on_readable`
    /// and the expiration sweep, so blocking here would stall reply
    /// processing for every other in-flight probe on this socket.
    pub fn send(&self, destination: IpAddr, packet: &[u8]) -> Result<usize> {
        let addr = SocketAddr::new(destination, 0);
        match self.inner.try_send_to(packet, addr) {
            Ok(n) => Ok(n),
            Err(e) if is_unreachable(&e) => Err(PingError::UnreachableHost),
            Err(e) => Err(PingError::Transport(e)),
        }
    }

    /// Wait for the socket to become readable. Callers should then call
    /// [`Transport::drain_receive`] to fully drain before awaiting again.
    pub async fn readable(&self) -> io::Result<()> {
        self.inner.readable().await
    }

    /// Non-blocking bulk drain: reads datagrams until the socket reports
    /// `WouldBlock`. Each readability wakeup must call this to completion to
    /// avoid backlog building up in the kernel receive buffer.
    pub fn drain_receive(&self, arrival_ts_ns: impl Fn() -> u64, magic: u64) -> Vec<(u64, WireIdentity)> {
        let mut out = Vec::new();
        let mut buf = [0u8; 2048];
        loop {
            match self.inner.try_recv(&mut buf) {
                Ok(n) => {
                    let ts = arrival_ts_ns();
                    let body = strip_ip_header(self.family, self.kind, &buf[..n]);
                    match codec::parse_reply(self.family, magic, body) {
                        Some(identity) => out.push((ts, identity)),
                        None => trace!("dropped unparseable or foreign datagram"),
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(_) => break, // transient read error; expiration sweep ensures progress
            }
        }
        out
    }
}

/// Raw IPv4 sockets hand back the IP header in front of the ICMP message;
/// every other combination (IPv4 datagram, and both IPv6 kinds on Linux)
/// delivers the ICMP message directly.
fn strip_ip_header<'a>(family: AddressFamily, kind: SocketKind, buf: &'a [u8]) -> &'a [u8] {
    if family == AddressFamily::V4 && kind == SocketKind::Raw && buf.len() >= codec::IPV4_HEADER_LEN {
        let ihl = ((buf[0] & 0x0f) as usize) * 4;
        if buf.len() >= ihl {
            return &buf[ihl..];
        }
    }
    buf
}

fn is_unreachable(e: &io::Error) -> bool {
    matches!(
        e.raw_os_error(),
        Some(libc_enetunreach) if libc_enetunreach == libc::ENETUNREACH || libc_enetunreach == libc::EHOSTUNREACH
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_policy_parses_cli_spelling() {
        assert_eq!(SelectionPolicy::parse("raw"), Some(SelectionPolicy::Raw));
        assert_eq!(SelectionPolicy::parse("dgram"), Some(SelectionPolicy::Dgram));
        assert_eq!(SelectionPolicy::parse("raw,dgram"), Some(SelectionPolicy::RawThenDgram));
        assert_eq!(SelectionPolicy::parse("dgram,raw"), Some(SelectionPolicy::DgramThenRaw));
        assert_eq!(SelectionPolicy::parse("bogus"), None);
    }

    #[test]
    fn strip_ip_header_only_touches_raw_v4() {
        let mut ipv4_packet = vec![0x45u8, 0, 0, 28];
        ipv4_packet.extend_from_slice(&[0u8; 16]); // rest of a 20-byte header
        ipv4_packet.extend_from_slice(&[0xAA, 0xBB]); // ICMP payload start
        let stripped = strip_ip_header(AddressFamily::V4, SocketKind::Raw, &ipv4_packet);
        assert_eq!(stripped, &[0xAA, 0xBB]);

        let dgram_body = [0xAAu8, 0xBB];
        let unstripped = strip_ip_header(AddressFamily::V4, SocketKind::Dgram, &dgram_body);
        assert_eq!(unstripped, &dgram_body);
    }
}
