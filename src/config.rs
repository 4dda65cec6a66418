//! Client-wide configuration, validated once at construction.

use std::time::Duration;

use crate::clock::ClockMode;
use crate::codec::{AddressFamily, MIN_PACKET_SIZE};
use crate::error::{PingError, Result};
use crate::socket::{SelectionPolicy, TransportConfig};

const MAX_TTL: u32 = 255;
const MAX_TOS: u32 = 255;

/// Immutable, validated configuration shared by every per-family
/// multiplexer a [`crate::Client`] creates.
#[derive(Debug, Clone)]
pub struct Config {
    pub(crate) size: usize,
    pub(crate) ttl: Option<u32>,
    pub(crate) tos: Option<u32>,
    pub(crate) timeout: Duration,
    pub(crate) send_buffer_size: Option<usize>,
    pub(crate) recv_buffer_size: Option<usize>,
    pub(crate) source_addresses: Vec<String>,
    pub(crate) clock_mode: ClockMode,
    pub(crate) policy: SelectionPolicy,
}

impl Default for Config {
    fn default() -> Self {
        ConfigBuilder::default().build().expect("defaults are valid")
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn policy(&self) -> SelectionPolicy {
        self.policy
    }

    pub fn clock_mode(&self) -> ClockMode {
        self.clock_mode
    }

    /// Source address to bind for the given family, if one was configured
    /// (the first configured address for that family wins, mirroring how
    /// multiple source addresses are distributed across families).
    pub fn source_address_for(&self, family: AddressFamily) -> Option<String> {
        self.source_addresses
            .iter()
            .find(|addr| AddressFamily::of(addr) == family)
            .cloned()
    }

    /// Transport-level configuration for `family`. `ttl`/`tos` are handed to
    /// the transport regardless of family — it is the transport's job to
    /// apply them as TTL/TOS on v4 sockets and unicast-hop-limit/traffic-class
    /// on v6 ones.
    pub fn transport_for(&self, family: AddressFamily) -> TransportConfig {
        TransportConfig {
            src_addr: self.source_address_for(family),
            ttl: self.ttl,
            tos: self.tos,
            send_buffer_size: self.send_buffer_size,
            recv_buffer_size: self.recv_buffer_size,
        }
    }
}

/// Builder for [`Config`]. Mirrors the external `create(config)` contract:
/// `size`, `ttl`, `tos`, `timeout`, buffers, source address(es), clock mode,
/// policy.
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    size: usize,
    ttl: Option<u32>,
    tos: Option<u32>,
    timeout: Duration,
    send_buffer_size: Option<usize>,
    recv_buffer_size: Option<usize>,
    source_addresses: Vec<String>,
    clock_mode: ClockMode,
    policy: SelectionPolicy,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self {
            size: MIN_PACKET_SIZE,
            ttl: None,
            tos: None,
            timeout: Duration::from_secs(1),
            send_buffer_size: None,
            recv_buffer_size: Some(256 * 1024),
            source_addresses: Vec::new(),
            clock_mode: ClockMode::Fine,
            policy: SelectionPolicy::RawThenDgram,
        }
    }
}

impl ConfigBuilder {
    pub fn size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    pub fn ttl(mut self, ttl: u32) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn tos(mut self, tos: u32) -> Self {
        self.tos = Some(tos);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn send_buffer_size(mut self, size: usize) -> Self {
        self.send_buffer_size = Some(size);
        self
    }

    pub fn recv_buffer_size(mut self, size: usize) -> Self {
        self.recv_buffer_size = Some(size);
        self
    }

    /// Add a source address. Multiple addresses may be added; for each
    /// address family, the first one added wins.
    pub fn source_address(mut self, addr: impl Into<String>) -> Self {
        self.source_addresses.push(addr.into());
        self
    }

    pub fn clock_mode(mut self, mode: ClockMode) -> Self {
        self.clock_mode = mode;
        self
    }

    pub fn coarse_clock(mut self, coarse: bool) -> Self {
        self.clock_mode = if coarse { ClockMode::Coarse } else { ClockMode::Fine };
        self
    }

    pub fn policy(mut self, policy: SelectionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn build(self) -> Result<Config> {
        if self.size < MIN_PACKET_SIZE {
            return Err(PingError::Config(format!(
                "size must be at least {MIN_PACKET_SIZE} bytes, got {}",
                self.size
            )));
        }
        if let Some(ttl) = self.ttl {
            if ttl < 1 || ttl > MAX_TTL {
                return Err(PingError::Config(format!("ttl must be in 1..={MAX_TTL}, got {ttl}")));
            }
        }
        if let Some(tos) = self.tos {
            if tos > MAX_TOS {
                return Err(PingError::Config(format!("tos must be in 0..={MAX_TOS}, got {tos}")));
            }
        }
        Ok(Config {
            size: self.size,
            ttl: self.ttl,
            tos: self.tos,
            timeout: self.timeout,
            send_buffer_size: self.send_buffer_size,
            recv_buffer_size: self.recv_buffer_size,
            source_addresses: self.source_addresses,
            clock_mode: self.clock_mode,
            policy: self.policy,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_undersized_packets() {
        let err = Config::builder().size(32).build().unwrap_err();
        assert!(matches!(err, PingError::Config(_)));
    }

    #[test]
    fn rejects_ttl_zero() {
        let err = Config::builder().ttl(0).build().unwrap_err();
        assert!(matches!(err, PingError::Config(_)));
    }

    #[test]
    fn rejects_ttl_above_max() {
        let err = Config::builder().ttl(256).build().unwrap_err();
        assert!(matches!(err, PingError::Config(_)));
    }

    #[test]
    fn rejects_tos_above_max() {
        let err = Config::builder().tos(256).build().unwrap_err();
        assert!(matches!(err, PingError::Config(_)));
    }

    #[test]
    fn accepts_boundary_values() {
        let cfg = Config::builder().ttl(1).tos(0).size(MIN_PACKET_SIZE).build().unwrap();
        assert_eq!(cfg.size(), MIN_PACKET_SIZE);
        let cfg = Config::builder().ttl(255).tos(255).build().unwrap();
        assert_eq!(cfg.ttl, Some(255));
    }

    #[test]
    fn first_source_address_per_family_wins() {
        let cfg = Config::builder()
            .source_address("192.0.2.1")
            .source_address("192.0.2.2")
            .source_address("2001:db8::1")
            .build()
            .unwrap();
        assert_eq!(cfg.source_address_for(AddressFamily::V4), Some("192.0.2.1".to_string()));
        assert_eq!(cfg.source_address_for(AddressFamily::V6), Some("2001:db8::1".to_string()));
    }
}
