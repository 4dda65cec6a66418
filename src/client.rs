//! Client facade: `probe` and `series`, the two operations external callers
//! use. Everything else in this crate exists to make these two cheap to call
//! concurrently from many tasks at once.

use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use tokio::time::{self, Instant};
use tracing::instrument;

use crate::codec::AddressFamily;
use crate::config::Config;
use crate::error::{PingError, Result};
use crate::multiplexer::Multiplexer;
use crate::outcome::Outcome;

/// Parse and normalize a destination address string.
///
/// IPv6 addresses are reduced to their canonical compact form (`"0::1"` and
/// `"::1"` parse to the same value); IPv4 addresses in abbreviated or
/// octal-looking (leading-zero octet) form are rejected rather than
/// silently reinterpreted. Malformed input is reported as
/// [`PingError::InvalidAddress`] rather than a bare parse error, so it can
/// be matched on at the library boundary the way every other failure mode
/// here can.
pub fn parse_address(address: &str) -> Result<IpAddr> {
    address.trim().parse::<IpAddr>().map_err(|_| PingError::InvalidAddress(address.to_string()))
}

/// Entry point for sending ICMP echo probes. Cheap to clone — it shares its
/// per-family multiplexers (and their sockets) across every clone.
///
/// A multiplexer for a given address family is opened lazily, on the first
/// probe that needs it, and then kept for the client's lifetime: most
/// processes only ever touch one family, and paying for a v6 socket that's
/// never used would be wasted privilege and file descriptors.
#[derive(Clone)]
pub struct Client {
    config: Config,
    v4: Arc<Mutex<Option<Multiplexer>>>,
    v6: Arc<Mutex<Option<Multiplexer>>>,
}

impl Client {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            v4: Arc::new(Mutex::new(None)),
            v6: Arc::new(Mutex::new(None)),
        }
    }

    fn multiplexer_for(&self, family: AddressFamily) -> Result<Multiplexer> {
        let slot = match family {
            AddressFamily::V4 => &self.v4,
            AddressFamily::V6 => &self.v6,
        };
        let mut guard = slot.lock().expect("multiplexer slot mutex poisoned");
        if let Some(mux) = guard.as_ref() {
            return Ok(mux.clone());
        }
        let mux = Multiplexer::spawn(family, &self.config)?;
        *guard = Some(mux.clone());
        Ok(mux)
    }

    /// Send one echo request to `address` and await its outcome. `address`
    /// is parsed and normalized via [`parse_address`]; malformed input
    /// fails with `PingError::InvalidAddress` before any socket is touched.
    /// A fresh identifier and a random starting sequence are allocated for
    /// this call alone — concurrent `probe` calls never share a sequence
    /// space.
    #[instrument(skip(self), fields(%address))]
    pub async fn probe(&self, address: &str) -> Result<Outcome> {
        let address = parse_address(address)?;
        let family = AddressFamily::from_ip(address);
        let mux = self.multiplexer_for(family)?;
        let identifier: u16 = rand::thread_rng().gen();
        let sequence: u16 = rand::thread_rng().gen();
        let pending = mux.submit(address, self.config.size(), identifier, sequence).await?;
        Ok(pending.wait().await)
    }

    /// Start a series of probes against `address` (parsed and normalized
    /// via [`parse_address`]), paced by `interval` (flood mode — send the
    /// next probe as soon as the previous one resolves — when `interval` is
    /// `None`). The identifier is allocated once for the whole series; the
    /// sequence number advances by one (wrapping) per probe, matching how a
    /// single `ping` invocation numbers its echoes.
    pub fn series(&self, address: &str, options: SeriesOptions) -> Result<Series> {
        let address = parse_address(address)?;
        let family = AddressFamily::from_ip(address);
        let mux = self.multiplexer_for(family)?;
        Ok(Series {
            mux,
            address,
            size: options.size.unwrap_or_else(|| self.config.size()),
            interval: options.interval,
            remaining: options.count,
            identifier: rand::thread_rng().gen(),
            next_sequence: rand::thread_rng().gen(),
            last_send_at: None,
        })
    }
}

/// Optional overrides for a [`Client::series`] call; `None` fields fall back
/// to the client's configuration (or, for `count`, run unbounded).
#[derive(Debug, Clone, Copy, Default)]
pub struct SeriesOptions {
    pub size: Option<usize>,
    pub interval: Option<Duration>,
    pub count: Option<u32>,
}

/// A run of probes against one address, produced by [`Client::series`].
///
/// An explicit `next()` method is used here rather than implementing
/// [`futures_core::Stream`]: a series is consumed one probe at a time by a
/// single caller, and pacing (the wait before the next send) is part of what
/// `next()` does, not something a generic combinator should race against.
pub struct Series {
    mux: Multiplexer,
    address: IpAddr,
    size: usize,
    interval: Option<Duration>,
    remaining: Option<u32>,
    identifier: u16,
    next_sequence: u16,
    last_send_at: Option<Instant>,
}

impl Series {
    /// Send the next probe in the series and await its outcome. Returns
    /// `None` once `count` probes have been sent.
    pub async fn next(&mut self) -> Option<Result<Outcome>> {
        if let Some(remaining) = self.remaining {
            if remaining == 0 {
                return None;
            }
        }

        if let (Some(interval), Some(last)) = (self.interval, self.last_send_at) {
            let elapsed = last.elapsed();
            if elapsed < interval {
                time::sleep(interval - elapsed).await;
            }
        }

        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);
        self.last_send_at = Some(Instant::now());

        let result = async {
            let pending = self.mux.submit(self.address, self.size, self.identifier, sequence).await?;
            Ok(pending.wait().await)
        }
        .await;

        if let Some(remaining) = self.remaining.as_mut() {
            *remaining -= 1;
        }
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_ipv6_to_canonical_compact_form() {
        assert_eq!(parse_address("0::1").unwrap(), "::1".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn rejects_ipv4_octet_with_leading_zero() {
        let err = parse_address("127.0.0.01").unwrap_err();
        assert!(matches!(err, PingError::InvalidAddress(_)));
    }

    #[test]
    fn accepts_plain_ipv4() {
        assert_eq!(parse_address("127.0.0.1").unwrap(), "127.0.0.1".parse::<IpAddr>().unwrap());
    }
}
