//! Asynchronous ICMPv4/ICMPv6 echo (ping) client.
//!
//! [`Client`] is the entry point: [`Client::probe`] for a single echo,
//! [`Client::series`] for a paced run of them. Everything else is the
//! machinery that makes those two calls cheap to run concurrently against
//! many destinations from one process — a [`Multiplexer`] per address
//! family demultiplexing replies off a single socket, a [`codec`] for the
//! wire format, and a [`Clock`] for RTT measurement.

pub mod client;
pub mod clock;
pub mod codec;
pub mod config;
pub mod error;
pub mod multiplexer;
pub mod outcome;
pub mod socket;

pub use client::{parse_address, Client, Series, SeriesOptions};
pub use clock::{Clock, ClockMode};
pub use codec::AddressFamily;
pub use config::{Config, ConfigBuilder};
pub use error::{PingError, Result};
pub use multiplexer::{Multiplexer, PendingProbe, SessionId};
pub use outcome::Outcome;
pub use socket::SelectionPolicy;
