//! Lanbridge - a user-space UDP broadcast relay.
//!
//! Lanbridge captures UDP broadcast datagrams on the local interface and
//! retransmits each one as a unicast copy to a configured list of remote
//! peers, rewriting the IP and UDP headers so every copy looks like a
//! normal unicast. LAN-discovery games on the far side of a VPN that does
//! not carry broadcasts then see the session as if everyone shared a link.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`config`]: Configuration loading and validation
//! - [`engine`]: Capture engine lifecycle and the relay loop
//! - [`receivers`]: The concurrently-mutable peer set
//! - [`network`]: Buffer pool, header codec, raw sockets, header rewrite
//! - [`metrics`]: Prometheus exporter bootstrap
//! - [`error`]: Error types
//!
//! # Testing
//!
//! The capture and egress sockets sit behind the
//! [`PacketSource`](network::PacketSource) and
//! [`PacketSink`](network::PacketSink) traits, so the whole relay pipeline
//! can be exercised without raw-socket privileges:
//!
//! ```rust
//! use lanbridge::network::rewrite_destination;
//!
//! // A captured broadcast can be rewritten in place for any peer.
//! let mut datagram = vec![0u8; 32];
//! datagram[0] = 0x45; // IPv4, IHL 5
//! datagram[24..26].copy_from_slice(&12u16.to_be_bytes()); // UDP length
//! rewrite_destination(&mut datagram, "10.0.0.2".parse().unwrap()).unwrap();
//! assert_eq!(&datagram[16..20], &[10, 0, 0, 2]);
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod network;
pub mod receivers;

pub use config::Config;
pub use engine::{EngineConfig, RelayEngine};
pub use error::{Error, Result};
