//! Capture and egress sockets.
//!
//! Provides trait-based seams over the two raw sockets so the engine can be
//! exercised in tests without privileges or a real interface:
//!
//! - [`PacketSource`]: delivers whole IPv4 datagrams, header included.
//! - [`PacketSink`]: transmits a caller-built IPv4 datagram to a peer.
//!
//! The production implementations use `socket2` raw sockets. The ingress
//! socket is `IPPROTO_UDP` raw, which receives a copy of every inbound UDP
//! datagram on the host with its IP header intact; the bound port is
//! arbitrary and plays no part in filtering. The egress socket is
//! `IPPROTO_RAW` with the header-included option, so the kernel transmits
//! our rewritten IPv4 header unchanged.

use std::io;
use std::mem::MaybeUninit;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;

use pnet::datalink::{self, NetworkInterface};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tracing::debug;

use crate::error::StartError;

/// How long a blocking receive waits before re-arming.
///
/// This is the cancellation latency of the capture loop: stop is observed
/// within one interval, far inside the 2 s stop budget.
pub const RECV_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Source of captured IPv4 datagrams.
pub trait PacketSource: Send {
    /// Receive one datagram into `buf`, returning its length.
    ///
    /// `WouldBlock`/`TimedOut` mean "nothing yet, poll again". `Interrupted`,
    /// aborted and closed-socket errors end the capture loop.
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Sink for rewritten IPv4 datagrams.
pub trait PacketSink: Send + Sync {
    /// Transmit `datagram` (a complete IPv4 packet) to `dest`.
    fn send_to(&self, datagram: &[u8], dest: Ipv4Addr) -> io::Result<usize>;
}

/// Find the capture interface.
///
/// With a name, that interface must exist and carry an IPv4 address.
/// Without one, picks the first interface that is up, not loopback and has
/// an IPv4 address.
pub fn find_interface(name: Option<&str>) -> Result<NetworkInterface, StartError> {
    let interfaces = datalink::interfaces();

    let found = if let Some(name) = name {
        interfaces.into_iter().find(|iface| iface.name == name)
    } else {
        interfaces
            .into_iter()
            .find(|iface| iface.is_up() && !iface.is_loopback() && has_ipv4(iface))
    };

    found.filter(has_ipv4).ok_or(StartError::HostAddress)
}

/// First IPv4 address of `interface`.
pub fn interface_ipv4(interface: &NetworkInterface) -> Result<Ipv4Addr, StartError> {
    interface
        .ips
        .iter()
        .find_map(|ip| match ip.ip() {
            std::net::IpAddr::V4(v4) => Some(v4),
            std::net::IpAddr::V6(_) => None,
        })
        .ok_or(StartError::HostAddress)
}

fn has_ipv4(interface: &NetworkInterface) -> bool {
    interface.ips.iter().any(|ip| ip.is_ipv4())
}

/// Production capture socket: raw IPv4/UDP, bound to the local address.
pub struct RawCapture {
    socket: Socket,
}

impl RawCapture {
    /// Create, bind and arm the capture socket.
    pub fn open(local_ip: Ipv4Addr, port: u16) -> Result<Self, StartError> {
        let socket = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::UDP))
            .map_err(StartError::Privilege)?;

        socket
            .bind(&SockAddr::from(SocketAddrV4::new(local_ip, port)))
            .map_err(StartError::Bind)?;

        // The receive timeout doubles as the cancellation poll.
        socket
            .set_read_timeout(Some(RECV_POLL_INTERVAL))
            .map_err(StartError::PlatformInit)?;

        debug!("capture socket bound to {local_ip}:{port}");
        Ok(Self { socket })
    }
}

impl PacketSource for RawCapture {
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        // SAFETY: `MaybeUninit<u8>` has the same layout as `u8`, and the
        // kernel only ever writes initialized bytes into the buffer.
        let uninit =
            unsafe { &mut *(std::ptr::from_mut::<[u8]>(buf) as *mut [MaybeUninit<u8>]) };
        self.socket.recv(uninit)
    }
}

/// Production egress socket: raw IPv4 with the header-included option.
///
/// Never bound; the destination address on each send is taken from the
/// rewritten header, with the sockaddr port set to 0 and ignored by the
/// kernel.
pub struct RawEgress {
    socket: Socket,
}

impl RawEgress {
    /// Create the egress socket and enable header-included mode.
    pub fn open() -> Result<Self, StartError> {
        let socket = Socket::new(
            Domain::IPV4,
            Type::RAW,
            Some(Protocol::from(libc::IPPROTO_RAW)),
        )
        .map_err(StartError::Privilege)?;

        socket
            .set_header_included(true)
            .map_err(StartError::Privilege)?;

        Ok(Self { socket })
    }
}

impl PacketSink for RawEgress {
    fn send_to(&self, datagram: &[u8], dest: Ipv4Addr) -> io::Result<usize> {
        let addr = SockAddr::from(SocketAddrV4::new(dest, 0));
        self.socket.send_to(datagram, &addr)
    }
}
