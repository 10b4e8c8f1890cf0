//! Broadcast filtering and per-receiver header rewrite.
//!
//! A captured broadcast is relayed by copying it, swapping the destination
//! address for the receiver's and recomputing both checksums. Everything
//! else in the datagram (source address, identification, TTL, ports, UDP
//! length, payload) is preserved verbatim, so to the game on the far side
//! the copy looks like the original sender unicast it.

// A UDP length never exceeds the 16-bit IP total length it sits inside, so
// these casts from usize to u16 are safe and will never truncate.
#![allow(clippy::cast_possible_truncation)]

use std::net::Ipv4Addr;

use parking_lot::Mutex;
use tracing::trace;

use super::buffer::BufferPool;
use super::capture::PacketSink;
use super::codec::{
    self, IPPROTO_UDP, IPV4_MIN_HEADER_LEN, UDP_HEADER_LEN, read_u16_be, write_u16_be,
};
use crate::error::NetworkError;

/// Byte offset of the protocol field in an IPv4 header.
const IPV4_PROTOCOL_OFFSET: usize = 9;
/// Byte offset of the header checksum in an IPv4 header.
const IPV4_CHECKSUM_OFFSET: usize = 10;
/// Byte range of the source address in an IPv4 header.
const IPV4_SADDR_RANGE: std::ops::Range<usize> = 12..16;
/// Byte range of the destination address in an IPv4 header.
const IPV4_DADDR_RANGE: std::ops::Range<usize> = 16..20;

/// True when `datagram` is a UDP datagram addressed to the limited
/// broadcast address `255.255.255.255`.
///
/// Only the limited broadcast qualifies; subnet-directed broadcasts
/// (`x.y.z.255`) are not relayed. Game discovery uses the limited broadcast.
#[must_use]
pub fn is_relayable_broadcast(datagram: &[u8]) -> bool {
    datagram.len() >= IPV4_MIN_HEADER_LEN
        && datagram[IPV4_PROTOCOL_OFFSET] == IPPROTO_UDP
        && datagram[IPV4_DADDR_RANGE] == Ipv4Addr::BROADCAST.octets()
}

/// Rewrite `datagram` in place so it addresses `receiver`.
///
/// Replaces the destination address, then recomputes the IPv4 header
/// checksum (over the header only) and the UDP checksum (pseudo-header +
/// UDP header + payload). Returns an error for datagrams whose header
/// geometry is inconsistent; the caller drops those silently.
pub fn rewrite_destination(datagram: &mut [u8], receiver: Ipv4Addr) -> Result<(), NetworkError> {
    if datagram.len() < IPV4_MIN_HEADER_LEN {
        return Err(NetworkError::MalformedDatagram("shorter than an IPv4 header"));
    }

    let ihl = usize::from(datagram[0] & 0x0F) * 4;
    if ihl < IPV4_MIN_HEADER_LEN || datagram.len() < ihl + UDP_HEADER_LEN {
        return Err(NetworkError::MalformedDatagram("bad IHL"));
    }

    let udp_len = usize::from(read_u16_be(datagram, ihl + 4));
    if udp_len < UDP_HEADER_LEN || ihl + udp_len > datagram.len() {
        return Err(NetworkError::MalformedDatagram("bad UDP length"));
    }

    datagram[IPV4_DADDR_RANGE].copy_from_slice(&receiver.octets());

    write_u16_be(datagram, IPV4_CHECKSUM_OFFSET, 0);
    let ip_sum = codec::ipv4_checksum(&datagram[..ihl]);
    write_u16_be(datagram, IPV4_CHECKSUM_OFFSET, ip_sum);

    let saddr = Ipv4Addr::from(codec::read_u32_be(datagram, IPV4_SADDR_RANGE.start));

    write_u16_be(datagram, ihl + 6, 0);
    let udp_sum = codec::udpv4_checksum(
        saddr,
        receiver,
        &datagram[ihl..ihl + UDP_HEADER_LEN],
        udp_len as u16,
        &datagram[ihl + UDP_HEADER_LEN..ihl + udp_len],
    );
    write_u16_be(datagram, ihl + 6, udp_sum);

    Ok(())
}

/// Rewrites captured broadcasts and pushes them out the egress sink.
///
/// Owns the send mutex: the egress socket is shared state and all writes on
/// it are serialised, one `send_to` per critical section.
pub struct Forwarder<S> {
    sink: S,
    pool: BufferPool,
    send_lock: Mutex<()>,
}

impl<S: PacketSink> Forwarder<S> {
    /// Create a forwarder around an egress sink.
    pub const fn new(sink: S, pool: BufferPool) -> Self {
        Self {
            sink,
            pool,
            send_lock: Mutex::new(()),
        }
    }

    /// Send one rewritten copy of `datagram` to `receiver`.
    ///
    /// The captured bytes are copied into a pooled buffer, rewritten there
    /// and transmitted. The buffer goes back to the pool on every path,
    /// including rewrite and send failures.
    pub fn forward(&self, datagram: &[u8], receiver: Ipv4Addr) -> Result<(), NetworkError> {
        let mut copy = self.pool.get_zeroed(datagram.len());
        copy.as_mut_slice().copy_from_slice(datagram);

        rewrite_destination(copy.as_mut_slice(), receiver)?;

        let _guard = self.send_lock.lock();
        self.sink
            .send_to(copy.as_slice(), receiver)
            .map_err(NetworkError::SendFailed)?;

        trace!("relayed {} bytes to {receiver}", datagram.len());
        Ok(())
    }
}
