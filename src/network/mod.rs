//! Network-related modules: buffer pool, header codec, raw sockets and the
//! rewrite path.

pub mod buffer;
pub mod capture;
pub mod codec;
pub mod rewrite;

pub use buffer::{BufferPool, MAX_DATAGRAM_SIZE, PooledBuffer};
pub use capture::{
    PacketSink, PacketSource, RECV_POLL_INTERVAL, RawCapture, RawEgress, find_interface,
    interface_ipv4,
};
pub use codec::{
    IPPROTO_UDP, IPV4_MIN_HEADER_LEN, UDP_HEADER_LEN, ipv4_checksum, read_u16_be, read_u32_be,
    udpv4_checksum, write_u16_be, write_u32_be,
};
pub use rewrite::{Forwarder, is_relayable_broadcast, rewrite_destination};
