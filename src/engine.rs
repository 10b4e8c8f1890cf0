//! Capture engine orchestration.
//!
//! [`RelayEngine`] owns the raw sockets, the capture task and the receiver
//! set, and exposes the start/stop lifecycle to the control surface. The
//! capture loop itself is blocking I/O run under `spawn_blocking`:
//! receive → broadcast filter → snapshot receivers → rewrite and send one
//! unicast copy per receiver.
//!
//! Lifecycle transitions are serialised and idempotent: `start` while
//! running and `stop` while stopped are no-ops. `stop` waits up to two
//! seconds for the capture task to drain, then abandons it; the task
//! releases its sockets when it exits.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use metrics::counter;
use tokio::task::{self, JoinHandle};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::network::{
    BufferPool, Forwarder, MAX_DATAGRAM_SIZE, PacketSink, PacketSource, RawCapture, RawEgress,
    find_interface, interface_ipv4, is_relayable_broadcast,
};
use crate::receivers::ReceiverSet;

/// How long `stop` waits for the capture task before abandoning it.
const STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Configuration for the relay engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Interface to capture on. If `None`, auto-detect.
    pub interface: Option<String>,
    /// Local port the capture socket binds to. Arbitrary: the raw socket
    /// receives every UDP datagram on the interface regardless of port.
    pub capture_port: u16,
    /// Number of pre-allocated capture/rewrite buffers.
    pub buffer_pool_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            interface: None,
            capture_port: 6000,
            buffer_pool_size: 8,
        }
    }
}

/// A running capture task: its cancellation flag and join handle.
struct CaptureTask {
    alive: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// The broadcast relay engine.
///
/// Constructed stopped with an empty receiver set. Receivers may be added
/// and removed at any time, including while capture is live; the capture
/// path works against per-packet snapshots.
pub struct RelayEngine {
    config: EngineConfig,
    receivers: ReceiverSet,
    pool: BufferPool,
    lifecycle: tokio::sync::Mutex<Option<CaptureTask>>,
    running: AtomicBool,
}

impl RelayEngine {
    /// Create an engine with default configuration.
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// Create an engine with the given configuration.
    pub fn with_config(config: EngineConfig) -> Self {
        let pool = BufferPool::new(config.buffer_pool_size);
        Self {
            config,
            receivers: ReceiverSet::new(),
            pool,
            lifecycle: tokio::sync::Mutex::new(None),
            running: AtomicBool::new(false),
        }
    }

    /// Start capturing, opening both raw sockets.
    ///
    /// No-op if already running. On failure every resource acquired so far
    /// is released before the error is returned.
    pub async fn start(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.is_some() {
            return Ok(());
        }

        let interface = find_interface(self.config.interface.as_deref())?;
        let local_ip = interface_ipv4(&interface)?;
        info!("capturing on {} ({local_ip})", interface.name);

        let source = RawCapture::open(local_ip, self.config.capture_port)?;
        let sink = RawEgress::open()?;

        *lifecycle = Some(self.spawn_capture(source, sink));
        Ok(())
    }

    /// Start capturing with injected capture and egress implementations.
    ///
    /// Same lifecycle as [`start`](Self::start); this is the seam tests and
    /// custom backends use.
    pub async fn start_with<Src, Snk>(&self, source: Src, sink: Snk) -> Result<()>
    where
        Src: PacketSource + 'static,
        Snk: PacketSink + 'static,
    {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.is_some() {
            return Ok(());
        }

        *lifecycle = Some(self.spawn_capture(source, sink));
        Ok(())
    }

    fn spawn_capture<Src, Snk>(&self, source: Src, sink: Snk) -> CaptureTask
    where
        Src: PacketSource + 'static,
        Snk: PacketSink + 'static,
    {
        let alive = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&alive);
        let forwarder = Forwarder::new(sink, self.pool.clone());
        let receivers = self.receivers.clone();
        let pool = self.pool.clone();

        self.running.store(true, Ordering::SeqCst);
        let handle =
            task::spawn_blocking(move || capture_loop(source, &forwarder, &receivers, &pool, &flag));

        CaptureTask { alive, handle }
    }

    /// Stop capturing. Never fails observably; no-op if already stopped.
    pub async fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        let Some(task) = lifecycle.take() else {
            return;
        };

        self.running.store(false, Ordering::SeqCst);
        task.alive.store(false, Ordering::SeqCst);

        match tokio::time::timeout(STOP_TIMEOUT, task.handle).await {
            Ok(_) => debug!("capture task stopped"),
            Err(_) => warn!("capture task did not stop within {STOP_TIMEOUT:?}, abandoning it"),
        }
    }

    /// Add a receiver by dotted-quad address. Returns `true` iff it parsed.
    pub fn add_receiver(&self, addr: &str) -> bool {
        self.receivers.add(addr)
    }

    /// Remove a receiver by dotted-quad address.
    pub fn remove_receiver(&self, addr: &str) {
        self.receivers.remove(addr);
    }

    /// Remove all receivers.
    pub fn clear_receivers(&self) {
        self.receivers.clear();
    }

    /// Dotted-quad snapshot of the current receivers.
    pub fn list_receivers(&self) -> Vec<String> {
        self.receivers.list()
    }

    /// Whether the engine is currently running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop if needed and release everything, including the receiver set.
    ///
    /// Idempotent; the engine can be started again afterwards.
    pub async fn shutdown(&self) {
        self.stop().await;
        self.receivers.clear();
    }
}

impl Default for RelayEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// The capture loop: runs on a blocking task until cancelled or the capture
/// socket closes.
fn capture_loop<Src, Snk>(
    mut source: Src,
    forwarder: &Forwarder<Snk>,
    receivers: &ReceiverSet,
    pool: &BufferPool,
    alive: &AtomicBool,
) where
    Src: PacketSource,
    Snk: PacketSink,
{
    while alive.load(Ordering::SeqCst) {
        let mut buffer = pool.get_zeroed(MAX_DATAGRAM_SIZE);

        let len = match source.recv(buffer.as_mut_slice()) {
            Ok(0) => continue,
            Ok(len) => len,
            // Nothing yet; re-arm and check the cancellation flag.
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                continue;
            }
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::Interrupted
                        | io::ErrorKind::ConnectionAborted
                        | io::ErrorKind::NotConnected
                        | io::ErrorKind::UnexpectedEof
                ) =>
            {
                debug!("capture socket closed: {e}");
                break;
            }
            Err(e) => {
                warn!("receive failed: {e}");
                counter!("relay.datagrams", "outcome" => "recv_error").increment(1);
                continue;
            }
        };

        let datagram = &buffer.as_slice()[..len];
        if !is_relayable_broadcast(datagram) {
            counter!("relay.datagrams", "outcome" => "ignored").increment(1);
            continue;
        }

        counter!("relay.datagrams", "outcome" => "captured").increment(1);

        // Snapshot under the lock, forward without it.
        for receiver in receivers.snapshot() {
            match forwarder.forward(datagram, receiver) {
                Ok(()) => {
                    counter!("relay.datagrams", "outcome" => "forwarded").increment(1);
                }
                Err(e) => {
                    warn!("failed to relay to {receiver}: {e}");
                    counter!("relay.datagrams", "outcome" => "error").increment(1);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::capture::tests::{RecordingSink, ScriptedSource};
    use crate::network::{IPV4_MIN_HEADER_LEN, UDP_HEADER_LEN, ipv4_checksum, write_u16_be};
    use std::collections::VecDeque;
    use std::net::Ipv4Addr;

    fn udp_datagram(proto: u8, daddr: Ipv4Addr, payload: &[u8]) -> Vec<u8> {
        let udp_len = UDP_HEADER_LEN + payload.len();
        let total = IPV4_MIN_HEADER_LEN + udp_len;
        let mut datagram = vec![0u8; total];

        datagram[0] = 0x45;
        write_u16_be(&mut datagram, 2, total as u16);
        datagram[8] = 64;
        datagram[9] = proto;
        datagram[12..16].copy_from_slice(&Ipv4Addr::new(192, 168, 1, 10).octets());
        datagram[16..20].copy_from_slice(&daddr.octets());
        write_u16_be(&mut datagram, 20, 5000);
        write_u16_be(&mut datagram, 22, 6000);
        write_u16_be(&mut datagram, 24, udp_len as u16);
        datagram[28..].copy_from_slice(payload);
        datagram
    }

    fn broadcast(payload: &[u8]) -> Vec<u8> {
        udp_datagram(17, Ipv4Addr::BROADCAST, payload)
    }

    fn run_loop(datagrams: Vec<Vec<u8>>, receivers: &ReceiverSet, sink: &RecordingSink) {
        let source = ScriptedSource::new(datagrams);
        let pool = BufferPool::new(4);
        let forwarder = Forwarder::new(sink.clone(), pool.clone());
        let alive = AtomicBool::new(true);
        capture_loop(source, &forwarder, receivers, &pool, &alive);
    }

    #[test]
    fn should_fan_out_one_copy_per_receiver() {
        let receivers = ReceiverSet::new();
        receivers.add("10.0.0.2");
        receivers.add("10.0.0.3");
        let sink = RecordingSink::new();

        run_loop(
            vec![broadcast(&[0xDE, 0xAD, 0xBE, 0xEF])],
            &receivers,
            &sink,
        );

        assert_eq!(sink.sent_count(), 2);
        for peer in [Ipv4Addr::new(10, 0, 0, 2), Ipv4Addr::new(10, 0, 0, 3)] {
            let copies = sink.sent_to(peer);
            assert_eq!(copies.len(), 1, "expected one copy for {peer}");

            let emitted = &copies[0];
            assert_eq!(&emitted[16..20], &peer.octets());
            // Source address and payload ride through untouched, and the
            // emitted IP checksum verifies.
            assert_eq!(&emitted[12..16], &[192, 168, 1, 10]);
            assert_eq!(&emitted[28..], &[0xDE, 0xAD, 0xBE, 0xEF]);
            assert_eq!(ipv4_checksum(&emitted[..IPV4_MIN_HEADER_LEN]), 0);
        }
    }

    #[test]
    fn should_not_relay_non_udp_datagrams() {
        let receivers = ReceiverSet::new();
        receivers.add("10.0.0.2");
        let sink = RecordingSink::new();

        // Same shape, protocol = TCP.
        run_loop(
            vec![udp_datagram(6, Ipv4Addr::BROADCAST, b"x")],
            &receivers,
            &sink,
        );

        assert_eq!(sink.sent_count(), 0);
    }

    #[test]
    fn should_not_relay_unicast_datagrams() {
        let receivers = ReceiverSet::new();
        receivers.add("10.0.0.2");
        let sink = RecordingSink::new();

        run_loop(
            vec![udp_datagram(17, Ipv4Addr::new(192, 168, 1, 20), b"x")],
            &receivers,
            &sink,
        );

        assert_eq!(sink.sent_count(), 0);
    }

    #[test]
    fn should_relay_nothing_when_receiver_set_is_empty() {
        let receivers = ReceiverSet::new();
        let sink = RecordingSink::new();

        run_loop(vec![broadcast(b"hello")], &receivers, &sink);

        assert_eq!(sink.sent_count(), 0);
    }

    #[test]
    fn should_survive_transient_receive_errors() {
        struct FlakySource {
            events: VecDeque<io::Result<Vec<u8>>>,
        }
        impl PacketSource for FlakySource {
            fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                match self.events.pop_front() {
                    Some(Ok(datagram)) => {
                        buf[..datagram.len()].copy_from_slice(&datagram);
                        Ok(datagram.len())
                    }
                    Some(Err(e)) => Err(e),
                    None => Err(io::ErrorKind::ConnectionAborted.into()),
                }
            }
        }

        let receivers = ReceiverSet::new();
        receivers.add("10.0.0.2");
        let sink = RecordingSink::new();

        let source = FlakySource {
            events: VecDeque::from([
                Err(io::ErrorKind::WouldBlock.into()),
                Err(io::ErrorKind::Other.into()),
                Ok(broadcast(b"after errors")),
            ]),
        };
        let pool = BufferPool::new(4);
        let forwarder = Forwarder::new(sink.clone(), pool.clone());
        let alive = AtomicBool::new(true);
        capture_loop(source, &forwarder, &receivers, &pool, &alive);

        assert_eq!(sink.sent_count(), 1);
    }

    #[test]
    fn should_keep_relaying_after_per_receiver_send_failures() {
        struct RejectingSink;
        impl PacketSink for RejectingSink {
            fn send_to(&self, _datagram: &[u8], _dest: Ipv4Addr) -> io::Result<usize> {
                Err(io::ErrorKind::PermissionDenied.into())
            }
        }

        let receivers = ReceiverSet::new();
        receivers.add("10.0.0.2");
        receivers.add("10.0.0.3");

        let source = ScriptedSource::new(vec![broadcast(b"one"), broadcast(b"two")]);
        let pool = BufferPool::new(4);
        let forwarder = Forwarder::new(RejectingSink, pool.clone());
        let alive = AtomicBool::new(true);

        // Must drain both packets without panicking or exiting early, and
        // every buffer must come home.
        capture_loop(source, &forwarder, &receivers, &pool, &alive);
        assert_eq!(pool.available(), 4);
    }

    #[tokio::test]
    async fn should_make_start_and_stop_idempotent() {
        let engine = RelayEngine::new();
        assert!(!engine.is_running());

        let sink = RecordingSink::new();
        engine
            .start_with(ScriptedSource::new(vec![]), sink.clone())
            .await
            .unwrap();
        assert!(engine.is_running());

        // Second start is a no-op.
        engine
            .start_with(ScriptedSource::new(vec![]), sink.clone())
            .await
            .unwrap();
        assert!(engine.is_running());

        engine.stop().await;
        assert!(!engine.is_running());

        // Second stop is a no-op.
        engine.stop().await;
        assert!(!engine.is_running());
    }

    #[tokio::test]
    async fn should_clear_receivers_on_shutdown() {
        let engine = RelayEngine::new();
        engine.add_receiver("10.0.0.2");
        engine.add_receiver("10.0.0.3");
        assert_eq!(engine.list_receivers().len(), 2);

        engine.shutdown().await;
        assert!(!engine.is_running());
        assert!(engine.list_receivers().is_empty());

        // Shutdown is idempotent.
        engine.shutdown().await;
    }
}
