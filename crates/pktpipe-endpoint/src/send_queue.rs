//! Single-flight FIFO send queue.
//!
//! Packets from any number of senders go through one channel to a
//! dedicated writer thread:
//!
//! ```text
//! EndpointSender ─┐
//! handler ctx    ─┼─► mpsc::Sender<Packet> ─► writer thread ─► outbound pipe
//! Endpoint       ─┘
//! ```
//!
//! The writer serializes one packet at a time and waits for the peer to
//! read it before moving on. When the queue runs dry it goes back to
//! waiting; packets queued while a drain is in progress are picked up by the
//! same thread, so there is never more than one drain running.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;

use bytes::{Bytes, BytesMut};
use pktpipe_packet::{CodecConfig, Packet, PacketError, PacketWriter};
use pktpipe_transport::IpcStream;
use tracing::{debug, warn};

use crate::config::RunState;
use crate::error::{EndpointError, Result};
use crate::state::Shared;

/// Cloneable handle for queueing packets on an endpoint.
#[derive(Clone)]
pub struct EndpointSender {
    tx: mpsc::Sender<Packet>,
    shared: Arc<Shared>,
}

impl EndpointSender {
    pub(crate) fn new(tx: mpsc::Sender<Packet>, shared: Arc<Shared>) -> Self {
        Self { tx, shared }
    }

    /// Queue one packet. Never blocks.
    ///
    /// Packets queued before the peer connects are written once it does.
    pub fn send(&self, packet: Packet) -> Result<()> {
        if self.shared.cancel.is_cancelled() {
            return Err(EndpointError::NotRunning);
        }

        self.shared.pending.fetch_add(1, Ordering::AcqRel);
        self.tx.send(packet).map_err(|_| {
            self.shared.release_pending(1);
            EndpointError::NotRunning
        })
    }

    /// Queue several packets in order. Returns how many were queued.
    pub fn send_all(&self, packets: impl IntoIterator<Item = Packet>) -> Result<usize> {
        let mut queued = 0;
        for packet in packets {
            self.send(packet)?;
            queued += 1;
        }
        Ok(queued)
    }

    /// Split `packet` into fragments of at most `chunk_size` bytes and queue them.
    ///
    /// Returns the number of packets queued, which is 1 if no split was needed.
    pub fn send_split(&self, packet: Packet, chunk_size: usize) -> Result<usize> {
        let fragments = self.shared.splitter.split(packet, chunk_size)?;
        self.send_all(fragments)
    }

    /// Packets queued but not yet written and drained.
    pub fn queued(&self) -> usize {
        self.shared.pending.load(Ordering::Acquire)
    }

    pub fn state(&self) -> RunState {
        self.shared.state.load()
    }

    /// Ask the endpoint to stop. Returns immediately.
    pub fn stop(&self) {
        self.shared.stop();
    }
}

impl fmt::Debug for EndpointSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointSender")
            .field("id", &self.shared.id)
            .field("queued", &self.queued())
            .finish()
    }
}

/// A queued packet on its way to the wire.
///
/// The writer never hands packets back. `auto_dispose` only decides how long
/// the packet's own buffers stay alive: released as soon as the frame is
/// encoded, or held until the frame has been written and drained.
struct Outbound {
    packet: Option<Packet>,
    frame: Option<Bytes>,
}

impl Outbound {
    fn new(packet: Packet) -> Self {
        Self {
            packet: Some(packet),
            frame: None,
        }
    }

    /// Serialize once; later attempts reuse the same bytes.
    fn frame(&mut self, writer: &PacketWriter<IpcStream>) -> std::result::Result<Bytes, PacketError> {
        if let Some(frame) = &self.frame {
            return Ok(frame.clone());
        }

        let mut buf = BytesMut::new();
        let mut dispose = false;
        if let Some(packet) = self.packet.as_mut() {
            writer.encode(packet, &mut buf)?;
            dispose = packet.auto_dispose();
        }
        if dispose {
            self.packet = None;
        }

        let frame = buf.freeze();
        self.frame = Some(frame.clone());
        Ok(frame)
    }
}

pub(crate) fn spawn_writer(shared: Arc<Shared>, rx: Receiver<Packet>) -> Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name(format!("pktpipe-{}-{}-tx", shared.role, shared.id))
        .spawn(move || run_writer(&shared, rx))
        .map_err(EndpointError::Spawn)
}

fn run_writer(shared: &Shared, rx: Receiver<Packet>) {
    let codec = CodecConfig {
        max_payload_size: shared.config.max_payload_size,
        ..CodecConfig::default()
    };
    let mut backlog: VecDeque<Outbound> = VecDeque::new();
    let mut link: Option<(u64, PacketWriter<IpcStream>)> = None;
    let mut failed_generation = 0u64;

    loop {
        if shared.cancel.is_cancelled() {
            break;
        }

        if backlog.is_empty() {
            match rx.recv_timeout(shared.config.poll_interval) {
                Ok(packet) => backlog.push_back(Outbound::new(packet)),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        while let Ok(packet) = rx.try_recv() {
            backlog.push_back(Outbound::new(packet));
        }

        let stale = match &link {
            Some((generation, _)) => !shared.is_current_link(*generation),
            None => true,
        };
        if stale {
            let Some((generation, stream)) = shared.wait_for_link(failed_generation) else {
                break;
            };
            link = Some((generation, PacketWriter::with_config(stream, codec.clone())));
        }
        let Some((generation, writer)) = link.as_mut() else {
            continue;
        };

        if let Err(err) = drain(shared, writer, &mut backlog) {
            if shared.cancel.is_cancelled() {
                break;
            }
            warn!(id = %shared.id, %err, queued = backlog.len(), "write failed, holding packets for the next connection");
            failed_generation = *generation;
            link = None;
        }
    }

    let dropped = backlog.len() + rx.try_iter().count();
    if dropped > 0 {
        debug!(id = %shared.id, dropped, "send queue discarded on shutdown");
    }
    shared.pending.store(0, Ordering::Release);
}

/// Write the backlog front to back, waiting for the peer after each packet.
///
/// A frame that fails to write stays at the front for the next connection.
fn drain(
    shared: &Shared,
    writer: &mut PacketWriter<IpcStream>,
    backlog: &mut VecDeque<Outbound>,
) -> std::result::Result<(), PacketError> {
    while let Some(item) = backlog.front_mut() {
        let frame = match item.frame(writer) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(id = %shared.id, %err, "dropping packet that cannot be encoded");
                backlog.pop_front();
                shared.release_pending(1);
                continue;
            }
        };

        writer.write_frame(&frame)?;
        let drained = writer
            .get_mut()
            .wait_for_peer_drain(&shared.cancel, shared.config.poll_interval);

        backlog.pop_front();
        shared.release_pending(1);

        match drained {
            Ok(()) => {}
            Err(err) if err.is_shutdown() => return Ok(()),
            Err(err) => return Err(PacketError::Io(std::io::Error::other(err))),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Read;
    use std::time::Duration;

    use pktpipe_packet::{DataPacket, PacketReader, PacketRegistry, StringPacket};

    use super::*;
    use crate::config::{EndpointConfig, Role};
    use crate::handshake::PipePair;

    fn setup_with(config: EndpointConfig) -> (Arc<Shared>, EndpointSender, JoinHandle<()>) {
        let shared = Arc::new(Shared::new("q".to_string(), Role::Server, config));
        let (tx, rx) = mpsc::channel();
        let sender = EndpointSender::new(tx, Arc::clone(&shared));
        let writer = spawn_writer(Arc::clone(&shared), rx).unwrap();
        (shared, sender, writer)
    }

    fn setup() -> (Arc<Shared>, EndpointSender, JoinHandle<()>) {
        setup_with(EndpointConfig {
            poll_interval: Duration::from_millis(5),
            ..EndpointConfig::default()
        })
    }

    fn connect(shared: &Shared) -> IpcStream {
        let (outbound, peer) = IpcStream::pair().unwrap();
        let (inbound, _unused) = IpcStream::pair().unwrap();
        shared.publish_link(&PipePair { outbound, inbound }).unwrap();
        peer
    }

    fn text(s: &str) -> Packet {
        Packet::new(StringPacket::new(s))
    }

    fn read_texts(peer: IpcStream, n: usize) -> Vec<String> {
        let mut reader = PacketReader::new(peer, Arc::new(PacketRegistry::with_builtin_kinds()));
        (0..n)
            .map(|_| {
                let packet = reader.read_packet().unwrap();
                packet.kind::<StringPacket>().unwrap().text.clone()
            })
            .collect()
    }

    #[test]
    fn packets_queued_before_connect_are_written_in_order() {
        let (shared, sender, writer) = setup();
        for word in ["a", "b", "c"] {
            sender.send(text(word)).unwrap();
        }
        assert_eq!(sender.queued(), 3);

        let peer = connect(&shared);
        assert_eq!(read_texts(peer, 3), ["a", "b", "c"]);

        shared.stop();
        writer.join().unwrap();
    }

    #[test]
    fn queued_count_falls_as_peer_reads() {
        let (shared, sender, writer) = setup();
        let peer = connect(&shared);

        let mut big = Packet::new(DataPacket);
        big.set_payload(vec![7u8; 512 * 1024]).unwrap();
        sender.send(big).unwrap();
        sender.send(text("after")).unwrap();

        // The first packet cannot drain until someone reads it.
        std::thread::sleep(Duration::from_millis(50));
        assert!(sender.queued() >= 1);

        let mut reader = PacketReader::new(peer, Arc::new(PacketRegistry::with_builtin_kinds()));
        assert_eq!(reader.read_packet().unwrap().payload_len(), 512 * 1024);
        let second = reader.read_packet().unwrap();
        assert_eq!(second.kind::<StringPacket>().unwrap().text, "after");

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while sender.queued() > 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(sender.queued(), 0);

        shared.stop();
        writer.join().unwrap();
    }

    #[test]
    fn send_split_queues_every_fragment() {
        let (shared, sender, writer) = setup();
        let queued = sender.send_split(text("abcdefghij"), 3).unwrap();
        assert_eq!(queued, 4);

        let peer = connect(&shared);
        let mut reader = PacketReader::new(peer, Arc::new(PacketRegistry::with_builtin_kinds()));
        for index in 0..4u8 {
            let fragment = reader.read_packet().unwrap();
            assert_eq!(fragment.fragment_position(), Some((index, 3)));
        }

        shared.stop();
        writer.join().unwrap();
    }

    #[test]
    fn unencodable_packet_is_dropped_and_queue_moves_on() {
        let (shared, sender, writer) = setup_with(EndpointConfig {
            max_payload_size: 8,
            poll_interval: Duration::from_millis(5),
            ..EndpointConfig::default()
        });
        let mut huge = Packet::new(DataPacket);
        huge.set_payload(vec![0u8; 32]).unwrap();

        sender.send(huge).unwrap();
        sender.send(text("ok")).unwrap();
        let peer = connect(&shared);
        assert_eq!(read_texts(peer, 1), ["ok"]);

        shared.stop();
        writer.join().unwrap();
    }

    #[test]
    fn broken_link_keeps_frame_for_next_connection() {
        let (shared, sender, writer) = setup();
        let first_peer = connect(&shared);
        drop(first_peer);
        // Let the writer notice nothing yet: nothing is queued.
        std::thread::sleep(Duration::from_millis(20));

        sender.send(text("survivor")).unwrap();
        std::thread::sleep(Duration::from_millis(50));

        let peer = connect(&shared);
        assert_eq!(read_texts(peer, 1), ["survivor"]);

        shared.stop();
        writer.join().unwrap();
    }

    #[test]
    fn send_after_stop_is_rejected() {
        let (shared, sender, writer) = setup();
        shared.stop();
        assert!(matches!(sender.send(text("late")), Err(EndpointError::NotRunning)));
        writer.join().unwrap();
        assert_eq!(sender.queued(), 0);
    }

    #[test]
    fn stop_interrupts_drain_wait() {
        let (shared, sender, writer) = setup();
        let mut peer = connect(&shared);

        let mut big = Packet::new(DataPacket);
        big.set_payload(vec![1u8; 64 * 1024]).unwrap();
        sender.send(big).unwrap();
        std::thread::sleep(Duration::from_millis(30));

        shared.stop();
        writer.join().unwrap();

        let mut first = [0u8; 1];
        peer.read_exact(&mut first).unwrap();
        assert_eq!(first[0], pktpipe_packet::MAGIC);
    }

    #[test]
    fn send_without_writer_leaves_count_at_zero() {
        let shared = Arc::new(Shared::new("q".to_string(), Role::Server, EndpointConfig::default()));
        let (tx, rx) = mpsc::channel();
        drop(rx);
        let sender = EndpointSender::new(tx, Arc::clone(&shared));

        assert!(matches!(sender.send(text("lost")), Err(EndpointError::NotRunning)));
        assert_eq!(sender.queued(), 0);
    }

    #[test]
    fn auto_dispose_controls_packet_lifetime_during_write() {
        let (stream, _peer) = IpcStream::pair().unwrap();
        let writer = PacketWriter::new(stream);

        let mut released = Outbound::new(text("gone"));
        released.frame(&writer).unwrap();
        assert!(released.packet.is_none());

        let mut packet = text("held");
        packet.set_auto_dispose(false);
        let mut held = Outbound::new(packet);
        let frame = held.frame(&writer).unwrap();
        assert!(held.packet.is_some());
        assert_eq!(held.frame(&writer).unwrap(), frame, "encoded only once");
    }
}
