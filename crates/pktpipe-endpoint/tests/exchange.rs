#![cfg(unix)]

use std::path::PathBuf;
use std::sync::mpsc::{channel, Receiver};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use pktpipe_endpoint::{
    Endpoint, EndpointConfig, EndpointError, EndpointEvent, Lifetime, RunState,
};
use pktpipe_packet::{
    split_packet, DataPacket, IntPacket, Packet, PacketKind, StringPacket, Version,
};
use pktpipe_transport::{PipeNamespace, TransportError};

const WAIT: Duration = Duration::from_secs(10);

struct Scratch(PathBuf);

impl Scratch {
    fn new(tag: &str) -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        Self(PathBuf::from(format!(
            "/tmp/pktp-{tag}-{}-{nanos}",
            std::process::id()
        )))
    }

    fn namespace(&self) -> PipeNamespace {
        PipeNamespace::new(&self.0)
    }
}

impl Drop for Scratch {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.0);
    }
}

fn fast() -> EndpointConfig {
    EndpointConfig {
        reconnect_delay: Duration::from_millis(50),
        handshake_timeout: Duration::from_secs(2),
        poll_interval: Duration::from_millis(5),
        ..EndpointConfig::default()
    }
}

fn start(
    builder: pktpipe_endpoint::EndpointBuilder,
    scratch: &Scratch,
    config: EndpointConfig,
) -> (Endpoint, Receiver<EndpointEvent>) {
    let (tx, rx) = channel();
    let endpoint = builder
        .with_namespace(scratch.namespace())
        .with_config(config)
        .start(tx)
        .unwrap();
    (endpoint, rx)
}

fn next(rx: &Receiver<EndpointEvent>) -> EndpointEvent {
    rx.recv_timeout(WAIT).expect("timed out waiting for endpoint event")
}

fn expect_connected(rx: &Receiver<EndpointEvent>) {
    match next(rx) {
        EndpointEvent::Connected => {}
        other => panic!("expected Connected, got {other:?}"),
    }
}

fn expect_packet(rx: &Receiver<EndpointEvent>) -> Packet {
    match next(rx) {
        EndpointEvent::Packet(packet) => packet,
        other => panic!("expected Packet, got {other:?}"),
    }
}

fn expect_reassembled(rx: &Receiver<EndpointEvent>) -> Packet {
    match next(rx) {
        EndpointEvent::Reassembled(packet) => packet,
        other => panic!("expected Reassembled, got {other:?}"),
    }
}

fn expect_disconnected(rx: &Receiver<EndpointEvent>) -> String {
    match next(rx) {
        EndpointEvent::Disconnected(reason) => reason,
        other => panic!("expected Disconnected, got {other:?}"),
    }
}

fn connected_pair(
    tag: &str,
    scratch: &Scratch,
    server_config: EndpointConfig,
) -> (Endpoint, Receiver<EndpointEvent>, Endpoint, Receiver<EndpointEvent>) {
    let (server, server_rx) = start(Endpoint::server(tag), scratch, server_config);
    let (client, client_rx) = start(Endpoint::client(tag), scratch, fast());
    expect_connected(&server_rx);
    expect_connected(&client_rx);
    (server, server_rx, client, client_rx)
}

fn text_of(packet: &Packet) -> String {
    packet.kind::<StringPacket>().unwrap().text.clone()
}

/// A kind only the sending side knows about.
#[derive(Debug, Default)]
struct Unregistered;

impl PacketKind for Unregistered {
    const TYPE_ID: i32 = 300;
}

fn wait_for_state(endpoint: &Endpoint, state: RunState) {
    let deadline = Instant::now() + WAIT;
    while endpoint.state() != state {
        assert!(Instant::now() < deadline, "endpoint never reached {state}");
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn packets_flow_both_ways() {
    let scratch = Scratch::new("both");
    let (server, server_rx) = start(Endpoint::server("duplex"), &scratch, fast());
    let (client, client_rx) = start(Endpoint::client("duplex"), &scratch, fast());
    expect_connected(&server_rx);
    expect_connected(&client_rx);
    assert!(server.is_connected());

    server.send(Packet::new(StringPacket::new("ping"))).unwrap();
    let packet = expect_packet(&client_rx);
    assert_eq!(packet.kind::<StringPacket>().unwrap().text, "ping");

    client.send(Packet::new(IntPacket::new(42))).unwrap();
    let packet = expect_packet(&server_rx);
    assert_eq!(packet.kind::<IntPacket>().unwrap().value, 42);
}

#[test]
fn packets_sent_before_connect_are_delivered() {
    let scratch = Scratch::new("early");
    let (server, _server_rx) = start(Endpoint::server("early"), &scratch, fast());
    for word in ["one", "two", "three"] {
        server.send(Packet::new(StringPacket::new(word))).unwrap();
    }

    let (_client, client_rx) = start(Endpoint::client("early"), &scratch, fast());
    expect_connected(&client_rx);
    let texts: Vec<String> = (0..3)
        .map(|_| expect_packet(&client_rx).kind::<StringPacket>().unwrap().text.clone())
        .collect();
    assert_eq!(texts, ["one", "two", "three"]);
}

#[test]
fn split_send_arrives_reassembled() {
    let scratch = Scratch::new("split");
    let (server, server_rx) = start(Endpoint::server("split"), &scratch, fast());
    let (client, client_rx) = start(Endpoint::client("split"), &scratch, fast());
    expect_connected(&server_rx);
    expect_connected(&client_rx);

    let text: String = (0..1000).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
    let queued = client
        .send_split(Packet::new(StringPacket::new(text.clone())), 64)
        .unwrap();
    assert_eq!(queued, 16);

    let packet = expect_reassembled(&server_rx);
    assert!(!packet.is_split());
    assert_eq!(packet.kind::<StringPacket>().unwrap().text, text);
    drop(server);
}

#[test]
fn unrelated_packet_between_fragments_is_delivered_first() {
    let scratch = Scratch::new("interleave");
    let (_server, server_rx) = start(Endpoint::server("mix"), &scratch, fast());
    let (client, client_rx) = start(Endpoint::client("mix"), &scratch, fast());
    expect_connected(&server_rx);
    expect_connected(&client_rx);

    let mut fragments =
        split_packet(Packet::new(StringPacket::new("abcdefghijkl")), 4, 9).unwrap();
    assert_eq!(fragments.len(), 3);
    client.send(fragments.remove(0)).unwrap();
    client.send(Packet::new(IntPacket::new(7))).unwrap();
    client.send_all(fragments).unwrap();

    let interleaved = expect_packet(&server_rx);
    assert_eq!(interleaved.kind::<IntPacket>().unwrap().value, 7);
    let whole = expect_reassembled(&server_rx);
    assert_eq!(whole.kind::<StringPacket>().unwrap().text, "abcdefghijkl");
}

#[test]
fn raw_fragments_when_split_handling_is_off() {
    let scratch = Scratch::new("raw");
    let config = EndpointConfig {
        auto_handle_split_packets: false,
        ..fast()
    };
    let (_server, server_rx) = start(Endpoint::server("raw"), &scratch, config);
    let (client, client_rx) = start(Endpoint::client("raw"), &scratch, fast());
    expect_connected(&server_rx);
    expect_connected(&client_rx);

    client
        .send_split(Packet::new(StringPacket::new("abcdef")), 2)
        .unwrap();
    for (index, expected) in ["ab", "cd", "ef"].iter().enumerate() {
        let fragment = expect_packet(&server_rx);
        assert!(fragment.is_split());
        assert_eq!(fragment.fragment_position(), Some((index as u8, 2)));
        assert_eq!(fragment.kind::<StringPacket>().unwrap().text, *expected);
    }
}

#[test]
fn oversized_split_group_is_dropped() {
    let scratch = Scratch::new("oversized");
    let config = EndpointConfig {
        max_payload_size: 16,
        ..fast()
    };
    let (_server, server_rx, client, _client_rx) = connected_pair("big", &scratch, config);

    let queued = client
        .send_split(Packet::new(StringPacket::new("x".repeat(4000))), 16)
        .unwrap();
    assert_eq!(queued, 250);
    client.send(Packet::new(StringPacket::new("after"))).unwrap();

    let packet = expect_packet(&server_rx);
    assert!(!packet.is_split());
    assert_eq!(text_of(&packet), "after");
    assert!(server_rx.try_recv().is_err(), "no reassembled packet");
}

#[test]
fn unknown_type_is_skipped_and_stream_continues() {
    let scratch = Scratch::new("unknown");
    let (_server, server_rx, client, _client_rx) = connected_pair("unknown", &scratch, fast());

    // Payload full of magic bytes: the reader must skip by length, not rescan.
    let mut stranger = Packet::new(Unregistered);
    stranger.set_payload(vec![0x69u8; 64]).unwrap();
    client.send(stranger).unwrap();
    client.send(Packet::new(StringPacket::new("after-unknown"))).unwrap();

    let packet = expect_packet(&server_rx);
    assert_eq!(text_of(&packet), "after-unknown");
    assert!(client.is_connected());
}

#[test]
fn old_version_frame_drops_connection() {
    let scratch = Scratch::new("old-version");
    let (_server, server_rx, client, client_rx) = connected_pair("old", &scratch, fast());

    let mut stale = Packet::new(DataPacket);
    stale.set_version(Version::new(1, 0, 5));
    stale.set_payload(&b"legacy"[..]).unwrap();
    client.send(stale).unwrap();

    let reason = expect_disconnected(&server_rx);
    assert!(reason.contains("1.0.5"), "unexpected reason: {reason}");
    expect_disconnected(&client_rx);

    // Both sides come back and the fresh connection is usable.
    expect_connected(&server_rx);
    expect_connected(&client_rx);
    client.send(Packet::new(StringPacket::new("fresh"))).unwrap();
    assert_eq!(text_of(&expect_packet(&server_rx)), "fresh");
}

#[test]
fn concurrent_senders_keep_their_own_order() {
    const THREADS: i32 = 8;
    const PER_THREAD: i32 = 50;

    let scratch = Scratch::new("concurrent");
    let (_server, server_rx, client, _client_rx) = connected_pair("many", &scratch, fast());

    let workers: Vec<_> = (0..THREADS)
        .map(|thread| {
            let sender = client.sender();
            std::thread::spawn(move || {
                for seq in 0..PER_THREAD {
                    sender
                        .send(Packet::new(IntPacket::new(thread * 1000 + seq)))
                        .unwrap();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let mut seen = vec![Vec::new(); THREADS as usize];
    for _ in 0..THREADS * PER_THREAD {
        let value = expect_packet(&server_rx).kind::<IntPacket>().unwrap().value;
        seen[(value / 1000) as usize].push(value % 1000);
    }
    let expected: Vec<i32> = (0..PER_THREAD).collect();
    for sequence in seen {
        assert_eq!(sequence, expected);
    }
}

#[test]
fn client_reconnects_to_restarted_server() {
    let scratch = Scratch::new("reconnect");
    let (first, first_rx) = start(Endpoint::server("again"), &scratch, fast());
    let (client, client_rx) = start(Endpoint::client("again"), &scratch, fast());
    expect_connected(&first_rx);
    expect_connected(&client_rx);

    first.stop();
    first.wait();
    match next(&client_rx) {
        EndpointEvent::Disconnected(_) => {}
        other => panic!("expected Disconnected, got {other:?}"),
    }

    let (second, second_rx) = start(Endpoint::server("again"), &scratch, fast());
    expect_connected(&second_rx);
    expect_connected(&client_rx);

    client.send(Packet::new(StringPacket::new("back"))).unwrap();
    let packet = expect_packet(&second_rx);
    assert_eq!(packet.kind::<StringPacket>().unwrap().text, "back");
    drop(second);
}

#[test]
fn server_accepts_restarted_client() {
    let scratch = Scratch::new("client-restart");
    let (server, server_rx) = start(Endpoint::server("restart"), &scratch, fast());
    let (first, first_rx) = start(Endpoint::client("restart"), &scratch, fast());
    expect_connected(&server_rx);
    expect_connected(&first_rx);

    first.stop();
    first.wait();
    match next(&server_rx) {
        EndpointEvent::Disconnected(_) => {}
        other => panic!("expected Disconnected, got {other:?}"),
    }

    let (_second, second_rx) = start(Endpoint::client("restart"), &scratch, fast());
    expect_connected(&server_rx);
    expect_connected(&second_rx);

    server.send(Packet::new(IntPacket::new(2))).unwrap();
    let packet = expect_packet(&second_rx);
    assert_eq!(packet.kind::<IntPacket>().unwrap().value, 2);
}

#[test]
fn terminate_on_disconnect_stops_server() {
    let scratch = Scratch::new("terminate");
    let config = EndpointConfig {
        terminate_on_disconnect: true,
        ..fast()
    };
    let (server, server_rx) = start(Endpoint::server("once"), &scratch, config);
    let (client, client_rx) = start(Endpoint::client("once"), &scratch, fast());
    expect_connected(&server_rx);
    expect_connected(&client_rx);

    drop(client);
    wait_for_state(&server, RunState::Stopped);
    assert!(matches!(
        server.send(Packet::new(IntPacket::new(1))),
        Err(EndpointError::NotRunning)
    ));
    server.wait();
}

#[test]
fn stop_before_any_peer_shows_up() {
    let scratch = Scratch::new("lonely");
    let (server, server_rx) = start(Endpoint::server("lonely"), &scratch, fast());
    wait_for_state(&server, RunState::Connecting);

    server.stop();
    server.stop();
    wait_for_state(&server, RunState::Stopped);
    assert!(server_rx.try_recv().is_err(), "never connected, so no events");
    server.wait();
}

#[test]
fn foreground_endpoint_runs_until_peer_leaves() {
    let scratch = Scratch::new("foreground");
    let config = EndpointConfig {
        lifetime: Lifetime::Foreground,
        terminate_on_disconnect: true,
        ..fast()
    };
    let (server, server_rx) = start(Endpoint::server("fg"), &scratch, fast());
    let (client, client_rx) = start(Endpoint::client("fg"), &scratch, config);
    expect_connected(&server_rx);
    expect_connected(&client_rx);

    let sender = client.sender();
    let started = Instant::now();
    let stopper = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(100));
        drop(server);
    });

    drop(client);
    assert!(started.elapsed() >= Duration::from_millis(100));
    assert_eq!(sender.state(), RunState::Stopped);
    stopper.join().unwrap();
}

#[test]
fn random_server_id_is_usable() {
    let scratch = Scratch::new("random");
    let (tx, _rx) = channel::<EndpointEvent>();
    let server = Endpoint::server_with_random_id()
        .with_namespace(scratch.namespace())
        .with_config(fast())
        .start(tx)
        .unwrap();
    assert_eq!(server.id().len(), 32);
    assert!(server.id().chars().all(|c| c.is_ascii_hexdigit()));
}

#[test]
fn invalid_channel_name_is_rejected() {
    let scratch = Scratch::new("badname");
    let err = Endpoint::server("../escape")
        .with_namespace(scratch.namespace())
        .start(())
        .unwrap_err();
    assert!(matches!(
        err,
        EndpointError::Transport(TransportError::InvalidName { .. })
    ));
}
