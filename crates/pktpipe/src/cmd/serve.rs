use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use pktpipe_endpoint::{Endpoint, EndpointConfig, EndpointEvent, EndpointSender};
use pktpipe_packet::{Packet, PacketRegistry};
use pktpipe_transport::PipeNamespace;
use tracing::{debug, info, warn};

use crate::cmd::ServeArgs;
use crate::exit::{endpoint_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::{print_packet, Delivery, OutputFormat};

const ECHO_FLUSH_LIMIT: Duration = Duration::from_secs(5);

pub fn run(args: ServeArgs, namespace: PipeNamespace, format: OutputFormat) -> CliResult<i32> {
    let registry = Arc::new(PacketRegistry::with_builtin_kinds());
    let config = EndpointConfig {
        terminate_on_disconnect: args.terminate_on_disconnect,
        auto_handle_split_packets: !args.raw_fragments,
        ..EndpointConfig::default()
    };

    let (events, inbox) = mpsc::channel();
    let endpoint = Endpoint::server(&args.id)
        .with_namespace(namespace)
        .with_registry(Arc::clone(&registry))
        .with_config(config)
        .start(events)
        .map_err(|err| endpoint_error("start failed", err))?;
    install_ctrlc_handler(endpoint.sender())?;
    info!(id = endpoint.id(), "serving");

    let mut printed = 0usize;
    for event in inbox {
        let (packet, delivery) = match event {
            EndpointEvent::Connected | EndpointEvent::Disconnected(_) => continue,
            EndpointEvent::Packet(packet) if packet.is_split() => (packet, Delivery::Fragment),
            EndpointEvent::Packet(packet) => (packet, Delivery::Whole),
            EndpointEvent::Reassembled(packet) => (packet, Delivery::Reassembled),
        };

        print_packet(&packet, endpoint.id(), delivery, format);

        if args.echo {
            if delivery == Delivery::Fragment {
                debug!("not echoing raw fragment");
            } else {
                match echo_of(&registry, &packet) {
                    Ok(reply) => endpoint
                        .send(reply)
                        .map_err(|err| endpoint_error("echo failed", err))?,
                    Err(err) => warn!(%err, type_id = packet.type_id(), "cannot echo packet"),
                }
            }
        }

        printed = printed.saturating_add(1);
        if args.count.is_some_and(|count| printed >= count) {
            break;
        }
    }

    let deadline = Instant::now() + ECHO_FLUSH_LIMIT;
    while endpoint.queued() > 0 && endpoint.is_connected() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    endpoint.stop();
    endpoint.wait();
    Ok(SUCCESS)
}

/// A fresh packet of the same kind carrying the same payload and metadata.
fn echo_of(registry: &PacketRegistry, packet: &Packet) -> pktpipe_packet::Result<Packet> {
    let mut reply = registry.create(packet.type_id())?;
    reply.set_version(packet.version());
    reply.set_metadata(0, packet.metadata())?;
    reply.set_payload(packet.payload().clone())?;
    reply.populate()?;
    Ok(reply)
}

fn install_ctrlc_handler(sender: EndpointSender) -> CliResult<()> {
    ctrlc::set_handler(move || sender.stop())
        .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
