use std::fs;
use std::sync::mpsc::{self, Receiver};
use std::time::{Duration, Instant};

use pktpipe_endpoint::{Endpoint, EndpointConfig, EndpointEvent};
use pktpipe_packet::{DataPacket, Packet, StringPacket};
use pktpipe_transport::PipeNamespace;
use tracing::debug;

use crate::cmd::{parse_duration, SendArgs};
use crate::exit::{
    endpoint_error, io_error, packet_error, CliError, CliResult, FAILURE, SUCCESS, TIMEOUT, USAGE,
};
use crate::output::{print_packet, Delivery, OutputFormat};

pub fn run(args: SendArgs, namespace: PipeNamespace, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let packet = build_packet(&args)?;

    let config = EndpointConfig {
        terminate_on_disconnect: true,
        handshake_timeout: timeout,
        ..EndpointConfig::default()
    };
    let (events, inbox) = mpsc::channel();
    let endpoint = Endpoint::client(&args.id)
        .with_namespace(namespace)
        .with_config(config)
        .start(events)
        .map_err(|err| endpoint_error("start failed", err))?;

    let result = exchange(&endpoint, &inbox, packet, &args, timeout, format);
    endpoint.stop();
    endpoint.wait();
    result
}

fn exchange(
    endpoint: &Endpoint,
    inbox: &Receiver<EndpointEvent>,
    packet: Packet,
    args: &SendArgs,
    timeout: Duration,
    format: OutputFormat,
) -> CliResult<i32> {
    let deadline = Instant::now() + timeout;
    loop {
        match next_event(inbox, deadline) {
            Some(EndpointEvent::Connected) => break,
            Some(_) => continue,
            None => {
                return Err(CliError::new(
                    TIMEOUT,
                    format!("no server answered on channel {}", args.id),
                ))
            }
        }
    }

    let queued = match args.split {
        Some(chunk) => endpoint.send_split(packet, chunk),
        None => endpoint.send(packet).map(|()| 1),
    }
    .map_err(|err| endpoint_error("send failed", err))?;
    debug!(queued, "packets queued");

    let deadline = Instant::now() + timeout;
    if args.wait {
        return wait_for_reply(endpoint, inbox, deadline, format);
    }

    while endpoint.queued() > 0 {
        if Instant::now() >= deadline {
            return Err(CliError::new(TIMEOUT, "server did not read the packet in time"));
        }
        if !endpoint.is_connected() {
            return Err(CliError::new(FAILURE, "server disconnected before reading"));
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    Ok(SUCCESS)
}

fn wait_for_reply(
    endpoint: &Endpoint,
    inbox: &Receiver<EndpointEvent>,
    deadline: Instant,
    format: OutputFormat,
) -> CliResult<i32> {
    loop {
        let (packet, delivery) = match next_event(inbox, deadline) {
            Some(EndpointEvent::Packet(packet)) => (packet, Delivery::Whole),
            Some(EndpointEvent::Reassembled(packet)) => (packet, Delivery::Reassembled),
            Some(EndpointEvent::Disconnected(reason)) => {
                return Err(CliError::new(
                    FAILURE,
                    format!("server disconnected before replying: {reason}"),
                ))
            }
            Some(EndpointEvent::Connected) => continue,
            None => return Err(CliError::new(TIMEOUT, "no reply before the timeout")),
        };
        print_packet(&packet, endpoint.id(), delivery, format);
        return Ok(SUCCESS);
    }
}

fn next_event(inbox: &Receiver<EndpointEvent>, deadline: Instant) -> Option<EndpointEvent> {
    inbox
        .recv_timeout(deadline.saturating_duration_since(Instant::now()))
        .ok()
}

fn build_packet(args: &SendArgs) -> CliResult<Packet> {
    if let Some(text) = &args.text {
        return Ok(Packet::new(StringPacket::new(text.as_str())));
    }

    let bytes = if let Some(data) = &args.data {
        data.as_bytes().to_vec()
    } else if let Some(path) = &args.file {
        fs::read(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err))?
    } else {
        return Err(CliError::new(
            USAGE,
            "one of --text, --data or --file is required",
        ));
    };

    let mut packet = Packet::new(DataPacket);
    packet
        .set_payload(bytes)
        .map_err(|err| packet_error("invalid payload", err))?;
    Ok(packet)
}
