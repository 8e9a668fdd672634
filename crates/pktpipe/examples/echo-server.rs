//! Echo server: answers every string packet with its upper-cased text.
//!
//! Run with:
//!   cargo run --example echo-server
//!
//! In another terminal:
//!   cargo run --features cli -- --dir /tmp/pktpipe-echo-example \
//!     send echo --text hello --wait

use pktpipe::endpoint::{
    Endpoint, EndpointConfig, EndpointContext, EndpointError, EndpointHandler, Lifetime,
};
use pktpipe::packet::{Packet, StringPacket};
use pktpipe::transport::PipeNamespace;

struct Upper;

impl Upper {
    fn reply(&self, ctx: &EndpointContext, packet: &Packet) {
        let Some(kind) = packet.kind::<StringPacket>() else {
            eprintln!("ignoring packet of type {}", packet.type_id());
            return;
        };
        let reply = Packet::new(StringPacket::new(kind.text.to_uppercase()));
        if let Err(err) = ctx.sender().send(reply) {
            eprintln!("reply failed: {err}");
        }
    }
}

impl EndpointHandler for Upper {
    fn on_connected(&mut self, ctx: &EndpointContext) {
        eprintln!("client connected on {}", ctx.id());
    }

    fn on_disconnected(&mut self, _ctx: &EndpointContext, reason: &EndpointError) {
        eprintln!("client gone: {reason}");
    }

    fn on_packet(&mut self, ctx: &EndpointContext, packet: Packet) {
        self.reply(ctx, &packet);
    }

    fn on_split_reassembled(&mut self, ctx: &EndpointContext, packet: Packet) {
        self.reply(ctx, &packet);
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let namespace = PipeNamespace::new(std::env::temp_dir().join("pktpipe-echo-example"));
    eprintln!("pipes in {}", namespace.dir().display());

    let config = EndpointConfig {
        lifetime: Lifetime::Foreground,
        terminate_on_disconnect: true,
        ..EndpointConfig::default()
    };
    let server = Endpoint::server("echo")
        .with_namespace(namespace)
        .with_config(config)
        .start(Upper)?;

    // Foreground: dropping blocks until the first client has come and gone.
    drop(server);
    Ok(())
}
