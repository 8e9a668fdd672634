//! The endpoint engine: connect, read, dispatch, reconnect.

use std::fmt;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;

use pktpipe_packet::{CodecConfig, Packet, PacketError, PacketReader, PacketRegistry, Reassembler};
use pktpipe_transport::{sanitize_pipe_name, PipeNamespace};
use tracing::{debug, info, warn};

use crate::config::{EndpointConfig, Lifetime, Role, RunState};
use crate::error::{EndpointError, Result};
use crate::handler::{EndpointContext, EndpointHandler};
use crate::handshake::{establish, PipePair};
use crate::send_queue::{spawn_writer, EndpointSender};
use crate::state::Shared;

/// Configures an endpoint before it starts.
#[derive(Debug, Clone)]
pub struct EndpointBuilder {
    id: String,
    role: Role,
    namespace: PipeNamespace,
    registry: Option<Arc<PacketRegistry>>,
    config: EndpointConfig,
}

impl EndpointBuilder {
    fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
            namespace: PipeNamespace::default(),
            registry: None,
            config: EndpointConfig::default(),
        }
    }

    /// Directory the pipes are created in.
    pub fn with_namespace(mut self, namespace: PipeNamespace) -> Self {
        self.namespace = namespace;
        self
    }

    /// Packet kinds this endpoint understands. Defaults to the built-in kinds.
    pub fn with_registry(mut self, registry: Arc<PacketRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_config(mut self, config: EndpointConfig) -> Self {
        self.config = config;
        self
    }

    /// Spawn the engine and writer threads.
    ///
    /// Connecting happens in the background; the returned endpoint accepts
    /// packets right away.
    pub fn start(self, handler: impl EndpointHandler) -> Result<Endpoint> {
        let id = sanitize_pipe_name(&self.id)?;
        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(PacketRegistry::with_builtin_kinds()));
        let lifetime = self.config.lifetime;
        let shared = Arc::new(Shared::new(id, self.role, self.config));

        let (tx, rx) = mpsc::channel();
        let sender = EndpointSender::new(tx, Arc::clone(&shared));
        let writer = spawn_writer(Arc::clone(&shared), rx)?;

        let engine = Engine {
            shared: Arc::clone(&shared),
            namespace: self.namespace,
            registry,
            ctx: EndpointContext::new(shared.id.clone(), shared.role, sender.clone()),
            handler: Box::new(handler),
        };
        let engine = std::thread::Builder::new()
            .name(format!("pktpipe-{}-{}", shared.role, shared.id))
            .spawn(move || engine.run())
            .map_err(|err| {
                shared.stop();
                EndpointError::Spawn(err)
            })?;

        info!(id = %shared.id, role = %shared.role, "endpoint started");
        Ok(Endpoint {
            shared,
            sender,
            lifetime,
            engine: Some(engine),
            writer: Some(writer),
        })
    }
}

/// One side of a named packet channel.
///
/// Dropping a [`Lifetime::Background`] endpoint stops it. Dropping a
/// [`Lifetime::Foreground`] endpoint blocks until it stops by itself.
pub struct Endpoint {
    shared: Arc<Shared>,
    sender: EndpointSender,
    lifetime: Lifetime,
    engine: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
}

impl Endpoint {
    /// Builder for the server side of channel `id`.
    pub fn server(id: impl Into<String>) -> EndpointBuilder {
        EndpointBuilder::new(id, Role::Server)
    }

    /// Builder for a server on a freshly generated channel name.
    pub fn server_with_random_id() -> EndpointBuilder {
        EndpointBuilder::new(uuid::Uuid::new_v4().simple().to_string(), Role::Server)
    }

    /// Builder for the client side of channel `id`.
    pub fn client(id: impl Into<String>) -> EndpointBuilder {
        EndpointBuilder::new(id, Role::Client)
    }

    pub fn id(&self) -> &str {
        &self.shared.id
    }

    pub fn role(&self) -> Role {
        self.shared.role
    }

    pub fn state(&self) -> RunState {
        self.shared.state.load()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == RunState::Connected
    }

    /// A cloneable handle for queueing packets from other threads.
    pub fn sender(&self) -> EndpointSender {
        self.sender.clone()
    }

    /// See [`EndpointSender::send`].
    pub fn send(&self, packet: Packet) -> Result<()> {
        self.sender.send(packet)
    }

    /// See [`EndpointSender::send_all`].
    pub fn send_all(&self, packets: impl IntoIterator<Item = Packet>) -> Result<usize> {
        self.sender.send_all(packets)
    }

    /// See [`EndpointSender::send_split`].
    pub fn send_split(&self, packet: Packet, chunk_size: usize) -> Result<usize> {
        self.sender.send_split(packet, chunk_size)
    }

    pub fn queued(&self) -> usize {
        self.sender.queued()
    }

    /// Ask the endpoint to stop without waiting for it.
    ///
    /// Pending connects, reads and drain waits are abandoned. Stopping twice
    /// is harmless.
    pub fn stop(&self) {
        self.shared.stop();
    }

    /// Block until the engine and writer threads have exited.
    pub fn wait(mut self) {
        self.join();
    }

    fn join(&mut self) {
        for handle in [self.engine.take(), self.writer.take()].into_iter().flatten() {
            if handle.join().is_err() {
                warn!(id = %self.shared.id, "endpoint thread panicked");
            }
        }
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        match self.lifetime {
            Lifetime::Background => self.shared.stop(),
            Lifetime::Foreground => self.join(),
        }
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("id", &self.shared.id)
            .field("role", &self.shared.role)
            .field("state", &self.state())
            .field("queued", &self.queued())
            .finish()
    }
}

/// Everything the engine thread owns.
struct Engine {
    shared: Arc<Shared>,
    namespace: PipeNamespace,
    registry: Arc<PacketRegistry>,
    ctx: EndpointContext,
    handler: Box<dyn EndpointHandler>,
}

impl Engine {
    fn run(mut self) {
        let shared = Arc::clone(&self.shared);
        let mut reassembler =
            Reassembler::new(Arc::clone(&self.registry), shared.config.max_payload_size);

        loop {
            shared.state.store(RunState::Connecting);
            let pair = match establish(
                shared.role,
                &shared.id,
                &self.namespace,
                &shared.config,
                &shared.cancel,
            ) {
                Ok(pair) => pair,
                Err(err) if err.is_shutdown() || shared.cancel.is_cancelled() => break,
                Err(err) => {
                    warn!(id = %shared.id, role = %shared.role, %err, "connect attempt failed");
                    if !shared.pause(shared.config.reconnect_delay) {
                        break;
                    }
                    continue;
                }
            };

            let reason = self.serve(pair, &mut reassembler);

            shared.state.store(RunState::Disconnecting);
            shared.close_link();
            reassembler.clear();
            info!(id = %shared.id, role = %shared.role, %reason, "disconnected");
            self.handler.on_disconnected(&self.ctx, &reason);

            if shared.cancel.is_cancelled() || shared.config.terminate_on_disconnect {
                break;
            }
            if !shared.pause(shared.config.reconnect_delay) {
                break;
            }
        }

        shared.stop();
        shared.state.store(RunState::Stopped);
        debug!(id = %shared.id, role = %shared.role, "engine stopped");
    }

    /// Run one connection until it ends; returns why it ended.
    fn serve(&mut self, pair: PipePair, reassembler: &mut Reassembler) -> EndpointError {
        let shared = Arc::clone(&self.shared);
        if let Err(err) = shared.publish_link(&pair) {
            return err;
        }
        if shared.cancel.is_cancelled() {
            return EndpointError::ShutdownCancelled;
        }

        shared.state.store(RunState::Connected);
        info!(id = %shared.id, role = %shared.role, "connected");
        self.handler.on_connected(&self.ctx);

        let codec = CodecConfig {
            max_payload_size: shared.config.max_payload_size,
            ..CodecConfig::default()
        };
        let mut reader = PacketReader::with_config(pair.inbound, Arc::clone(&self.registry), codec);

        loop {
            match reader.read_packet() {
                Ok(packet) => self.dispatch(packet, reassembler),
                Err(err) if err.is_frame_local() => {
                    warn!(id = %shared.id, %err, "skipping undecodable packet");
                }
                Err(_) if shared.cancel.is_cancelled() => return EndpointError::ShutdownCancelled,
                Err(PacketError::ConnectionClosed) => return EndpointError::TransportDisconnected,
                Err(err) => return err.into(),
            }
        }
    }

    fn dispatch(&mut self, mut packet: Packet, reassembler: &mut Reassembler) {
        if !packet.is_split() {
            self.handler.on_packet(&self.ctx, packet);
            return;
        }

        if !self.shared.config.auto_handle_split_packets {
            // Raw fragments still get a look at their slice of the payload.
            if let Err(err) = packet.populate() {
                debug!(%err, "fragment populate failed");
            }
            self.handler.on_packet(&self.ctx, packet);
            return;
        }

        match reassembler.receive_fragment(packet) {
            Ok(Some(whole)) => self.handler.on_split_reassembled(&self.ctx, whole),
            Ok(None) => {}
            Err(err) => warn!(id = %self.shared.id, %err, "dropping split group"),
        }
    }
}
