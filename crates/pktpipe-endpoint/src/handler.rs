//! Callbacks from the engine thread.

use std::sync::mpsc::Sender;

use pktpipe_packet::Packet;

use crate::config::Role;
use crate::error::EndpointError;
use crate::send_queue::EndpointSender;

/// What a handler can see and do while a callback runs.
pub struct EndpointContext {
    id: String,
    role: Role,
    sender: EndpointSender,
}

impl EndpointContext {
    pub(crate) fn new(id: String, role: Role, sender: EndpointSender) -> Self {
        Self { id, role, sender }
    }

    /// Channel name of this endpoint.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Handle for queueing replies. Sends never block the engine thread.
    pub fn sender(&self) -> &EndpointSender {
        &self.sender
    }
}

/// Receives connection and packet notifications.
///
/// Every method runs on the endpoint's engine thread, one at a time. A slow
/// callback delays reading from the peer but never blocks the send queue.
pub trait EndpointHandler: Send + 'static {
    fn on_connected(&mut self, _ctx: &EndpointContext) {}

    /// `reason` is [`EndpointError::TransportDisconnected`] when the peer went
    /// away and [`EndpointError::ShutdownCancelled`] when this side stopped.
    fn on_disconnected(&mut self, _ctx: &EndpointContext, _reason: &EndpointError) {}

    /// A whole packet, or a raw fragment when split handling is disabled.
    fn on_packet(&mut self, _ctx: &EndpointContext, _packet: Packet) {}

    /// A packet rebuilt from all of its fragments.
    fn on_split_reassembled(&mut self, _ctx: &EndpointContext, _packet: Packet) {}
}

/// Handler that ignores everything, for send-only endpoints.
impl EndpointHandler for () {}

/// Notification forwarded by the channel handler.
#[derive(Debug)]
pub enum EndpointEvent {
    Connected,
    /// Disconnected, with the error's display text.
    Disconnected(String),
    Packet(Packet),
    Reassembled(Packet),
}

/// Forward every notification into a channel.
///
/// Events are dropped once the receiving side hangs up.
impl EndpointHandler for Sender<EndpointEvent> {
    fn on_connected(&mut self, _ctx: &EndpointContext) {
        let _ = self.send(EndpointEvent::Connected);
    }

    fn on_disconnected(&mut self, _ctx: &EndpointContext, reason: &EndpointError) {
        let _ = self.send(EndpointEvent::Disconnected(reason.to_string()));
    }

    fn on_packet(&mut self, _ctx: &EndpointContext, packet: Packet) {
        let _ = self.send(EndpointEvent::Packet(packet));
    }

    fn on_split_reassembled(&mut self, _ctx: &EndpointContext, packet: Packet) {
        let _ = self.send(EndpointEvent::Reassembled(packet));
    }
}
