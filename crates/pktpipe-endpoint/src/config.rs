use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use pktpipe_packet::DEFAULT_MAX_PAYLOAD;
use pktpipe_transport::PipeEnd;

/// Which side of the channel an endpoint plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Server,
    Client,
}

impl Role {
    /// The pipe this role listens on and writes to.
    ///
    /// The server's outbound pipe is the client's inbound one and vice versa.
    pub fn outbound_end(self) -> PipeEnd {
        match self {
            Role::Server => PipeEnd::Out,
            Role::Client => PipeEnd::In,
        }
    }

    /// The pipe this role connects to and reads from.
    pub fn inbound_end(self) -> PipeEnd {
        self.outbound_end().flip()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Server => "server",
            Role::Client => "client",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What dropping the [`Endpoint`](crate::Endpoint) handle does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Lifetime {
    /// Dropping the handle stops the endpoint; its threads wind down on their own.
    #[default]
    Background,
    /// Dropping the handle blocks until the endpoint stops by itself, through
    /// terminate-on-disconnect or a `stop()` issued from a sender or handler.
    Foreground,
}

/// Per-endpoint behaviour.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Reassemble split fragments before handing them out. Default: true.
    pub auto_handle_split_packets: bool,
    /// Stop instead of reconnecting after the peer goes away. Default: false.
    pub terminate_on_disconnect: bool,
    /// Drop behaviour of the endpoint handle.
    pub lifetime: Lifetime,
    /// Pause before reconnecting after a disconnect. Default: 500 ms.
    pub reconnect_delay: Duration,
    /// Bound on bringing up the second pipe once the first is live. Default: 5 s.
    pub handshake_timeout: Duration,
    /// Granularity of accept, connect and drain polling. Default: 25 ms.
    pub poll_interval: Duration,
    /// Largest payload accepted on either direction. Default: 16 MiB.
    pub max_payload_size: usize,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            auto_handle_split_packets: true,
            terminate_on_disconnect: false,
            lifetime: Lifetime::Background,
            reconnect_delay: Duration::from_millis(500),
            handshake_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(25),
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}

/// Lifecycle state of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RunState {
    Stopped = 0,
    Starting = 1,
    Connecting = 2,
    Connected = 3,
    Disconnecting = 4,
}

impl RunState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => RunState::Starting,
            2 => RunState::Connecting,
            3 => RunState::Connected,
            4 => RunState::Disconnecting,
            _ => RunState::Stopped,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Stopped => "stopped",
            RunState::Starting => "starting",
            RunState::Connecting => "connecting",
            RunState::Connected => "connected",
            RunState::Disconnecting => "disconnecting",
        };
        f.write_str(name)
    }
}

/// [`RunState`] shared between the engine thread and handles.
#[derive(Debug)]
pub(crate) struct AtomicRunState(AtomicU8);

impl AtomicRunState {
    pub(crate) fn new(state: RunState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub(crate) fn load(&self) -> RunState {
        RunState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn store(&self, state: RunState) {
        self.0.store(state as u8, Ordering::Release);
    }
}
