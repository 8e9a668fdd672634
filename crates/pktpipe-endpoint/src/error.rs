use std::time::Duration;

/// Errors that can occur in endpoint operations.
#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] pktpipe_transport::TransportError),

    /// Packet-level error.
    #[error("packet error: {0}")]
    Packet(#[from] pktpipe_packet::PacketError),

    /// The peer closed or reset the channel.
    #[error("peer disconnected")]
    TransportDisconnected,

    /// A blocking wait was abandoned because the endpoint is stopping.
    #[error("cancelled by shutdown")]
    ShutdownCancelled,

    /// The second pipe of the pair did not come up in time.
    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    /// An endpoint thread could not be started.
    #[error("failed to spawn endpoint thread: {0}")]
    Spawn(std::io::Error),

    /// The endpoint has been stopped and no longer accepts packets.
    #[error("endpoint is not running")]
    NotRunning,
}

impl EndpointError {
    /// Whether this error only reflects a requested shutdown.
    pub fn is_shutdown(&self) -> bool {
        matches!(
            self,
            EndpointError::ShutdownCancelled
                | EndpointError::Transport(pktpipe_transport::TransportError::Shutdown)
        )
    }
}

pub type Result<T> = std::result::Result<T, EndpointError>;
