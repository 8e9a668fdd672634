use std::fmt;
use std::io;

use pktpipe_endpoint::EndpointError;
use pktpipe_packet::PacketError;
use pktpipe_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound => TRANSPORT_ERROR,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Bind { source, .. }
        | TransportError::Connect { source, .. }
        | TransportError::Accept(source)
        | TransportError::Io(source) => io_error(context, source),
        TransportError::InvalidName { .. } | TransportError::PathTooLong { .. } => {
            CliError::new(USAGE, format!("{context}: {err}"))
        }
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn packet_error(context: &str, err: PacketError) -> CliError {
    match err {
        PacketError::Io(source) => io_error(context, source),
        PacketError::InvalidChunkSize => CliError::new(USAGE, format!("{context}: {err}")),
        PacketError::PayloadTooLarge { .. }
        | PacketError::TooManySplits { .. }
        | PacketError::MalformedPayload { .. }
        | PacketError::ProtocolVersionTooOld { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        PacketError::ConnectionClosed => CliError::new(FAILURE, format!("{context}: {err}")),
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

pub fn endpoint_error(context: &str, err: EndpointError) -> CliError {
    match err {
        EndpointError::Transport(err) => transport_error(context, err),
        EndpointError::Packet(err) => packet_error(context, err),
        EndpointError::HandshakeTimeout(_) => CliError::new(TIMEOUT, format!("{context}: {err}")),
        EndpointError::TransportDisconnected | EndpointError::NotRunning => {
            CliError::new(FAILURE, format!("{context}: {err}"))
        }
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_limit_maps_to_data_invalid() {
        let err = packet_error(
            "send failed",
            PacketError::TooManySplits {
                fragments: 300,
                max: 256,
            },
        );
        assert_eq!(err.code, DATA_INVALID);
        assert!(err.message.starts_with("send failed: "));
    }

    #[test]
    fn bad_channel_name_is_a_usage_error() {
        let err = endpoint_error(
            "start failed",
            EndpointError::Transport(TransportError::InvalidName {
                name: "a/b".to_string(),
                reason: "contains a path separator",
            }),
        );
        assert_eq!(err.code, USAGE);
    }

    #[test]
    fn handshake_timeout_maps_to_timeout() {
        let err = endpoint_error(
            "connect failed",
            EndpointError::HandshakeTimeout(std::time::Duration::from_secs(1)),
        );
        assert_eq!(err.code, TIMEOUT);
    }
}
