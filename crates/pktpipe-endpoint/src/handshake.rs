//! Bringing up the pipe pair between a server and a client.
//!
//! Each side listens on the pipe it writes to and connects to the pipe it
//! reads from. The first leg waits for the peer indefinitely; the second
//! leg is bounded by the handshake timeout.

use std::io::ErrorKind;

use pktpipe_transport::{CancellationToken, IpcStream, PipeNamespace, TransportError};
use tracing::debug;

use crate::config::{EndpointConfig, Role};
use crate::error::{EndpointError, Result};

/// Both directions of an established connection.
#[derive(Debug)]
pub(crate) struct PipePair {
    /// Stream this endpoint writes packets to.
    pub outbound: IpcStream,
    /// Stream this endpoint reads packets from.
    pub inbound: IpcStream,
}

/// Connect both pipes of `id` for `role`.
pub(crate) fn establish(
    role: Role,
    id: &str,
    namespace: &PipeNamespace,
    config: &EndpointConfig,
    cancel: &CancellationToken,
) -> Result<PipePair> {
    let poll = config.poll_interval;
    let limit = Some(config.handshake_timeout);

    let listener = namespace.listen(id, role.outbound_end())?;
    debug!(%role, id, path = ?listener.path(), "waiting for peer");

    let pair = match role {
        Role::Server => {
            let outbound = listener.accept_cancellable(cancel, poll, None)?;
            let inbound = namespace
                .connect(id, role.inbound_end(), cancel, poll, limit)
                .map_err(|err| second_leg(err, config))?;
            PipePair { outbound, inbound }
        }
        Role::Client => {
            // The listener is bound first so the server's second leg can find it.
            let inbound = namespace.connect(id, role.inbound_end(), cancel, poll, None)?;
            let outbound = listener
                .accept_cancellable(cancel, poll, limit)
                .map_err(|err| second_leg(err, config))?;
            PipePair { outbound, inbound }
        }
    };

    debug!(%role, id, "pipe pair established");
    Ok(pair)
}

fn second_leg(err: TransportError, config: &EndpointConfig) -> EndpointError {
    let timed_out = match &err {
        TransportError::Accept(source) => source.kind() == ErrorKind::TimedOut,
        TransportError::Connect { source, .. } => matches!(
            source.kind(),
            ErrorKind::NotFound | ErrorKind::ConnectionRefused
        ),
        _ => false,
    };
    if timed_out {
        EndpointError::HandshakeTimeout(config.handshake_timeout)
    } else {
        err.into()
    }
}
