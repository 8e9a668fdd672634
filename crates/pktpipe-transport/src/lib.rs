//! Directional local pipes for pktpipe endpoints.
//!
//! An endpoint talks to its peer over two one-way pipes that together act as
//! a duplex channel. Each pipe is a Unix domain socket living inside a
//! [`PipeNamespace`] directory and named `<id>.IN` or `<id>.OUT`.
//!
//! This is the lowest layer of pktpipe. Everything else builds on top of
//! the [`IpcStream`] type provided here.

pub mod error;
#[cfg(unix)]
pub mod namespace;
pub mod stream;

#[cfg(unix)]
pub mod uds;

pub use error::{Result, TransportError};
#[cfg(unix)]
pub use namespace::{sanitize_pipe_name, PipeEnd, PipeNamespace};
pub use stream::IpcStream;

#[cfg(unix)]
pub use uds::PipeListener;

/// Re-exported so callers can build shutdown signals without naming tokio-util.
pub use tokio_util::sync::CancellationToken;
