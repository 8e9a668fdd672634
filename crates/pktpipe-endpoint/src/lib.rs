//! Server and client endpoints for pktpipe channels.
//!
//! An endpoint owns two threads: an engine that connects the pipe pair,
//! reads packets and reconnects after a disconnect, and a writer that
//! drains the send queue one packet at a time.
//!
//! ```no_run
//! use pktpipe_endpoint::{Endpoint, EndpointEvent};
//! use pktpipe_packet::{Packet, StringPacket};
//!
//! let (events, inbox) = std::sync::mpsc::channel::<EndpointEvent>();
//! let server = Endpoint::server("jobs").start(events)?;
//! server.send(Packet::new(StringPacket::new("hello")))?;
//! for event in inbox {
//!     println!("{event:?}");
//! }
//! # Ok::<(), pktpipe_endpoint::EndpointError>(())
//! ```

pub mod config;
pub mod endpoint;
pub mod error;
pub mod handler;
mod handshake;
pub mod send_queue;
mod state;

pub use config::{EndpointConfig, Lifetime, Role, RunState};
pub use endpoint::{Endpoint, EndpointBuilder};
pub use error::{EndpointError, Result};
pub use handler::{EndpointContext, EndpointEvent, EndpointHandler};
pub use send_queue::EndpointSender;
