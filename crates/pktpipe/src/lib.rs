//! Typed packet messaging between two local processes.
//!
//! A channel is a pair of Unix sockets, `<id>.IN` and `<id>.OUT`, in a pipe
//! namespace directory. Packets carry a registered type id, twelve bytes of
//! caller metadata and a payload; oversized packets can be split into up to
//! 256 fragments and are reassembled on the receiving side.
//!
//! # Crate Structure
//!
//! - [`transport`]: pipe namespace, listeners and streams
//! - [`packet`]: packet model, registry, codec, split and reassembly
//! - [`endpoint`]: server/client engine with a send queue (behind `endpoint` feature)

/// Re-export transport types.
pub mod transport {
    pub use pktpipe_transport::*;
}

/// Re-export packet types.
pub mod packet {
    pub use pktpipe_packet::*;
}

/// Re-export endpoint types (requires `endpoint` feature).
#[cfg(feature = "endpoint")]
pub mod endpoint {
    pub use pktpipe_endpoint::*;
}
