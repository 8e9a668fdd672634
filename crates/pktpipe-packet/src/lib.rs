//! Typed packets over a magic-delimited binary stream.
//!
//! Every packet on the wire is a magic byte (`0x69`), a fixed little-endian
//! header (type id, payload length, protocol version, split fields and 12
//! metadata bytes) and the payload. This crate owns:
//! - the [`Packet`] model and its [`PacketKind`] variants,
//! - the [`PacketRegistry`] mapping type ids to kinds,
//! - the codec plus blocking [`PacketReader`]/[`PacketWriter`],
//! - splitting oversized packets and reassembling the fragments.

pub mod codec;
pub mod error;
pub mod header;
pub mod kind;
pub mod packet;
pub mod reader;
pub mod reassembly;
pub mod registry;
pub mod split;
pub mod types;
pub mod writer;

pub use codec::{decode_packet, encode_packet, CodecConfig, DEFAULT_MAX_PAYLOAD};
pub use error::{PacketError, Result};
pub use header::{
    Header, Version, MAGIC, METADATA_LEN, MINIMUM_SUPPORTED_VERSION, PROTOCOL_VERSION,
    SPLIT_FIELDS_VERSION,
};
pub use kind::{
    DataPacket, GZipPacket, IntPacket, LongPacket, PacketKind, ShortPacket, StringPacket,
    UIntPacket, ULongPacket, UShortPacket,
};
pub use packet::Packet;
pub use reader::PacketReader;
pub use reassembly::{GroupKey, Reassembler};
pub use registry::PacketRegistry;
pub use split::{split_packet, split_retaining, Splitter, MAX_SPLIT_FRAGMENTS};
pub use types::{type_name, USER_TYPE_START};
pub use writer::PacketWriter;
