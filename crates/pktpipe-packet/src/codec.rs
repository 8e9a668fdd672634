use bytes::{Buf, BufMut, BytesMut};
use tracing::debug;

use crate::error::Result;
use crate::header::{Header, MAGIC};
use crate::packet::Packet;
use crate::registry::PacketRegistry;

/// Default maximum payload accepted on decode: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// Encode a packet into the wire format.
///
/// Whole packets run their kind's prepare hook first; split fragments are
/// written as-is. The header is finalized right before it is written, so a
/// stale header never reaches the wire.
///
/// Wire format:
/// ```text
/// ┌────────────┬─────────────────────────────┬──────────────────┐
/// │ Magic (1B) │ Header (25B, 23B pre-1.2.0) │ Payload          │
/// │ 0x69       │ see `header` module         │ (Length bytes)   │
/// └────────────┴─────────────────────────────┴──────────────────┘
/// ```
pub fn encode_packet(packet: &mut Packet, dst: &mut BytesMut) -> Result<()> {
    if !packet.is_split() {
        packet.prepare()?;
    }
    let header = *packet.finalize_header();

    dst.reserve(1 + header.wire_len() + header.payload_len);
    dst.put_u8(MAGIC);
    header.write(dst)?;
    dst.put_slice(packet.payload());
    Ok(())
}

/// Decode one packet from a buffer positioned just after a magic byte.
///
/// Returns `Ok(None)` if the buffer doesn't hold the whole frame yet. Version
/// and length violations are reported before anything is consumed. Once the
/// frame is complete it is consumed even if the type is unknown or the
/// payload fails to populate, so the next frame starts at the buffer head.
pub fn decode_packet(
    src: &mut BytesMut,
    registry: &PacketRegistry,
    max_payload: usize,
) -> Result<Option<Packet>> {
    let Some(header) = Header::peek(src, max_payload)? else {
        return Ok(None);
    };

    let total = header.wire_len() + header.payload_len;
    if src.len() < total {
        return Ok(None);
    }

    src.advance(header.wire_len());
    let payload = src.split_to(header.payload_len).freeze();

    let mut packet = registry.create(header.type_id)?;
    packet.apply_header(&header);
    packet.load_payload(payload);

    if !packet.is_split() {
        packet.populate()?;
    }

    debug!(
        type_id = header.type_id,
        size = header.payload_len,
        split = header.is_split,
        "decoded packet"
    );
    Ok(Some(packet))
}

/// Configuration for packet readers and writers.
#[derive(Debug, Clone)]
pub struct CodecConfig {
    /// Maximum payload size in bytes. Default: 16 MiB.
    pub max_payload_size: usize,
    /// Read timeout for blocking operations.
    pub read_timeout: Option<std::time::Duration>,
    /// Write timeout for blocking operations.
    pub write_timeout: Option<std::time::Duration>,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            read_timeout: None,
            write_timeout: None,
        }
    }
}
