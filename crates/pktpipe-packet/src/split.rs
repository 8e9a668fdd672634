//! Breaking oversized packets into same-kind fragments.
//!
//! Fragment metadata byte 0 holds the zero-based fragment index and byte 1
//! the highest index, so one logical packet spans at most 256 fragments.
//! The remaining metadata bytes are copied from the parent unchanged.

use std::sync::atomic::{AtomicU8, Ordering};

use tracing::debug;

use crate::error::{PacketError, Result};
use crate::packet::Packet;

/// Hard cap on fragments per logical packet.
pub const MAX_SPLIT_FRAGMENTS: usize = 256;

/// Metadata index of the fragment index byte.
pub const FRAGMENT_INDEX_BYTE: usize = 0;

/// Metadata index of the max fragment index byte.
pub const FRAGMENT_MAX_INDEX_BYTE: usize = 1;

/// Split `packet` into fragments of at most `chunk_size` payload bytes.
///
/// The packet is consumed. When the payload already fits it comes back as
/// the only element, untouched apart from its prepare hook having run.
pub fn split_packet(mut packet: Packet, chunk_size: usize, split_id: u8) -> Result<Vec<Packet>> {
    match fragments_of(&mut packet, chunk_size, split_id)? {
        Some(fragments) => Ok(fragments),
        None => Ok(vec![packet]),
    }
}

/// Like [`split_packet`] but leaves the original packet with the caller.
///
/// Returns an empty vector when no split is needed.
pub fn split_retaining(packet: &mut Packet, chunk_size: usize, split_id: u8) -> Result<Vec<Packet>> {
    Ok(fragments_of(packet, chunk_size, split_id)?.unwrap_or_default())
}

fn fragments_of(packet: &mut Packet, chunk_size: usize, split_id: u8) -> Result<Option<Vec<Packet>>> {
    if chunk_size == 0 {
        return Err(PacketError::InvalidChunkSize);
    }
    if packet.is_split() {
        return Err(PacketError::AlreadySplit);
    }

    packet.prepare()?;

    let len = packet.payload_len();
    if len <= chunk_size {
        return Ok(None);
    }

    if !packet.version().has_split_fields() {
        return Err(PacketError::SplitFieldsUnsupported(packet.version()));
    }

    let count = len.div_ceil(chunk_size);
    if count > MAX_SPLIT_FRAGMENTS {
        return Err(PacketError::TooManySplits {
            fragments: count,
            max: MAX_SPLIT_FRAGMENTS,
        });
    }
    let max_index = (count - 1) as u8;

    let payload = packet.payload().clone();
    let mut fragments = Vec::with_capacity(count);
    for index in 0..count {
        let start = index * chunk_size;
        let end = (start + chunk_size).min(len);

        let mut fragment = packet.blank_like();
        fragment.set_metadata(0, packet.metadata())?;
        fragment.set_metadata(FRAGMENT_INDEX_BYTE, &[index as u8, max_index])?;
        fragment.mark_split(split_id);
        fragment.set_max_payload_len(chunk_size)?;
        fragment.set_payload(payload.slice(start..end))?;
        fragments.push(fragment);
    }

    debug!(
        type_id = packet.type_id(),
        size = len,
        fragments = count,
        split_id,
        "split packet"
    );
    Ok(Some(fragments))
}

/// Hands out split ids so concurrent split groups stay distinguishable.
#[derive(Debug, Default)]
pub struct Splitter {
    next_id: AtomicU8,
}

impl Splitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the next split id. Wraps after 255.
    pub fn next_split_id(&self) -> u8 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// [`split_packet`] with a fresh split id.
    pub fn split(&self, packet: Packet, chunk_size: usize) -> Result<Vec<Packet>> {
        split_packet(packet, chunk_size, self.next_split_id())
    }

    /// [`split_retaining`] with a fresh split id.
    pub fn split_retaining(&self, packet: &mut Packet, chunk_size: usize) -> Result<Vec<Packet>> {
        split_retaining(packet, chunk_size, self.next_split_id())
    }
}
