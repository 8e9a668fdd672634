use std::fmt;

use bytes::{Bytes, BytesMut};

use crate::error::{PacketError, Result};
use crate::header::{Header, Version, MAX_WIRE_PAYLOAD, METADATA_LEN, PROTOCOL_VERSION};
use crate::kind::{ErasedKind, PacketKind};

/// One logical message: a typed kind, its payload bytes and header fields.
///
/// Ownership is the lifetime model: `send` and `split` take packets by value,
/// and a packet's buffers are released when the last owner drops it.
pub struct Packet {
    kind: Box<dyn ErasedKind>,
    payload: Bytes,
    metadata: [u8; METADATA_LEN],
    version: Version,
    is_split: bool,
    split_id: u8,
    auto_dispose: bool,
    max_payload_len: usize,
    automatic_header_updates: bool,
    header: Option<Header>,
}

impl Packet {
    /// Create an empty packet of kind `K`.
    pub fn new<K: PacketKind>(kind: K) -> Self {
        Self::from_erased(Box::new(kind))
    }

    pub(crate) fn from_erased(kind: Box<dyn ErasedKind>) -> Self {
        let mut packet = Self {
            kind,
            payload: Bytes::new(),
            metadata: [0u8; METADATA_LEN],
            version: PROTOCOL_VERSION,
            is_split: false,
            split_id: 0,
            auto_dispose: true,
            max_payload_len: MAX_WIRE_PAYLOAD,
            automatic_header_updates: true,
            header: None,
        };
        packet.finalize_header();
        packet
    }

    /// Empty packet of the same kind, version and disposal policy.
    pub(crate) fn blank_like(&self) -> Self {
        let mut packet = Self::from_erased(self.kind.blank());
        packet.version = self.version;
        packet.auto_dispose = self.auto_dispose;
        packet.refresh_header();
        packet
    }

    /// Wire type id.
    pub fn type_id(&self) -> i32 {
        self.kind.packet_type()
    }

    /// Typed view of the kind, if it is `K`.
    pub fn kind<K: PacketKind>(&self) -> Option<&K> {
        self.kind.as_any().downcast_ref::<K>()
    }

    /// Mutable typed view of the kind, if it is `K`.
    pub fn kind_mut<K: PacketKind>(&mut self) -> Option<&mut K> {
        self.kind.as_any_mut().downcast_mut::<K>()
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// Replace the payload.
    ///
    /// Fails with [`PacketError::PayloadTooLarge`] instead of truncating.
    pub fn set_payload(&mut self, payload: impl Into<Bytes>) -> Result<()> {
        let payload = payload.into();
        self.check_len(payload.len())?;
        self.payload = payload;
        self.refresh_header();
        Ok(())
    }

    /// Append bytes to the payload.
    pub fn append_payload(&mut self, extra: &[u8]) -> Result<()> {
        self.check_len(self.payload.len() + extra.len())?;
        let mut joined = BytesMut::with_capacity(self.payload.len() + extra.len());
        joined.extend_from_slice(&self.payload);
        joined.extend_from_slice(extra);
        self.payload = joined.freeze();
        self.refresh_header();
        Ok(())
    }

    /// Assign a payload received from the wire, widening the limit if needed.
    pub(crate) fn load_payload(&mut self, payload: Bytes) {
        self.max_payload_len = self.max_payload_len.max(payload.len());
        self.payload = payload;
        self.refresh_header();
    }

    pub fn max_payload_len(&self) -> usize {
        self.max_payload_len
    }

    /// Change the payload limit. Cannot go below the current payload length.
    pub fn set_max_payload_len(&mut self, max: usize) -> Result<()> {
        if max > MAX_WIRE_PAYLOAD {
            return Err(PacketError::PayloadTooLarge {
                size: max,
                max: MAX_WIRE_PAYLOAD,
            });
        }
        if max < self.payload.len() {
            return Err(PacketError::PayloadTooLarge {
                size: self.payload.len(),
                max,
            });
        }
        self.max_payload_len = max;
        Ok(())
    }

    pub fn metadata(&self) -> &[u8; METADATA_LEN] {
        &self.metadata
    }

    pub fn metadata_byte(&self, index: usize) -> Result<u8> {
        self.metadata
            .get(index)
            .copied()
            .ok_or(PacketError::MetadataOutOfRange {
                start: index,
                end: index + 1,
                len: METADATA_LEN,
            })
    }

    pub fn set_metadata_byte(&mut self, index: usize, value: u8) -> Result<()> {
        self.set_metadata(index, &[value])
    }

    /// Copy `bytes` into the metadata starting at `offset`.
    pub fn set_metadata(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        let end = offset + bytes.len();
        if end > METADATA_LEN {
            return Err(PacketError::MetadataOutOfRange {
                start: offset,
                end,
                len: METADATA_LEN,
            });
        }
        self.metadata[offset..end].copy_from_slice(bytes);
        self.refresh_header();
        Ok(())
    }

    /// Read `len` metadata bytes starting at `offset`.
    pub fn metadata_range(&self, offset: usize, len: usize) -> Result<&[u8]> {
        let end = offset + len;
        self.metadata
            .get(offset..end)
            .ok_or(PacketError::MetadataOutOfRange {
                start: offset,
                end,
                len: METADATA_LEN,
            })
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Override the version written into the header.
    pub fn set_version(&mut self, version: Version) {
        self.version = version;
        self.refresh_header();
    }

    pub fn is_split(&self) -> bool {
        self.is_split
    }

    pub fn split_id(&self) -> u8 {
        self.split_id
    }

    pub(crate) fn mark_split(&mut self, split_id: u8) {
        self.is_split = true;
        self.split_id = split_id;
        self.refresh_header();
    }

    pub(crate) fn apply_header(&mut self, header: &Header) {
        self.version = header.version;
        self.is_split = header.is_split;
        self.split_id = header.split_id;
        self.metadata = header.metadata;
        self.refresh_header();
    }

    /// Fragment index and max index, for split fragments.
    pub fn fragment_position(&self) -> Option<(u8, u8)> {
        self.is_split.then(|| (self.metadata[0], self.metadata[1]))
    }

    /// Whether the sender drops this packet as soon as it is serialized.
    ///
    /// Either way the packet is not handed back; with `false` it is held
    /// until its frame has been written and read by the peer.
    pub fn auto_dispose(&self) -> bool {
        self.auto_dispose
    }

    pub fn set_auto_dispose(&mut self, auto_dispose: bool) {
        self.auto_dispose = auto_dispose;
    }

    /// When disabled, mutations leave the header stale until
    /// [`finalize_header`](Self::finalize_header) is called.
    pub fn set_automatic_header_updates(&mut self, enabled: bool) {
        self.automatic_header_updates = enabled;
        self.refresh_header();
    }

    /// Recompute the header from the current fields.
    pub fn finalize_header(&mut self) -> &Header {
        self.header.insert(Header {
            type_id: self.kind.packet_type(),
            payload_len: self.payload.len(),
            version: self.version,
            is_split: self.is_split,
            split_id: self.split_id,
            metadata: self.metadata,
        })
    }

    /// The finalized header. Errors if fields changed since the last finalize.
    pub fn header(&self) -> Result<&Header> {
        self.header.as_ref().ok_or(PacketError::HeaderNotFinalized)
    }

    /// Run the kind's prepare hook and take its payload.
    pub fn prepare(&mut self) -> Result<()> {
        if let Some(payload) = self.kind.prepare()? {
            self.set_payload(payload)?;
        }
        Ok(())
    }

    /// Run the kind's populate hook over the current payload.
    pub fn populate(&mut self) -> Result<()> {
        let payload = self.payload.clone();
        self.kind.populate(&payload)
    }

    fn refresh_header(&mut self) {
        if self.automatic_header_updates {
            self.finalize_header();
        } else {
            self.header = None;
        }
    }

    fn check_len(&self, len: usize) -> Result<()> {
        if len > self.max_payload_len {
            return Err(PacketError::PayloadTooLarge {
                size: len,
                max: self.max_payload_len,
            });
        }
        Ok(())
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("type_id", &self.type_id())
            .field("kind", &self.kind)
            .field("payload_len", &self.payload.len())
            .field("version", &self.version)
            .field("is_split", &self.is_split)
            .field("split_id", &self.split_id)
            .field("metadata", &self.metadata)
            .finish()
    }
}
