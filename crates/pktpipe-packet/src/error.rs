use crate::header::Version;

/// Errors raised while building, encoding, decoding, splitting or
/// reassembling packets.
#[derive(Debug, thiserror::Error)]
pub enum PacketError {
    /// The frame was produced by a protocol version this build no longer reads.
    #[error("protocol version {version} is older than the minimum supported {minimum}")]
    ProtocolVersionTooOld { version: Version, minimum: Version },

    /// No packet kind is registered for the decoded type id.
    #[error("unknown packet type {0}")]
    UnknownPacketType(i32),

    /// A registry factory produced a packet with a different type id.
    #[error("factory registered for type {registered} produced type {created}")]
    KindMismatch { registered: i32, created: i32 },

    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// Splitting would need more fragments than one metadata byte can index.
    #[error("split needs {fragments} fragments, at most {max} are allowed")]
    TooManySplits { fragments: usize, max: usize },

    /// Chunk size of zero requested.
    #[error("split chunk size must be at least 1 byte")]
    InvalidChunkSize,

    /// The packet is already a fragment and cannot be split again.
    #[error("packet is already a split fragment")]
    AlreadySplit,

    /// Metadata access past the 12 custom header bytes.
    #[error("metadata range {start}..{end} is outside the {len} custom header bytes")]
    MetadataOutOfRange { start: usize, end: usize, len: usize },

    /// The header declares a payload length that cannot be valid.
    #[error("invalid payload length {0} in packet header")]
    InvalidLength(i64),

    /// The header was read while it did not reflect the current payload.
    #[error("packet header is stale; finalize it before reading")]
    HeaderNotFinalized,

    /// Split fields cannot be expressed in the header layout of this version.
    #[error("protocol version {0} cannot carry split fragments")]
    SplitFieldsUnsupported(Version),

    /// The kind could not turn the payload into its typed fields.
    #[error("malformed payload for packet type {type_id}: {reason}")]
    MalformedPayload { type_id: i32, reason: String },

    /// A fragment carries an index or group shape that cannot be reassembled.
    #[error("malformed fragment: {0}")]
    MalformedFragment(String),

    /// An I/O error occurred while reading or writing packets.
    #[error("packet I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete packet was received.
    #[error("connection closed (incomplete packet)")]
    ConnectionClosed,
}

impl PacketError {
    /// Whether the offending frame was fully consumed, so the stream is still
    /// positioned at a frame boundary and reading can continue.
    pub fn is_frame_local(&self) -> bool {
        matches!(
            self,
            PacketError::UnknownPacketType(_)
                | PacketError::KindMismatch { .. }
                | PacketError::MalformedPayload { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, PacketError>;
