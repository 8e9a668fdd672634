//! Protocol versions and the fixed packet header.
//!
//! Wire layout after the magic byte (all integers little-endian):
//!
//! ```text
//! ┌───────────┬────────────┬─────────────┬───────┬──────────┬──────────────┐
//! │ Type (4B) │ Length (4B)│ Version (3B)│ Split │ Split id │ Metadata     │
//! │ i32 LE    │ i32 LE     │ maj min pat │ (1B)  │ (1B)     │ (12B)        │
//! └───────────┴────────────┴─────────────┴───────┴──────────┴──────────────┘
//! ```
//!
//! The split flag and split id only exist from version 1.2.0 on. Older
//! headers go straight from the version to the metadata.

use std::fmt;

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{PacketError, Result};

/// Frame marker preceding every header on the wire.
pub const MAGIC: u8 = 0x69;

/// Number of caller-assignable metadata bytes in every header.
pub const METADATA_LEN: usize = 12;

/// Type + length + version.
pub const FIXED_HEADER_LEN: usize = 11;

/// Split flag + split id.
pub const SPLIT_FIELDS_LEN: usize = 2;

/// Largest payload a header can describe.
pub const MAX_WIRE_PAYLOAD: usize = i32::MAX as usize;

/// Three-part protocol version carried in every header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

impl Version {
    pub const fn new(major: u8, minor: u8, patch: u8) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Whether headers of this version carry the split flag and split id.
    pub fn has_split_fields(self) -> bool {
        self >= SPLIT_FIELDS_VERSION
    }

    /// Header length (excluding the magic byte) for this version.
    pub fn header_len(self) -> usize {
        if self.has_split_fields() {
            FIXED_HEADER_LEN + SPLIT_FIELDS_LEN + METADATA_LEN
        } else {
            FIXED_HEADER_LEN + METADATA_LEN
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Version written by this build.
pub const PROTOCOL_VERSION: Version = Version::new(1, 2, 0);

/// Oldest version this build accepts on decode.
pub const MINIMUM_SUPPORTED_VERSION: Version = Version::new(1, 1, 0);

/// First version whose header carries the split flag and split id.
pub const SPLIT_FIELDS_VERSION: Version = Version::new(1, 2, 0);

/// Snapshot of a packet's header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub type_id: i32,
    pub payload_len: usize,
    pub version: Version,
    pub is_split: bool,
    pub split_id: u8,
    pub metadata: [u8; METADATA_LEN],
}

impl Header {
    /// Header length on the wire, excluding the magic byte.
    pub fn wire_len(&self) -> usize {
        self.version.header_len()
    }

    /// Append this header to `dst`.
    pub fn write(&self, dst: &mut BytesMut) -> Result<()> {
        if self.payload_len > MAX_WIRE_PAYLOAD {
            return Err(PacketError::PayloadTooLarge {
                size: self.payload_len,
                max: MAX_WIRE_PAYLOAD,
            });
        }
        if self.is_split && !self.version.has_split_fields() {
            return Err(PacketError::SplitFieldsUnsupported(self.version));
        }

        dst.reserve(self.wire_len());
        dst.put_i32_le(self.type_id);
        dst.put_i32_le(self.payload_len as i32);
        dst.put_u8(self.version.major);
        dst.put_u8(self.version.minor);
        dst.put_u8(self.version.patch);
        if self.version.has_split_fields() {
            dst.put_u8(u8::from(self.is_split));
            dst.put_u8(self.split_id);
        }
        dst.put_slice(&self.metadata);
        Ok(())
    }

    /// Parse a header from the front of `src` without consuming anything.
    ///
    /// Returns `Ok(None)` until enough bytes are buffered. Version and length
    /// checks run as soon as the fixed fields are available.
    pub fn peek(src: &[u8], max_payload: usize) -> Result<Option<Header>> {
        if src.len() < FIXED_HEADER_LEN {
            return Ok(None);
        }

        let mut fixed = &src[..FIXED_HEADER_LEN];
        let type_id = fixed.get_i32_le();
        let declared_len = fixed.get_i32_le();
        let version = Version::new(fixed.get_u8(), fixed.get_u8(), fixed.get_u8());

        if version < MINIMUM_SUPPORTED_VERSION {
            return Err(PacketError::ProtocolVersionTooOld {
                version,
                minimum: MINIMUM_SUPPORTED_VERSION,
            });
        }
        if declared_len < 0 {
            return Err(PacketError::InvalidLength(i64::from(declared_len)));
        }
        let payload_len = declared_len as usize;
        if payload_len > max_payload {
            return Err(PacketError::PayloadTooLarge {
                size: payload_len,
                max: max_payload,
            });
        }

        let header_len = version.header_len();
        if src.len() < header_len {
            return Ok(None);
        }

        let mut rest = &src[FIXED_HEADER_LEN..header_len];
        let (is_split, split_id) = if version.has_split_fields() {
            (rest.get_u8() != 0, rest.get_u8())
        } else {
            (false, 0)
        };
        let mut metadata = [0u8; METADATA_LEN];
        rest.copy_to_slice(&mut metadata);

        Ok(Some(Header {
            type_id,
            payload_len,
            version,
            is_split,
            split_id,
            metadata,
        }))
    }
}
