//! Packet kinds: the typed view layered over a packet's raw payload.
//!
//! A kind owns the higher-level fields of one packet type (the text of a
//! string packet, the value of an integer packet). The codec calls
//! [`PacketKind::prepare`] before sending to turn those fields into payload
//! bytes and [`PacketKind::populate`] after receiving to do the reverse.

use std::any::Any;
use std::fmt;
use std::io::{Read, Write};

use bytes::Bytes;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::{PacketError, Result};
use crate::types;

/// Behaviour shared by every packet type.
///
/// `Default` must produce the empty instance the registry hands out on
/// receipt and the splitter uses for fragments.
pub trait PacketKind: Any + Send + fmt::Debug + Default {
    /// Wire type id of this kind.
    const TYPE_ID: i32;

    /// Derive the payload from typed fields right before sending.
    ///
    /// `None` keeps the payload as it is.
    fn prepare(&self) -> Result<Option<Bytes>> {
        Ok(None)
    }

    /// Rebuild typed fields from a received (or reassembled) payload.
    fn populate(&mut self, payload: &[u8]) -> Result<()> {
        let _ = payload;
        Ok(())
    }
}

/// Object-safe face of [`PacketKind`] stored inside a packet.
pub(crate) trait ErasedKind: Send + fmt::Debug {
    fn packet_type(&self) -> i32;
    fn prepare(&self) -> Result<Option<Bytes>>;
    fn populate(&mut self, payload: &[u8]) -> Result<()>;
    fn blank(&self) -> Box<dyn ErasedKind>;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<K: PacketKind> ErasedKind for K {
    fn packet_type(&self) -> i32 {
        K::TYPE_ID
    }

    fn prepare(&self) -> Result<Option<Bytes>> {
        PacketKind::prepare(self)
    }

    fn populate(&mut self, payload: &[u8]) -> Result<()> {
        PacketKind::populate(self, payload)
    }

    fn blank(&self) -> Box<dyn ErasedKind> {
        Box::new(K::default())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// UTF-8 text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StringPacket {
    pub text: String,
}

impl StringPacket {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

impl PacketKind for StringPacket {
    const TYPE_ID: i32 = types::STRING;

    fn prepare(&self) -> Result<Option<Bytes>> {
        Ok(Some(Bytes::copy_from_slice(self.text.as_bytes())))
    }

    fn populate(&mut self, payload: &[u8]) -> Result<()> {
        self.text = std::str::from_utf8(payload)
            .map_err(|err| PacketError::MalformedPayload {
                type_id: Self::TYPE_ID,
                reason: err.to_string(),
            })?
            .to_string();
        Ok(())
    }
}

/// Opaque bytes; the payload is the value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DataPacket;

impl PacketKind for DataPacket {
    const TYPE_ID: i32 = types::DATA;
}

/// Bytes carried gzip-compressed on the wire.
///
/// Compression costs time and, for small buffers, may grow the payload;
/// prefer [`DataPacket`] unless the data is large and compressible.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GZipPacket {
    pub data: Vec<u8>,
}

impl GZipPacket {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self { data: data.into() }
    }
}

impl PacketKind for GZipPacket {
    const TYPE_ID: i32 = types::GZIP;

    fn prepare(&self) -> Result<Option<Bytes>> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&self.data)?;
        Ok(Some(Bytes::from(encoder.finish()?)))
    }

    fn populate(&mut self, payload: &[u8]) -> Result<()> {
        let mut data = Vec::new();
        GzDecoder::new(payload)
            .read_to_end(&mut data)
            .map_err(|err| PacketError::MalformedPayload {
                type_id: Self::TYPE_ID,
                reason: err.to_string(),
            })?;
        self.data = data;
        Ok(())
    }
}

macro_rules! integer_kind {
    ($(#[$doc:meta])* $name:ident, $ty:ty, $id:expr) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
        pub struct $name {
            pub value: $ty,
        }

        impl $name {
            pub fn new(value: $ty) -> Self {
                Self { value }
            }
        }

        impl PacketKind for $name {
            const TYPE_ID: i32 = $id;

            fn prepare(&self) -> Result<Option<Bytes>> {
                Ok(Some(Bytes::copy_from_slice(&self.value.to_le_bytes())))
            }

            fn populate(&mut self, payload: &[u8]) -> Result<()> {
                let raw: [u8; std::mem::size_of::<$ty>()] =
                    payload
                        .try_into()
                        .map_err(|_| PacketError::MalformedPayload {
                            type_id: Self::TYPE_ID,
                            reason: format!(
                                "expected {} bytes, got {}",
                                std::mem::size_of::<$ty>(),
                                payload.len()
                            ),
                        })?;
                self.value = <$ty>::from_le_bytes(raw);
                Ok(())
            }
        }
    };
}

integer_kind!(
    /// Signed 32-bit integer, little-endian.
    IntPacket, i32, types::INT
);
integer_kind!(
    /// Signed 16-bit integer, little-endian.
    ShortPacket, i16, types::SHORT
);
integer_kind!(
    /// Signed 64-bit integer, little-endian.
    LongPacket, i64, types::LONG
);
integer_kind!(
    /// Unsigned 32-bit integer, little-endian.
    UIntPacket, u32, types::UINT
);
integer_kind!(
    /// Unsigned 16-bit integer, little-endian.
    UShortPacket, u16, types::USHORT
);
integer_kind!(
    /// Unsigned 64-bit integer, little-endian.
    ULongPacket, u64, types::ULONG
);
