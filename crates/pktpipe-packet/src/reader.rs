use std::io::{ErrorKind, Read};
use std::sync::Arc;

use bytes::{Buf, BytesMut};
use pktpipe_transport::IpcStream;
use tracing::debug;

use crate::codec::{decode_packet, CodecConfig};
use crate::error::{PacketError, Result};
use crate::header::MAGIC;
use crate::packet::Packet;
use crate::registry::PacketRegistry;

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reads complete packets from any `Read` stream.
///
/// Bytes before a magic marker are discarded, so the reader resynchronizes
/// on its own after noise. Partial frames are buffered internally.
pub struct PacketReader<T> {
    inner: T,
    buf: BytesMut,
    registry: Arc<PacketRegistry>,
    config: CodecConfig,
    in_frame: bool,
}

impl<T: Read> PacketReader<T> {
    /// Create a new packet reader with default configuration.
    pub fn new(inner: T, registry: Arc<PacketRegistry>) -> Self {
        Self::with_config(inner, registry, CodecConfig::default())
    }

    /// Create a new packet reader with explicit configuration.
    pub fn with_config(inner: T, registry: Arc<PacketRegistry>, config: CodecConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            registry,
            config,
            in_frame: false,
        }
    }

    /// Read the next complete packet (blocking).
    ///
    /// Returns `Err(PacketError::ConnectionClosed)` when EOF is reached.
    /// After an error for which [`PacketError::is_frame_local`] holds, the
    /// next call continues with the following frame.
    pub fn read_packet(&mut self) -> Result<Packet> {
        loop {
            if !self.in_frame {
                self.seek_magic();
            }

            if self.in_frame {
                match decode_packet(&mut self.buf, &self.registry, self.config.max_payload_size) {
                    Ok(Some(packet)) => {
                        self.in_frame = false;
                        return Ok(packet);
                    }
                    Ok(None) => {}
                    Err(err) => {
                        self.in_frame = false;
                        return Err(err);
                    }
                }
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(PacketError::Io(err)),
            };

            if read == 0 {
                return Err(PacketError::ConnectionClosed);
            }

            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    fn seek_magic(&mut self) {
        match self.buf.iter().position(|&b| b == MAGIC) {
            Some(pos) => {
                if pos > 0 {
                    debug!(skipped = pos, "discarding bytes before frame marker");
                }
                self.buf.advance(pos + 1);
                self.in_frame = true;
            }
            None => {
                if !self.buf.is_empty() {
                    debug!(skipped = self.buf.len(), "discarding bytes before frame marker");
                }
                self.buf.clear();
            }
        }
    }

    /// The registry used to instantiate decoded packets.
    pub fn registry(&self) -> &Arc<PacketRegistry> {
        &self.registry
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Update maximum payload size for subsequent decoding.
    pub fn set_max_payload_size(&mut self, max_payload_size: usize) {
        self.config.max_payload_size = max_payload_size;
    }

    /// Current reader configuration.
    pub fn config(&self) -> &CodecConfig {
        &self.config
    }
}

impl PacketReader<IpcStream> {
    /// Create a packet reader for `IpcStream` and apply read timeout from config.
    pub fn with_config_ipc(
        inner: IpcStream,
        registry: Arc<PacketRegistry>,
        config: CodecConfig,
    ) -> Result<Self> {
        inner
            .set_read_timeout(config.read_timeout)
            .map_err(transport_to_packet_error)?;
        Ok(Self::with_config(inner, registry, config))
    }
}

pub(crate) fn transport_to_packet_error(err: pktpipe_transport::TransportError) -> PacketError {
    match err {
        pktpipe_transport::TransportError::Io(io)
        | pktpipe_transport::TransportError::Accept(io) => PacketError::Io(io),
        pktpipe_transport::TransportError::Bind { source, .. }
        | pktpipe_transport::TransportError::Connect { source, .. } => PacketError::Io(source),
        other => PacketError::Io(std::io::Error::other(other.to_string())),
    }
}
