use std::io::{ErrorKind, Write};

use bytes::BytesMut;
use pktpipe_transport::IpcStream;

use crate::codec::{encode_packet, CodecConfig};
use crate::error::{PacketError, Result};
use crate::packet::Packet;
use crate::reader::transport_to_packet_error;

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Writes complete packets to any `Write` stream.
pub struct PacketWriter<T> {
    inner: T,
    buf: BytesMut,
    config: CodecConfig,
}

impl<T: Write> PacketWriter<T> {
    /// Create a new packet writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, CodecConfig::default())
    }

    /// Create a new packet writer with explicit configuration.
    pub fn with_config(inner: T, config: CodecConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Encode and write a complete packet (blocking).
    pub fn write_packet(&mut self, packet: &mut Packet) -> Result<()> {
        let mut frame = std::mem::take(&mut self.buf);
        frame.clear();
        let result = self
            .encode(packet, &mut frame)
            .and_then(|()| self.write_frame(&frame));
        self.buf = frame;
        result
    }

    /// Encode a packet into `dst` without writing it.
    ///
    /// Lets callers release the packet before the (possibly slow) write.
    pub fn encode(&self, packet: &mut Packet, dst: &mut BytesMut) -> Result<()> {
        let start = dst.len();
        encode_packet(packet, dst)?;
        let payload = packet.payload_len();
        if payload > self.config.max_payload_size {
            dst.truncate(start);
            return Err(PacketError::PayloadTooLarge {
                size: payload,
                max: self.config.max_payload_size,
            });
        }
        Ok(())
    }

    /// Write pre-encoded frame bytes and flush.
    pub fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        let mut offset = 0usize;
        while offset < frame.len() {
            match self.inner.write(&frame[offset..]) {
                Ok(0) => return Err(PacketError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(PacketError::Io(err)),
            }
        }

        self.flush()
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(PacketError::Io(err)),
            }
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Update maximum payload size for subsequent encoding.
    pub fn set_max_payload_size(&mut self, max_payload_size: usize) {
        self.config.max_payload_size = max_payload_size;
    }

    /// Current writer configuration.
    pub fn config(&self) -> &CodecConfig {
        &self.config
    }
}

impl PacketWriter<IpcStream> {
    /// Create a packet writer for `IpcStream` and apply write timeout from config.
    pub fn with_config_ipc(inner: IpcStream, config: CodecConfig) -> Result<Self> {
        inner
            .set_write_timeout(config.write_timeout)
            .map_err(transport_to_packet_error)?;
        Ok(Self::with_config(inner, config))
    }
}
