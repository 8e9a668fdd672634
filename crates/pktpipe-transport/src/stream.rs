use std::io::{Read, Write};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{Result, TransportError};

/// One direction of an endpoint's pipe pair. Implements Read + Write.
///
/// Endpoints only ever write to their outbound stream and read from their
/// inbound stream, but the type itself is symmetric.
pub struct IpcStream {
    inner: IpcStreamInner,
}

enum IpcStreamInner {
    #[cfg(unix)]
    Unix(std::os::unix::net::UnixStream),
}

impl Read for IpcStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for IpcStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => stream.flush(),
        }
    }
}

impl IpcStream {
    #[cfg(unix)]
    pub(crate) fn from_unix(stream: std::os::unix::net::UnixStream) -> Self {
        Self {
            inner: IpcStreamInner::Unix(stream),
        }
    }

    /// Connected pair of streams, mostly useful for tests.
    #[cfg(unix)]
    pub fn pair() -> Result<(Self, Self)> {
        let (left, right) = std::os::unix::net::UnixStream::pair()?;
        Ok((Self::from_unix(left), Self::from_unix(right)))
    }

    /// Set read timeout on the underlying stream.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        match &self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => stream.set_read_timeout(timeout).map_err(Into::into),
        }
    }

    /// Set write timeout on the underlying stream.
    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        match &self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => stream.set_write_timeout(timeout).map_err(Into::into),
        }
    }

    /// Try to clone this stream (creates a new file descriptor).
    pub fn try_clone(&self) -> Result<Self> {
        match &self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => {
                let cloned = stream.try_clone()?;
                Ok(Self::from_unix(cloned))
            }
        }
    }

    /// Shut down both halves of the stream.
    ///
    /// Any thread blocked reading from a clone of this stream wakes up with
    /// end-of-stream. Calling this on an already closed stream is a no-op.
    pub fn shutdown(&self) -> Result<()> {
        match &self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => match stream.shutdown(std::net::Shutdown::Both) {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == std::io::ErrorKind::NotConnected => Ok(()),
                Err(err) => Err(err.into()),
            },
        }
    }

    /// Bytes written to this stream that the peer has not consumed yet.
    ///
    /// Returns `None` where the platform gives no way to observe the queue.
    #[cfg(target_os = "linux")]
    pub fn pending_outbound(&self) -> Result<Option<usize>> {
        use std::os::fd::AsRawFd;

        let fd = match &self.inner {
            IpcStreamInner::Unix(stream) => stream.as_raw_fd(),
        };

        let mut pending: libc::c_int = 0;
        // SAFETY: `pending` is a valid writable c_int and `fd` is an open socket
        // descriptor owned by this stream for the duration of the call.
        let rc = unsafe { libc::ioctl(fd, libc::TIOCOUTQ, &mut pending) };
        if rc != 0 {
            return Err(std::io::Error::last_os_error().into());
        }

        Ok(Some(pending.max(0) as usize))
    }

    /// Bytes written to this stream that the peer has not consumed yet.
    ///
    /// Returns `None` where the platform gives no way to observe the queue.
    #[cfg(not(target_os = "linux"))]
    pub fn pending_outbound(&self) -> Result<Option<usize>> {
        Ok(None)
    }

    /// Block until the peer has read everything written so far.
    ///
    /// Polls the outbound queue every `poll_interval`. Returns
    /// [`TransportError::Shutdown`] as soon as `cancel` fires. On platforms
    /// without queue introspection this only flushes.
    pub fn wait_for_peer_drain(
        &mut self,
        cancel: &CancellationToken,
        poll_interval: Duration,
    ) -> Result<()> {
        self.flush()?;
        loop {
            if cancel.is_cancelled() {
                return Err(TransportError::Shutdown);
            }
            match self.pending_outbound()? {
                Some(0) | None => return Ok(()),
                Some(_) => std::thread::sleep(poll_interval),
            }
        }
    }
}

impl std::fmt::Debug for IpcStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(_) => f.debug_struct("IpcStream").field("type", &"unix").finish(),
        }
    }
}
