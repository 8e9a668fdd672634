use std::io::ErrorKind;
use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::stream::IpcStream;

/// `sockaddr_un.sun_path` capacity: 108 bytes on Linux, 104 on the BSDs and macOS.
#[cfg(target_os = "linux")]
const MAX_PATH_LEN: usize = 108;
#[cfg(not(target_os = "linux"))]
const MAX_PATH_LEN: usize = 104;

/// Listening end of one directional pipe.
///
/// The socket file is removed again on drop, as long as the path still
/// refers to the socket this listener created.
pub struct PipeListener {
    listener: UnixListener,
    path: PathBuf,
    /// `(dev, ino)` of the socket file at bind time.
    identity: (u64, u64),
}

impl PipeListener {
    /// Owner-only access for created pipes.
    pub const DEFAULT_SOCKET_MODE: u32 = 0o600;

    /// Listen at `path`, replacing a stale socket left there by a dead process.
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        Self::bind_with_mode(path, Self::DEFAULT_SOCKET_MODE)
    }

    /// Like [`bind`](Self::bind) with explicit permission bits.
    pub fn bind_with_mode(path: impl AsRef<Path>, mode: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let len = path.as_os_str().len();
        if len >= MAX_PATH_LEN {
            return Err(TransportError::PathTooLong {
                path,
                len,
                max: MAX_PATH_LEN,
            });
        }

        let bind_err = |source| TransportError::Bind {
            path: path.clone(),
            source,
        };

        remove_stale_socket(&path).map_err(bind_err)?;
        let listener = UnixListener::bind(&path).map_err(bind_err)?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode)).map_err(bind_err)?;
        let identity = identity_of(&path).map_err(bind_err)?;

        info!(?path, "pipe listening");
        Ok(Self {
            listener,
            path,
            identity,
        })
    }

    /// Accept an incoming connection (blocking).
    pub fn accept(&self) -> Result<IpcStream> {
        let (stream, _addr) = self.listener.accept().map_err(TransportError::Accept)?;
        debug!(path = ?self.path, "accepted connection");
        Ok(IpcStream::from_unix(stream))
    }

    /// Accept an incoming connection, giving up on shutdown or after `timeout`.
    ///
    /// The listener is polled in non-blocking mode every `poll_interval`.
    /// Returns [`TransportError::Shutdown`] when `cancel` fires and an
    /// [`TransportError::Accept`] with `TimedOut` when the deadline passes.
    pub fn accept_cancellable(
        &self,
        cancel: &CancellationToken,
        poll_interval: Duration,
        timeout: Option<Duration>,
    ) -> Result<IpcStream> {
        let deadline = timeout.map(|t| Instant::now() + t);
        self.listener
            .set_nonblocking(true)
            .map_err(TransportError::Accept)?;

        let accepted = loop {
            if cancel.is_cancelled() {
                break Err(TransportError::Shutdown);
            }
            match self.listener.accept() {
                Ok((stream, _addr)) => break Ok(stream),
                Err(err)
                    if err.kind() == ErrorKind::WouldBlock
                        || err.kind() == ErrorKind::Interrupted =>
                {
                    if deadline.is_some_and(|d| Instant::now() >= d) {
                        break Err(TransportError::Accept(std::io::Error::new(
                            ErrorKind::TimedOut,
                            "no peer connected before the deadline",
                        )));
                    }
                    std::thread::sleep(poll_interval);
                }
                Err(err) => break Err(TransportError::Accept(err)),
            }
        };

        let _ = self.listener.set_nonblocking(false);
        let stream = accepted?;
        // Accepted sockets inherit O_NONBLOCK on some BSDs.
        stream.set_nonblocking(false).map_err(TransportError::Accept)?;
        debug!(path = ?self.path, "accepted connection");
        Ok(IpcStream::from_unix(stream))
    }

    /// Connect to a listening Unix domain socket (blocking).
    pub fn connect(path: impl AsRef<Path>) -> Result<IpcStream> {
        let path = path.as_ref();
        let stream =
            UnixStream::connect(path).map_err(|e| TransportError::Connect {
                path: path.to_path_buf(),
                source: e,
            })?;
        debug!(?path, "connected to unix domain socket");
        Ok(IpcStream::from_unix(stream))
    }

    /// Connect, retrying while nobody is listening at `path` yet.
    ///
    /// Missing or refusing sockets are retried every `poll_interval` until
    /// `cancel` fires or `timeout` elapses; other errors fail immediately.
    pub fn connect_cancellable(
        path: impl AsRef<Path>,
        cancel: &CancellationToken,
        poll_interval: Duration,
        timeout: Option<Duration>,
    ) -> Result<IpcStream> {
        let path = path.as_ref();
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if cancel.is_cancelled() {
                return Err(TransportError::Shutdown);
            }
            match Self::connect(path) {
                Ok(stream) => return Ok(stream),
                Err(TransportError::Connect { source, .. })
                    if matches!(
                        source.kind(),
                        ErrorKind::NotFound | ErrorKind::ConnectionRefused
                    ) =>
                {
                    if deadline.is_some_and(|d| Instant::now() >= d) {
                        return Err(TransportError::Connect {
                            path: path.to_path_buf(),
                            source,
                        });
                    }
                    std::thread::sleep(poll_interval);
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// The path this socket is bound to.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PipeListener {
    fn drop(&mut self) {
        match identity_of(&self.path) {
            Ok(identity) if identity == self.identity => {
                debug!(path = ?self.path, "removing pipe socket");
                let _ = std::fs::remove_file(&self.path);
            }
            Ok(_) => debug!(path = ?self.path, "pipe path was replaced; leaving it alone"),
            Err(_) => {}
        }
    }
}

impl std::fmt::Debug for PipeListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeListener")
            .field("path", &self.path)
            .finish()
    }
}

/// Delete a leftover socket at `path`. Anything that is not a socket is refused.
fn remove_stale_socket(path: &Path) -> std::io::Result<()> {
    let metadata = match std::fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err),
    };
    if !metadata.file_type().is_socket() {
        return Err(std::io::Error::new(
            ErrorKind::AlreadyExists,
            "existing path is not a unix socket",
        ));
    }
    debug!(?path, "removing stale socket");
    std::fs::remove_file(path)
}

/// `(dev, ino)` of the socket at `path`; errors if it is gone or not a socket.
fn identity_of(path: &Path) -> std::io::Result<(u64, u64)> {
    let metadata = std::fs::symlink_metadata(path)?;
    if !metadata.file_type().is_socket() {
        return Err(std::io::Error::new(ErrorKind::InvalidData, "not a socket"));
    }
    Ok((metadata.dev(), metadata.ino()))
}
