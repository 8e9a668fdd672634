use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{Result, TransportError};
use crate::stream::IpcStream;
use crate::uds::PipeListener;

/// Which of the two directional pipes of a channel a path refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipeEnd {
    /// Carries client-to-server traffic.
    In,
    /// Carries server-to-client traffic.
    Out,
}

impl PipeEnd {
    /// Suffix appended to the channel id.
    pub fn suffix(self) -> &'static str {
        match self {
            PipeEnd::In => "IN",
            PipeEnd::Out => "OUT",
        }
    }

    /// The opposite direction.
    pub fn flip(self) -> Self {
        match self {
            PipeEnd::In => PipeEnd::Out,
            PipeEnd::Out => PipeEnd::In,
        }
    }
}

impl fmt::Display for PipeEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

/// Normalize a channel id into something usable as a file name.
///
/// Spaces become underscores. Empty names, path separators, NUL bytes and
/// the `.`/`..` components are rejected.
pub fn sanitize_pipe_name(name: &str) -> Result<String> {
    let invalid = |reason| TransportError::InvalidName {
        name: name.to_string(),
        reason,
    };

    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(invalid("name is empty"));
    }
    if trimmed == "." || trimmed == ".." {
        return Err(invalid("name is a relative path component"));
    }
    if trimmed.contains(['/', '\\', '\0']) {
        return Err(invalid("name contains a path separator or NUL byte"));
    }

    Ok(trimmed.replace(' ', "_"))
}

/// Directory in which an endpoint pair rendezvous.
///
/// Both sides must use the same directory; each channel id maps to the two
/// socket files `<dir>/<id>.IN` and `<dir>/<id>.OUT`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipeNamespace {
    dir: PathBuf,
}

impl PipeNamespace {
    /// Environment variable overriding the default namespace directory.
    pub const DIR_ENV: &'static str = "PKTPIPE_DIR";

    /// Namespace rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The namespace directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Socket path for one direction of channel `name`.
    pub fn pipe_path(&self, name: &str, end: PipeEnd) -> Result<PathBuf> {
        let name = sanitize_pipe_name(name)?;
        Ok(self.dir.join(format!("{name}.{}", end.suffix())))
    }

    /// Create the directory if needed and listen on one pipe of `name`.
    pub fn listen(&self, name: &str, end: PipeEnd) -> Result<PipeListener> {
        let path = self.pipe_path(name, end)?;
        std::fs::create_dir_all(&self.dir).map_err(|source| TransportError::Bind {
            path: self.dir.clone(),
            source,
        })?;
        PipeListener::bind(path)
    }

    /// Connect to one pipe of `name`, waiting for the listener to appear.
    pub fn connect(
        &self,
        name: &str,
        end: PipeEnd,
        cancel: &CancellationToken,
        poll_interval: Duration,
        timeout: Option<Duration>,
    ) -> Result<IpcStream> {
        let path = self.pipe_path(name, end)?;
        PipeListener::connect_cancellable(path, cancel, poll_interval, timeout)
    }
}

impl Default for PipeNamespace {
    /// `$PKTPIPE_DIR`, falling back to `<tmp>/pktpipe`.
    fn default() -> Self {
        match std::env::var_os(Self::DIR_ENV) {
            Some(dir) if !dir.is_empty() => Self::new(dir),
            _ => Self::new(std::env::temp_dir().join("pktpipe")),
        }
    }
}
