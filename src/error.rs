use std::io;
use std::path::PathBuf;

use nix::errno::Errno;
use nix::unistd::Pid;
use thiserror::Error;

/// Infrastructure failures. Command-level failures are exit codes, not errors.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("fork failed: {0}")]
    Fork(#[source] Errno),
    #[error("pipe creation failed: {0}")]
    Pipe(#[source] Errno),
    #[error("waiting for process {pid} failed: {source}")]
    Wait {
        pid: Pid,
        #[source]
        source: Errno,
    },
    #[error("{}: {source}", path.display())]
    Redirect {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot rebind standard {stream}: {source}")]
    Rebind {
        stream: &'static str,
        #[source]
        source: Errno,
    },
    #[error("cannot save standard streams: {0}")]
    Snapshot(#[source] io::Error),
    #[error("cannot enter {}: {source}", path.display())]
    WorkingDir {
        path: PathBuf,
        #[source]
        source: Errno,
    },
    #[error("argument contains a NUL byte: {0}")]
    InvalidArgument(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}
