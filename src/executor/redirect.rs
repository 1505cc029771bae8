use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, IntoRawFd, OwnedFd, RawFd};

use nix::errno::Errno;
use std::os::unix::fs::OpenOptionsExt;

use crate::ast::{RedirectTarget, Redirections, WriteMode};
use crate::environment::ExecutionContext;
use crate::error::ExecError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Input,
    Output,
    Error,
}

impl Stream {
    pub const ALL: [Stream; 3] = [Stream::Input, Stream::Output, Stream::Error];

    pub fn fd(self) -> RawFd {
        match self {
            Stream::Input => libc::STDIN_FILENO,
            Stream::Output => libc::STDOUT_FILENO,
            Stream::Error => libc::STDERR_FILENO,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Stream::Input => "input",
            Stream::Output => "output",
            Stream::Error => "error",
        }
    }
}

pub struct RedirectHandler;

impl RedirectHandler {
    /// Opens every target in `redirections` and rebinds the matching
    /// standard stream onto it. Each opened file is closed right after the
    /// rebinding, leaving only the standard descriptor.
    pub fn apply(redirections: &Redirections, ctx: &ExecutionContext) -> Result<(), ExecError> {
        if let Some(path) = &redirections.input {
            let path = ctx.resolve(path);
            let file = File::open(&path).map_err(|source| ExecError::Redirect { path, source })?;
            install(file, Stream::Input)?;
        }

        if let Some(target) = &redirections.output {
            install(open_target(target, ctx)?, Stream::Output)?;
        }

        if let Some(target) = &redirections.error {
            if shares_output_target(redirections, ctx) {
                // One descriptor for both streams keeps their writes ordered.
                Self::bind(io::stdout().as_fd(), Stream::Error)?;
            } else {
                install(open_target(target, ctx)?, Stream::Error)?;
            }
        }

        Ok(())
    }

    /// Makes `stream` refer to the same open file as `fd`. The caller keeps
    /// ownership of `fd`.
    pub fn bind(fd: BorrowedFd<'_>, stream: Stream) -> Result<(), ExecError> {
        nix::unistd::dup2(fd.as_raw_fd(), stream.fd())
            .map(drop)
            .map_err(|source| ExecError::Rebind { stream: stream.name(), source })
    }
}

/// Rebinds `stream` onto `file` and closes the file's own descriptor. When
/// the stream was closed, `open` may already have handed out its number.
fn install(file: File, stream: Stream) -> Result<(), ExecError> {
    if file.as_raw_fd() == stream.fd() {
        let _ = file.into_raw_fd();
        return Ok(());
    }
    RedirectHandler::bind(file.as_fd(), stream)
}

fn shares_output_target(redirections: &Redirections, ctx: &ExecutionContext) -> bool {
    match (&redirections.output, &redirections.error) {
        (Some(out), Some(err)) => ctx.resolve(&out.path) == ctx.resolve(&err.path),
        _ => false,
    }
}

fn open_target(target: &RedirectTarget, ctx: &ExecutionContext) -> Result<File, ExecError> {
    let path = ctx.resolve(&target.path);
    let mut options = OpenOptions::new();
    options.write(true).create(true).mode(0o644);
    match target.mode {
        WriteMode::Truncate => options.truncate(true),
        WriteMode::Append => options.append(true),
    };
    options.open(&path).map_err(|source| ExecError::Redirect { path, source })
}

/// Pushes out bytes buffered by Rust's stdout/stderr handles so they reach
/// the descriptor they were written for.
pub(crate) fn flush_std_streams() {
    let _ = io::stdout().flush();
    let _ = io::stderr().flush();
}

/// Snapshot of the standard streams a redirection is about to replace,
/// restored on `restore` or drop. A `None` entry was closed when saved.
pub struct StreamGuard {
    saved: Option<Vec<(Stream, Option<OwnedFd>)>>,
}

impl StreamGuard {
    pub fn save(redirections: &Redirections) -> Result<Self, ExecError> {
        flush_std_streams();
        let touched = [
            redirections.input.is_some(),
            redirections.output.is_some(),
            redirections.error.is_some(),
        ];
        let mut saved = Vec::with_capacity(3);
        for (stream, _) in Stream::ALL.into_iter().zip(touched).filter(|(_, touched)| *touched) {
            saved.push((stream, snapshot(stream)?));
        }
        Ok(StreamGuard { saved: Some(saved) })
    }

    pub fn restore(mut self) -> Result<(), ExecError> {
        self.restore_streams()
    }

    fn restore_streams(&mut self) -> Result<(), ExecError> {
        let Some(saved) = self.saved.take() else {
            return Ok(());
        };
        flush_std_streams();
        let mut result = Ok(());
        for (stream, fd) in &saved {
            let step = match fd {
                Some(fd) => RedirectHandler::bind(fd.as_fd(), *stream),
                None => close_stream(*stream),
            };
            result = result.and(step);
        }
        result
    }
}

fn snapshot(stream: Stream) -> Result<Option<OwnedFd>, ExecError> {
    let copy = match stream {
        Stream::Input => io::stdin().as_fd().try_clone_to_owned(),
        Stream::Output => io::stdout().as_fd().try_clone_to_owned(),
        Stream::Error => io::stderr().as_fd().try_clone_to_owned(),
    };
    match copy {
        Ok(fd) => Ok(Some(fd)),
        Err(err) if err.raw_os_error() == Some(libc::EBADF) => Ok(None),
        Err(err) => Err(ExecError::Snapshot(err)),
    }
}

fn close_stream(stream: Stream) -> Result<(), ExecError> {
    match nix::unistd::close(stream.fd()) {
        Ok(()) | Err(Errno::EBADF) => Ok(()),
        Err(source) => Err(ExecError::Rebind { stream: stream.name(), source }),
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        if let Err(err) = self.restore_streams() {
            log::error!("restoring standard streams failed: {}", err);
        }
    }
}
