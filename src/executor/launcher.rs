use std::os::fd::{AsFd, OwnedFd};

use log::{debug, error, trace};
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::{ForkResult, Pid, execvp, fork, pipe2};

use super::redirect::{RedirectHandler, Stream, flush_std_streams};
use crate::ast::SimpleCommand;
use crate::environment::ExecutionContext;
use crate::error::ExecError;

/// How the two branches of a forked pair are connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Link {
    /// Both sides inherit the current streams.
    Parallel,
    /// Left stdout feeds right stdin.
    Pipe,
}

/// A branch evaluated in its own process; returns the code the process
/// exits with.
pub type Branch<'a> = &'a mut dyn FnMut() -> i32;

/// Process creation, kept behind a trait so tree evaluation can be tested
/// without forking.
pub trait Launcher {
    /// Runs `cmd` as an external program and waits for it.
    fn run_external(&mut self, cmd: &SimpleCommand, ctx: &ExecutionContext) -> Result<i32, ExecError>;

    /// Runs both branches as sibling processes and waits for both.
    /// Returns the (left, right) exit codes.
    fn run_pair(&mut self, link: Link, left: Branch<'_>, right: Branch<'_>) -> Result<(i32, i32), ExecError>;
}

/// The real launcher: `fork`, `execvp` and blocking `waitpid`.
#[derive(Debug, Clone)]
pub struct ForkLauncher {
    shell_name: String,
}

impl ForkLauncher {
    pub fn new(shell_name: impl Into<String>) -> Self {
        ForkLauncher {
            shell_name: shell_name.into(),
        }
    }

    /// Forks a child that runs `setup` and then `branch`, exiting with the
    /// branch's code. Returns the child's pid in the parent.
    fn spawn_branch<S>(&self, branch: Branch<'_>, setup: S) -> Result<Pid, ExecError>
    where
        S: FnOnce() -> Result<(), ExecError>,
    {
        flush_std_streams();
        // SAFETY: the child only evaluates the branch and then calls `_exit`.
        match unsafe { fork() }.map_err(ExecError::Fork)? {
            ForkResult::Child => {
                let code = match setup() {
                    Ok(()) => branch(),
                    Err(err) => {
                        self.report(&err);
                        1
                    }
                };
                exit_child(code)
            }
            ForkResult::Parent { child } => {
                trace!("forked branch {}", child);
                Ok(child)
            }
        }
    }

    /// Body of the forked child for an external command. Only returns when
    /// the program could not be started.
    fn exec_child(&self, cmd: &SimpleCommand, ctx: &ExecutionContext) -> i32 {
        // SAFETY: we are the only thread of a freshly forked child.
        if let Err(err) = unsafe { ctx.sync_to_process() } {
            self.report(&err);
            return 1;
        }
        if let Err(err) = RedirectHandler::apply(&cmd.redirections, ctx) {
            self.report(&err);
            return 1;
        }
        let argv = match cmd.argv() {
            Ok(argv) => argv,
            Err(_) => {
                self.report(&ExecError::InvalidArgument(cmd.verb.clone()));
                return 1;
            }
        };

        let Err(errno) = execvp(&argv[0], &argv);
        eprintln!("{}: {}: {}", self.shell_name, cmd.verb, describe_exec_failure(errno));
        match errno {
            Errno::ENOENT | Errno::ENOTDIR => 127,
            _ => 126,
        }
    }

    fn report(&self, err: &ExecError) {
        error!("{}", err);
        eprintln!("{}: {}", self.shell_name, err);
    }
}

impl Default for ForkLauncher {
    fn default() -> Self {
        ForkLauncher::new("tiny-shell")
    }
}

impl Launcher for ForkLauncher {
    fn run_external(&mut self, cmd: &SimpleCommand, ctx: &ExecutionContext) -> Result<i32, ExecError> {
        flush_std_streams();
        // SAFETY: the child execs or calls `_exit`.
        match unsafe { fork() }.map_err(ExecError::Fork)? {
            ForkResult::Child => {
                let code = self.exec_child(cmd, ctx);
                exit_child(code)
            }
            ForkResult::Parent { child } => {
                debug!("started {} as {}", cmd.verb, child);
                wait_for(child)
            }
        }
    }

    fn run_pair(&mut self, link: Link, left: Branch<'_>, right: Branch<'_>) -> Result<(i32, i32), ExecError> {
        match link {
            Link::Parallel => {
                let first = self.spawn_branch(left, || Ok(()))?;
                let second = match self.spawn_branch(right, || Ok(())) {
                    Ok(pid) => pid,
                    Err(err) => {
                        let _ = wait_for(first);
                        return Err(err);
                    }
                };
                wait_both(first, second)
            }
            Link::Pipe => {
                let (read_end, write_end) = pipe2(OFlag::O_CLOEXEC).map_err(ExecError::Pipe)?;
                let mut read_end = Some(read_end);
                let mut write_end = Some(write_end);

                let writer = self.spawn_branch(left, || {
                    drop(read_end.take());
                    rebind_end(write_end.take(), Stream::Output)
                })?;

                let reader = self.spawn_branch(right, || {
                    drop(write_end.take());
                    rebind_end(read_end.take(), Stream::Input)
                });

                // The reader only sees end-of-input once every write end,
                // including ours, is closed.
                drop(read_end);
                drop(write_end);

                let reader = match reader {
                    Ok(pid) => pid,
                    Err(err) => {
                        let _ = wait_for(writer);
                        return Err(err);
                    }
                };
                wait_both(writer, reader)
            }
        }
    }
}

/// Moves one pipe end onto `stream` and closes the original descriptor.
fn rebind_end(end: Option<OwnedFd>, stream: Stream) -> Result<(), ExecError> {
    match end {
        Some(fd) => RedirectHandler::bind(fd.as_fd(), stream),
        None => Ok(()),
    }
}

/// Blocks until `pid` exits and decodes its status. A child killed by a
/// signal reports `128 + signo`.
pub fn wait_for(pid: Pid) -> Result<i32, ExecError> {
    loop {
        match waitpid(pid, None) {
            Ok(WaitStatus::Exited(_, code)) => return Ok(code),
            Ok(WaitStatus::Signaled(_, signal, _)) => return Ok(128 + signal as i32),
            Ok(other) => trace!("ignoring wait status {:?}", other),
            Err(Errno::EINTR) => continue,
            Err(source) => return Err(ExecError::Wait { pid, source }),
        }
    }
}

/// Reaps both children before reporting either wait failure.
fn wait_both(first: Pid, second: Pid) -> Result<(i32, i32), ExecError> {
    let first = wait_for(first);
    let second = wait_for(second);
    Ok((first?, second?))
}

fn describe_exec_failure(errno: Errno) -> &'static str {
    match errno {
        Errno::ENOENT | Errno::ENOTDIR => "command not found",
        Errno::EACCES => "permission denied",
        _ => errno.desc(),
    }
}

/// Ends a forked child without running the parent's exit handlers or
/// flushing buffers inherited from it.
fn exit_child(code: i32) -> ! {
    // SAFETY: `_exit` is async-signal-safe and never returns.
    unsafe { libc::_exit(code) }
}
