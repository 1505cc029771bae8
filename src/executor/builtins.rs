use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;
use std::rc::Rc;

use log::debug;
use nix::unistd::{AccessFlags, access};

use super::executor::Status;
use crate::environment::ExecutionContext;

/// A command run inside the shell's own process.
pub trait BuiltinCommand {
    fn names(&self) -> &'static [&'static str];

    /// Whether the command's redirections are applied around it.
    fn uses_redirection(&self) -> bool;

    fn run(&self, args: &[String], ctx: &mut ExecutionContext) -> Status;
}

#[derive(Clone)]
pub struct BuiltinManager {
    commands: HashMap<&'static str, Rc<dyn BuiltinCommand>>,
}

impl BuiltinManager {
    pub fn new() -> Self {
        let mut mgr = BuiltinManager {
            commands: HashMap::new(),
        };
        mgr.register(Rc::new(CdCommand));
        mgr.register(Rc::new(ExitCommand));
        mgr
    }

    pub fn register(&mut self, cmd: Rc<dyn BuiltinCommand>) {
        for &name in cmd.names() {
            self.commands.insert(name, Rc::clone(&cmd));
        }
    }

    pub fn is_builtin(&self, name: &str) -> bool {
        self.commands.contains_key(name)
    }

    pub fn find(&self, name: &str) -> Option<Rc<dyn BuiltinCommand>> {
        self.commands.get(name).cloned()
    }
}

impl Default for BuiltinManager {
    fn default() -> Self {
        Self::new()
    }
}

pub struct CdCommand;

impl BuiltinCommand for CdCommand {
    fn names(&self) -> &'static [&'static str] {
        &["cd"]
    }

    fn uses_redirection(&self) -> bool {
        true
    }

    fn run(&self, args: &[String], ctx: &mut ExecutionContext) -> Status {
        match args {
            [] => Status::SUCCESS,
            [dir] => match change_dir(ctx, dir) {
                Ok(()) => Status::SUCCESS,
                Err(e) => {
                    debug!("cd: {}: {}", dir, e);
                    Status::FAILURE
                }
            },
            _ => {
                debug!("cd: too many arguments");
                Status::FAILURE
            }
        }
    }
}

fn change_dir(ctx: &mut ExecutionContext, dir: &str) -> io::Result<()> {
    let target = fs::canonicalize(ctx.resolve(Path::new(dir)))?;
    if !fs::metadata(&target)?.is_dir() {
        return Err(io::Error::from_raw_os_error(libc::ENOTDIR));
    }
    access(&target, AccessFlags::X_OK).map_err(io::Error::from)?;
    ctx.set_cwd(target);
    Ok(())
}

pub struct ExitCommand;

impl BuiltinCommand for ExitCommand {
    fn names(&self) -> &'static [&'static str] {
        &["exit", "quit"]
    }

    fn uses_redirection(&self) -> bool {
        false
    }

    fn run(&self, _args: &[String], _ctx: &mut ExecutionContext) -> Status {
        Status::Terminate
    }
}
