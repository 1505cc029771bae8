//! Execution engine for a small Unix shell.
//!
//! Takes an already-parsed [`ast::CommandNode`] tree and runs it: built-ins
//! and assignments in-process, external commands via fork/exec, and the
//! `;`, `&&`, `||`, `&` and `|` combinators recursively.

pub mod ast;
pub mod config;
pub mod environment;
pub mod error;
pub mod executor;
pub mod logging;

pub use ast::{CommandNode, Operator, SimpleCommand};
pub use environment::ExecutionContext;
pub use error::ExecError;
pub use executor::{DefaultExecutor, ExecStatus, Executor, Status};
