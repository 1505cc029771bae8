mod executor;
mod default_executor;
mod builtins;
pub mod launcher;
pub mod redirect;


pub use executor::{Executor, ExecStatus, Status};
pub use default_executor::{DefaultExecutor, Frame};
pub use builtins::{BuiltinCommand, BuiltinManager};
pub use launcher::{ForkLauncher, Launcher, Link};
pub use redirect::{RedirectHandler, StreamGuard};
