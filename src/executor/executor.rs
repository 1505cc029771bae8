use crate::ast::CommandNode;
use crate::environment::ExecutionContext;
use crate::error::ExecError;

pub type ExecStatus = Result<Status, ExecError>;

/// Outcome of evaluating a node.
///
/// `Terminate` is raised only by `exit`/`quit` and is never confused with a
/// command that happens to return some particular number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Code(i32),
    Terminate,
}

impl Status {
    pub const SUCCESS: Status = Status::Code(0);
    pub const FAILURE: Status = Status::Code(1);

    pub fn is_success(self) -> bool {
        self == Status::SUCCESS
    }

    /// Code a forked branch exits with. A terminating branch ends its own
    /// process normally.
    pub fn exit_code(self) -> i32 {
        match self {
            Status::Code(code) => code,
            Status::Terminate => 0,
        }
    }

    /// Status of `self` followed by `next`: the later command's result,
    /// unless `self` already asked the shell to terminate.
    pub fn then(self, next: Status) -> Status {
        match self {
            Status::Terminate => Status::Terminate,
            Status::Code(_) => next,
        }
    }

    /// Success only when both sides succeeded.
    pub fn both(left: i32, right: i32) -> Status {
        if left == 0 && right == 0 {
            Status::SUCCESS
        } else {
            Status::FAILURE
        }
    }
}

pub trait Executor {
    fn exec(&mut self, node: &CommandNode, ctx: &mut ExecutionContext) -> ExecStatus;
}
