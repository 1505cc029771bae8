use std::ffi::{CString, NulError};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq)]
pub enum CommandNode {
    Simple(SimpleCommand),
    Compound {
        op: Operator,
        left: Box<CommandNode>,
        right: Box<CommandNode>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// `a ; b`
    Sequential,
    /// `a & b`
    Parallel,
    /// `a | b`
    Pipe,
    /// `a || b`
    ConditionalNonZero,
    /// `a && b`
    ConditionalZero,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimpleCommand {
    pub verb: String,
    pub params: Vec<String>,
    pub redirections: Redirections,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Redirections {
    pub input: Option<PathBuf>,
    pub output: Option<RedirectTarget>,
    pub error: Option<RedirectTarget>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RedirectTarget {
    pub path: PathBuf,
    pub mode: WriteMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Truncate, // >
    Append,   // >>
}

impl CommandNode {
    pub fn compound(op: Operator, left: impl Into<CommandNode>, right: impl Into<CommandNode>) -> Self {
        CommandNode::Compound {
            op,
            left: Box::new(left.into()),
            right: Box::new(right.into()),
        }
    }

    pub fn sequence(left: impl Into<CommandNode>, right: impl Into<CommandNode>) -> Self {
        Self::compound(Operator::Sequential, left, right)
    }

    pub fn parallel(left: impl Into<CommandNode>, right: impl Into<CommandNode>) -> Self {
        Self::compound(Operator::Parallel, left, right)
    }

    pub fn pipe(left: impl Into<CommandNode>, right: impl Into<CommandNode>) -> Self {
        Self::compound(Operator::Pipe, left, right)
    }

    pub fn and(left: impl Into<CommandNode>, right: impl Into<CommandNode>) -> Self {
        Self::compound(Operator::ConditionalZero, left, right)
    }

    pub fn or(left: impl Into<CommandNode>, right: impl Into<CommandNode>) -> Self {
        Self::compound(Operator::ConditionalNonZero, left, right)
    }
}

impl From<SimpleCommand> for CommandNode {
    fn from(cmd: SimpleCommand) -> Self {
        CommandNode::Simple(cmd)
    }
}

impl SimpleCommand {
    pub fn new(verb: impl Into<String>) -> Self {
        SimpleCommand {
            verb: verb.into(),
            params: Vec::new(),
            redirections: Redirections::default(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.params.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.params.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn stdin(mut self, path: impl Into<PathBuf>) -> Self {
        self.redirections.input = Some(path.into());
        self
    }

    pub fn stdout(mut self, path: impl Into<PathBuf>, mode: WriteMode) -> Self {
        self.redirections.output = Some(RedirectTarget { path: path.into(), mode });
        self
    }

    pub fn stderr(mut self, path: impl Into<PathBuf>, mode: WriteMode) -> Self {
        self.redirections.error = Some(RedirectTarget { path: path.into(), mode });
        self
    }

    /// A verb containing `=` binds a variable instead of naming a program.
    pub fn is_assignment(&self) -> bool {
        self.verb.contains('=')
    }

    /// Argument vector for exec: the verb followed by the params in order.
    pub fn argv(&self) -> Result<Vec<CString>, NulError> {
        std::iter::once(&self.verb)
            .chain(self.params.iter())
            .map(|word| CString::new(word.as_bytes()))
            .collect()
    }
}

impl Redirections {
    pub fn is_empty(&self) -> bool {
        self.input.is_none() && self.output.is_none() && self.error.is_none()
    }
}
