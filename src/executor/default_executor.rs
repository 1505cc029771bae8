use std::rc::Rc;

use log::{debug, error, trace};

use super::builtins::{BuiltinCommand, BuiltinManager};
use super::executor::{ExecStatus, Executor, Status};
use super::launcher::{ForkLauncher, Launcher, Link};
use super::redirect::{RedirectHandler, StreamGuard};
use crate::ast::{CommandNode, Operator, SimpleCommand};
use crate::config::Config;
use crate::environment::ExecutionContext;

/// Position of the node being evaluated. Diagnostics only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Frame {
    pub depth: usize,
    pub parent: Option<Operator>,
}

impl Frame {
    fn child(self, op: Operator) -> Frame {
        Frame {
            depth: self.depth + 1,
            parent: Some(op),
        }
    }
}

#[derive(Clone)]
pub struct DefaultExecutor<L = ForkLauncher> {
    launcher: L,
    builtins: BuiltinManager,
    frame: Frame,
    shell_name: Rc<str>,
}

impl DefaultExecutor<ForkLauncher> {
    pub fn new() -> Self {
        Self::with_launcher(ForkLauncher::default())
    }

    pub fn from_config(config: &Config) -> Self {
        let mut executor = Self::with_launcher(ForkLauncher::new(config.shell_name.as_str()));
        executor.shell_name = Rc::from(config.shell_name.as_str());
        executor
    }
}

impl Default for DefaultExecutor<ForkLauncher> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: Launcher + Clone> DefaultExecutor<L> {
    pub fn with_launcher(launcher: L) -> Self {
        DefaultExecutor {
            launcher,
            builtins: BuiltinManager::new(),
            frame: Frame::default(),
            shell_name: Rc::from("tiny-shell"),
        }
    }

    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    pub fn frame(&self) -> Frame {
        self.frame
    }

    /// Evaluates a whole tree. An absent tree succeeds without side effects.
    pub fn evaluate(&mut self, node: Option<&CommandNode>, ctx: &mut ExecutionContext) -> ExecStatus {
        match node {
            Some(node) => self.exec(node, ctx),
            None => Ok(Status::SUCCESS),
        }
    }

    fn exec_simple(&mut self, cmd: &SimpleCommand, ctx: &mut ExecutionContext) -> ExecStatus {
        if let Some(builtin) = self.builtins.find(&cmd.verb) {
            return self.exec_builtin(builtin.as_ref(), cmd, ctx);
        }

        if cmd.is_assignment() {
            return Ok(self.exec_assignment(cmd, ctx));
        }

        let code = self.launcher.run_external(cmd, ctx)?;
        debug!("{} exited with {}", cmd.verb, code);
        Ok(Status::Code(code))
    }

    fn exec_builtin(
        &mut self,
        builtin: &dyn BuiltinCommand,
        cmd: &SimpleCommand,
        ctx: &mut ExecutionContext,
    ) -> ExecStatus {
        if !builtin.uses_redirection() || cmd.redirections.is_empty() {
            return Ok(builtin.run(&cmd.params, ctx));
        }

        // Dropping the guard on an early return restores the streams too.
        let guard = StreamGuard::save(&cmd.redirections)?;
        RedirectHandler::apply(&cmd.redirections, ctx)?;
        let status = builtin.run(&cmd.params, ctx);
        guard.restore()?;
        Ok(status)
    }

    fn exec_assignment(&mut self, cmd: &SimpleCommand, ctx: &mut ExecutionContext) -> Status {
        if ctx.assign(&cmd.verb) {
            Status::SUCCESS
        } else {
            debug!("malformed assignment: {}", cmd.verb);
            Status::FAILURE
        }
    }

    fn exec_compound(
        &mut self,
        op: Operator,
        left: &CommandNode,
        right: &CommandNode,
        ctx: &mut ExecutionContext,
    ) -> ExecStatus {
        match op {
            Operator::Sequential => {
                let first = self.exec_nested(op, left, ctx)?;
                Ok(first.then(self.exec_nested(op, right, ctx)?))
            }
            Operator::ConditionalZero => match self.exec_nested(op, left, ctx)? {
                Status::Code(0) => self.exec_nested(op, right, ctx),
                status => Ok(status),
            },
            // Terminate counts as a non-zero outcome here.
            Operator::ConditionalNonZero => match self.exec_nested(op, left, ctx)? {
                Status::Code(0) => Ok(Status::SUCCESS),
                first => Ok(first.then(self.exec_nested(op, right, ctx)?)),
            },
            Operator::Parallel => self.exec_pair(op, Link::Parallel, left, right, ctx),
            Operator::Pipe => self.exec_pair(op, Link::Pipe, left, right, ctx),
        }
    }

    /// Evaluates a child node in this process, one level deeper.
    fn exec_nested(&mut self, op: Operator, node: &CommandNode, ctx: &mut ExecutionContext) -> ExecStatus {
        let saved = self.frame;
        self.frame = saved.child(op);
        let status = self.exec(node, ctx);
        self.frame = saved;
        status
    }

    fn exec_pair(
        &mut self,
        op: Operator,
        link: Link,
        left: &CommandNode,
        right: &CommandNode,
        ctx: &ExecutionContext,
    ) -> ExecStatus {
        let mut left_side = self.branch(op);
        let mut right_side = self.branch(op);
        let mut left_ctx = ctx.clone();
        let mut right_ctx = ctx.clone();
        let mut run_left = || left_side.branch_exit_code(left, &mut left_ctx);
        let mut run_right = || right_side.branch_exit_code(right, &mut right_ctx);

        let (left_code, right_code) = self.launcher.run_pair(link, &mut run_left, &mut run_right)?;
        debug!("{:?} finished with {} and {}", link, left_code, right_code);
        Ok(Status::both(left_code, right_code))
    }

    /// Copy of this executor for a subtree evaluated in its own process.
    fn branch(&self, op: Operator) -> Self {
        let mut side = self.clone();
        side.frame = self.frame.child(op);
        side
    }

    /// Evaluates a branch to completion and turns the outcome into the
    /// code its process exits with.
    fn branch_exit_code(&mut self, node: &CommandNode, ctx: &mut ExecutionContext) -> i32 {
        match self.exec(node, ctx) {
            Ok(status) => status.exit_code(),
            Err(err) => {
                error!("branch at depth {} failed: {}", self.frame.depth, err);
                eprintln!("{}: {}", self.shell_name, err);
                1
            }
        }
    }
}

impl<L: Launcher + Clone> Executor for DefaultExecutor<L> {
    fn exec(&mut self, node: &CommandNode, ctx: &mut ExecutionContext) -> ExecStatus {
        match node {
            CommandNode::Simple(cmd) => {
                trace!("depth {} under {:?}: {}", self.frame.depth, self.frame.parent, cmd.verb);
                self.exec_simple(cmd, ctx)
            }
            CommandNode::Compound { op, left, right } => {
                trace!("depth {} under {:?}: {:?}", self.frame.depth, self.frame.parent, op);
                self.exec_compound(*op, left, right, ctx)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::WriteMode;
    use crate::executor::tests::lock_streams;
    use nix::sys::stat::fstat;
    use std::fs;
    use std::path::Path;
    use std::time::{Duration, Instant};
    use tempfile::tempdir;

    fn context_in(dir: &Path) -> ExecutionContext {
        let mut ctx = ExecutionContext::from_process().unwrap();
        ctx.set_cwd(dir.to_path_buf());
        ctx
    }

    fn cmd(verb: &str, args: &[&str]) -> SimpleCommand {
        SimpleCommand::new(verb).args(args.iter().copied())
    }

    fn sh(script: &str) -> SimpleCommand {
        cmd("sh", &["-c", script])
    }

    fn run(node: impl Into<CommandNode>, ctx: &mut ExecutionContext) -> Status {
        let node: CommandNode = node.into();
        DefaultExecutor::new().evaluate(Some(&node), ctx).unwrap()
    }

    fn stream_identities() -> Vec<(u64, u64)> {
        [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO]
            .into_iter()
            .map(|fd| {
                let st = fstat(fd).unwrap();
                (st.st_dev as u64, st.st_ino as u64)
            })
            .collect()
    }

    #[test]
    fn test_external_exit_codes() {
        let dir = tempdir().unwrap();
        let mut ctx = context_in(dir.path());
        assert_eq!(run(cmd("true", &[]), &mut ctx), Status::SUCCESS);
        assert_eq!(run(cmd("false", &[]), &mut ctx), Status::FAILURE);
        assert_eq!(run(sh("exit 42"), &mut ctx), Status::Code(42));
    }

    #[test]
    fn test_command_not_found() {
        let dir = tempdir().unwrap();
        let mut ctx = context_in(dir.path());
        let status = run(cmd("definitely-not-a-command-xyz", &[]), &mut ctx);
        assert_eq!(status, Status::Code(127));
    }

    #[test]
    fn test_killed_child_is_nonzero() {
        let dir = tempdir().unwrap();
        let mut ctx = context_in(dir.path());
        assert_eq!(run(sh("kill -9 $$"), &mut ctx), Status::Code(128 + 9));
    }

    #[test]
    fn test_params_passed_in_order() {
        let dir = tempdir().unwrap();
        let mut ctx = context_in(dir.path());
        let echo = cmd("echo", &["one", "two", "three"]).stdout("out.txt", WriteMode::Truncate);
        assert_eq!(run(echo, &mut ctx), Status::SUCCESS);
        assert_eq!(fs::read_to_string(dir.path().join("out.txt")).unwrap(), "one two three\n");
    }

    #[test]
    fn test_truncate_keeps_only_last_write() {
        let dir = tempdir().unwrap();
        let mut ctx = context_in(dir.path());
        let tree = CommandNode::sequence(
            cmd("echo", &["first"]).stdout("out.txt", WriteMode::Truncate),
            cmd("echo", &["second"]).stdout("out.txt", WriteMode::Truncate),
        );
        run(tree, &mut ctx);
        assert_eq!(fs::read_to_string(dir.path().join("out.txt")).unwrap(), "second\n");
    }

    #[test]
    fn test_append_keeps_both_writes() {
        let dir = tempdir().unwrap();
        let mut ctx = context_in(dir.path());
        let tree = CommandNode::sequence(
            cmd("echo", &["first"]).stdout("out.txt", WriteMode::Append),
            cmd("echo", &["second"]).stdout("out.txt", WriteMode::Append),
        );
        run(tree, &mut ctx);
        assert_eq!(fs::read_to_string(dir.path().join("out.txt")).unwrap(), "first\nsecond\n");
    }

    #[test]
    fn test_input_redirection() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("in.txt"), "hello\n").unwrap();
        let mut ctx = context_in(dir.path());
        let tr = cmd("tr", &["a-z", "A-Z"])
            .stdin("in.txt")
            .stdout("out.txt", WriteMode::Truncate);
        assert_eq!(run(tr, &mut ctx), Status::SUCCESS);
        assert_eq!(fs::read_to_string(dir.path().join("out.txt")).unwrap(), "HELLO\n");
    }

    #[test]
    fn test_missing_input_fails_only_the_child() {
        let dir = tempdir().unwrap();
        let mut ctx = context_in(dir.path());
        let cat = cmd("cat", &[]).stdin("missing.txt");
        assert_eq!(run(cat, &mut ctx), Status::FAILURE);
    }

    #[test]
    fn test_stderr_redirection() {
        let dir = tempdir().unwrap();
        let mut ctx = context_in(dir.path());
        let ls = cmd("ls", &["/nonexistent-dir-for-test"]).stderr("err.txt", WriteMode::Truncate);
        assert_ne!(run(ls, &mut ctx), Status::SUCCESS);
        let content = fs::read_to_string(dir.path().join("err.txt")).unwrap();
        assert!(content.contains("nonexistent-dir-for-test"));
    }

    #[test]
    fn test_same_path_preserves_interleaving() {
        let dir = tempdir().unwrap();
        let mut ctx = context_in(dir.path());
        let script = sh("echo one; echo two >&2; echo three; echo four >&2")
            .stdout("both.txt", WriteMode::Truncate)
            .stderr("both.txt", WriteMode::Truncate);
        assert_eq!(run(script, &mut ctx), Status::SUCCESS);
        assert_eq!(
            fs::read_to_string(dir.path().join("both.txt")).unwrap(),
            "one\ntwo\nthree\nfour\n"
        );
    }

    #[test]
    fn test_assignment_reaches_later_commands() {
        let dir = tempdir().unwrap();
        let mut ctx = context_in(dir.path());
        let tree = CommandNode::sequence(
            SimpleCommand::new("TINY_SHELL_TEST_VAR=forty two"),
            cmd("printenv", &["TINY_SHELL_TEST_VAR"]).stdout("out.txt", WriteMode::Truncate),
        );
        assert_eq!(run(tree, &mut ctx), Status::SUCCESS);
        assert_eq!(ctx.get("TINY_SHELL_TEST_VAR"), Some("forty two"));
        assert_eq!(fs::read_to_string(dir.path().join("out.txt")).unwrap(), "forty two\n");
    }

    #[test]
    fn test_cd_moves_later_commands() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        let mut ctx = context_in(dir.path());
        let tree = CommandNode::sequence(
            cmd("cd", &["sub"]),
            cmd("pwd", &["-P"]).stdout("where.txt", WriteMode::Truncate),
        );
        assert_eq!(run(tree, &mut ctx), Status::SUCCESS);

        let sub = fs::canonicalize(dir.path().join("sub")).unwrap();
        let recorded = fs::read_to_string(sub.join("where.txt")).unwrap();
        assert_eq!(recorded.trim_end(), sub.to_str().unwrap());
    }

    #[test]
    fn test_cd_redirection_is_applied_and_undone() {
        let _lock = lock_streams();
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        let mut ctx = context_in(dir.path());
        let before = stream_identities();

        let cd = cmd("cd", &["sub"]).stdout("made-by-cd.txt", WriteMode::Truncate);
        assert_eq!(run(cd, &mut ctx), Status::SUCCESS);

        assert_eq!(stream_identities(), before);
        assert!(dir.path().join("made-by-cd.txt").exists());
        assert!(ctx.cwd().ends_with("sub"));
    }

    #[test]
    fn test_failed_cd_still_restores_streams() {
        let _lock = lock_streams();
        let dir = tempdir().unwrap();
        let mut ctx = context_in(dir.path());
        let before = stream_identities();

        let cd = cmd("cd", &["missing"]).stdout("out.txt", WriteMode::Truncate);
        assert_eq!(run(cd, &mut ctx), Status::FAILURE);
        assert_eq!(stream_identities(), before);

        let unreachable = CommandNode::from(cmd("cd", &["."]).stdout("no/such/dir/out.txt", WriteMode::Truncate));
        let result = DefaultExecutor::new().evaluate(Some(&unreachable), &mut ctx);
        assert!(result.is_err());
        assert_eq!(stream_identities(), before);
    }

    #[test]
    fn test_external_command_leaves_streams_alone() {
        let _lock = lock_streams();
        let dir = tempdir().unwrap();
        let mut ctx = context_in(dir.path());
        let before = stream_identities();
        run(cmd("true", &[]), &mut ctx);
        assert_eq!(stream_identities(), before);
    }

    #[test]
    fn test_pipe_round_trip() {
        let dir = tempdir().unwrap();
        let mut ctx = context_in(dir.path());
        let tree = CommandNode::pipe(
            cmd("printf", &["line one\\nline two\\n"]),
            cmd("cat", &[]).stdout("out.txt", WriteMode::Truncate),
        );
        assert_eq!(run(tree, &mut ctx), Status::SUCCESS);
        assert_eq!(
            fs::read_to_string(dir.path().join("out.txt")).unwrap(),
            "line one\nline two\n"
        );
    }

    #[test]
    fn test_pipe_status_needs_both_sides() {
        let dir = tempdir().unwrap();
        let mut ctx = context_in(dir.path());
        assert_eq!(run(CommandNode::pipe(cmd("echo", &["hi"]), cmd("false", &[])), &mut ctx), Status::FAILURE);
        assert_eq!(run(CommandNode::pipe(cmd("false", &[]), cmd("true", &[])), &mut ctx), Status::FAILURE);
        assert_eq!(run(CommandNode::pipe(cmd("true", &[]), cmd("true", &[])), &mut ctx), Status::SUCCESS);
    }

    #[test]
    fn test_nested_pipes() {
        let dir = tempdir().unwrap();
        let mut ctx = context_in(dir.path());
        // printf | (sort | tr)
        let tree = CommandNode::pipe(
            cmd("printf", &["pear\\napple\\n"]),
            CommandNode::pipe(
                cmd("sort", &[]),
                cmd("tr", &["a-z", "A-Z"]).stdout("out.txt", WriteMode::Truncate),
            ),
        );
        assert_eq!(run(tree, &mut ctx), Status::SUCCESS);
        assert_eq!(fs::read_to_string(dir.path().join("out.txt")).unwrap(), "APPLE\nPEAR\n");
    }

    #[test]
    fn test_parallel_runs_concurrently() {
        let dir = tempdir().unwrap();
        let mut ctx = context_in(dir.path());
        let start = Instant::now();
        let status = run(CommandNode::parallel(cmd("sleep", &["1"]), cmd("sleep", &["1"])), &mut ctx);
        assert_eq!(status, Status::SUCCESS);
        assert!(start.elapsed() < Duration::from_millis(1900));
    }

    #[test]
    fn test_parallel_failure_on_either_side() {
        let dir = tempdir().unwrap();
        let mut ctx = context_in(dir.path());
        assert_eq!(run(CommandNode::parallel(cmd("true", &[]), cmd("false", &[])), &mut ctx), Status::FAILURE);
        assert_eq!(run(CommandNode::parallel(cmd("false", &[]), cmd("true", &[])), &mut ctx), Status::FAILURE);
    }

    #[test]
    fn test_parallel_side_effects_stay_in_branch() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        let mut ctx = context_in(dir.path());
        let before = ctx.clone();
        let tree = CommandNode::parallel(SimpleCommand::new("BRANCH_ONLY=1"), cmd("cd", &["sub"]));
        assert_eq!(run(tree, &mut ctx), Status::SUCCESS);
        assert_eq!(ctx, before);
    }

    #[test]
    fn test_pipe_into_parallel() {
        let dir = tempdir().unwrap();
        let mut ctx = context_in(dir.path());
        // echo data | (cat > a.txt & true)
        let tree = CommandNode::pipe(
            cmd("echo", &["data"]),
            CommandNode::parallel(cmd("cat", &[]).stdout("a.txt", WriteMode::Truncate), cmd("true", &[])),
        );
        assert_eq!(run(tree, &mut ctx), Status::SUCCESS);
        assert_eq!(fs::read_to_string(dir.path().join("a.txt")).unwrap(), "data\n");
    }
}
