use std::process::ExitCode;

use tiny_shell_exec::config::ConfigLoader;
use tiny_shell_exec::{logging, CommandNode, DefaultExecutor, ExecutionContext, SimpleCommand, Status};

fn main() -> ExitCode {
    let config = match ConfigLoader::load_from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("config error: {}", e);
            return ExitCode::from(2);
        }
    };
    if let Err(e) = logging::init(&config) {
        eprintln!("{}: cannot set up logging: {}", config.shell_name, e);
    }

    let mut args = std::env::args().skip(1);
    let Some(verb) = args.next() else {
        eprintln!("usage: tiny-shell-exec VERB [ARGS...]");
        return ExitCode::from(2);
    };
    let node = CommandNode::from(SimpleCommand::new(verb).args(args));

    let mut ctx = match ExecutionContext::from_process() {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("{}: {}", config.shell_name, e);
            return ExitCode::FAILURE;
        }
    };
    for (key, value) in &config.env_vars {
        ctx.set(key, value);
    }

    let mut executor = DefaultExecutor::from_config(&config);
    match executor.evaluate(Some(&node), &mut ctx) {
        Ok(Status::Code(code)) => ExitCode::from((code & 0xff) as u8),
        Ok(Status::Terminate) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}: {}", config.shell_name, e);
            ExitCode::FAILURE
        }
    }
}
