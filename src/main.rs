mod command;
mod config;
mod endpoint;
mod executable;
mod invocation;
mod logging;
mod prompt;
mod redirection;

use std::{io, str::FromStr};

use anyhow::Context;
use nix::fcntl::{fcntl, FcntlArg};
use nix::libc::{STDERR_FILENO, STDIN_FILENO, STDOUT_FILENO};
use tracing::debug;

use crate::{
    command::{Command, Flow, BANNER},
    config::ShellConfig,
    executable::{ExecutableRunner, Runner},
    prompt::{ConsolePrompter, Prompter},
};

fn main() -> anyhow::Result<()> {
    let config: ShellConfig = argh::from_env();
    logging::init(&config.log_level);

    check_standard_streams()?;

    let reader = io::stdin().lock();
    let writer = io::stdout();
    let errors = io::stderr();
    let mut prompter = ConsolePrompter::new(reader, writer, errors);

    return repl(&mut prompter, &Runner::new(), &config);
}

/// Children inherit descriptors 0-2, so all three have to be open before the
/// first dispatch.
fn check_standard_streams() -> anyhow::Result<()> {
    for (fd, name) in [
        (STDIN_FILENO, "standard input"),
        (STDOUT_FILENO, "standard output"),
        (STDERR_FILENO, "standard error"),
    ] {
        fcntl(fd, FcntlArg::F_GETFD).with_context(|| format!("{} is not open", name))?;
    }

    return Ok(());
}

fn repl(
    prompter: &mut impl Prompter,
    runner: &impl ExecutableRunner,
    config: &ShellConfig,
) -> anyhow::Result<()> {
    if !config.quiet {
        prompter.prompt(BANNER)?;
    }

    loop {
        prompter.prompt(&config.prompt)?;

        let Some(input) = prompter.read()? else {
            debug!("end of input");
            return Ok(());
        };
        if input.is_empty() {
            continue;
        }

        let command = match Command::from_str(&input) {
            Ok(command) => command,
            Err(error) => {
                prompter.report(&format!("Error: {}", error))?;
                continue;
            }
        };
        if command.run(prompter, runner, config)? == Flow::Quit {
            return Ok(());
        }
    }
}
