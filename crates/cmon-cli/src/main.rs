//! CLI entrypoint for the cmon controller client.
//!
//! The binary delegates to [`cmon_cli::run`], which loads configuration,
//! parses the subcommand, and talks to the configured controller.

use std::io::{self, StderrLock, StdinLock, StdoutLock};
use std::process::ExitCode;

fn main() -> ExitCode {
    let mut stdin: StdinLock<'_> = io::stdin().lock();
    let mut stdout: StdoutLock<'_> = io::stdout().lock();
    let mut stderr: StderrLock<'_> = io::stderr().lock();
    cmon_cli::run(std::env::args_os(), &mut stdin, &mut stdout, &mut stderr)
}
