//! Command-line runtime for the cmon controller client.
//!
//! The module owns argument parsing, configuration bootstrapping, and the
//! dispatch of `call` and `subscribe` to [`cmon_rpc::RpcClient`]. It is
//! exercised both from the binary entrypoint and from tests where
//! configuration loading and IO streams are substituted.

use std::ffi::OsString;
use std::io::{Read, Write};
use std::process::ExitCode;

use clap::Parser;
use cmon_config::Config;
use cmon_rpc::{ClientOptions, FileStateStore, RpcClient, SubscriptionRequest};
use tracing::debug;

mod cli;
mod commands;
mod config;
mod errors;
pub mod telemetry;

#[cfg(test)]
mod tests;

use cli::{Cli, CliCommand};
use config::{ConfigArgumentSplit, split_config_arguments};
pub(crate) use config::{ConfigLoader, OrthoConfigLoader};
pub(crate) use errors::AppError;

/// CLI flags recognised by the configuration loader.
///
/// MAINTENANCE: This list must be kept in sync with the fields of
/// `cmon_config::Config`.
const CONFIG_CLI_FLAGS: &[&str] = &[
    "--config-path",
    "--controller",
    "--connect-timeout",
    "--state-file",
    "--user",
    "--password",
    "--reconnect-attempts",
    "--reconnect-backoff-ms",
    "--log-filter",
    "--log-format",
];

/// Boolean configuration flags. They never consume the following token.
const CONFIG_SWITCH_FLAGS: &[&str] = &["--verify-tls"];

const CLI_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::cli");

/// Bundles the IO streams provided to the CLI runtime.
pub(crate) struct IoStreams<'a, R: Read, W: Write, E: Write> {
    pub(crate) stdin: &'a mut R,
    pub(crate) stdout: &'a mut W,
    pub(crate) stderr: &'a mut E,
}

impl<'a, R: Read, W: Write, E: Write> IoStreams<'a, R, W, E> {
    pub(crate) fn new(stdin: &'a mut R, stdout: &'a mut W, stderr: &'a mut E) -> Self {
        Self {
            stdin,
            stdout,
            stderr,
        }
    }
}

/// Runs the CLI using the provided arguments and IO handles.
#[must_use]
pub fn run<I, R, W, E>(args: I, stdin: &mut R, stdout: &mut W, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    R: Read,
    W: Write,
    E: Write,
{
    let mut io = IoStreams::new(stdin, stdout, stderr);
    run_with_loader(args, &mut io, &OrthoConfigLoader)
}

/// Runs the CLI with a custom configuration loader.
#[must_use]
pub(crate) fn run_with_loader<I, R, W, E, L>(
    args: I,
    io: &mut IoStreams<'_, R, W, E>,
    loader: &L,
) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    R: Read,
    W: Write,
    E: Write,
    L: ConfigLoader,
{
    match try_run(args, io, loader) {
        Ok(exit_code) => exit_code,
        Err(error) => {
            let _ = writeln!(io.stderr, "{error}");
            ExitCode::FAILURE
        }
    }
}

fn try_run<I, R, W, E, L>(
    args: I,
    io: &mut IoStreams<'_, R, W, E>,
    loader: &L,
) -> Result<ExitCode, AppError>
where
    I: IntoIterator<Item = OsString>,
    R: Read,
    W: Write,
    E: Write,
    L: ConfigLoader,
{
    let args: Vec<OsString> = args.into_iter().collect();
    let split = split_config_arguments(&args);
    let cli = Cli::try_parse_from(prepare_cli_arguments(&args, &split))
        .map_err(AppError::CliUsage)?;
    let config = loader.load(&split.config_arguments)?;
    telemetry::initialise(&config)?;

    let allow_redirect = !cli.no_redirect;
    match cli.command {
        CliCommand::Call { uri, payload } => {
            let payload = commands::read_payload(payload.as_deref(), &mut *io.stdin)?;
            let mut client = build_client(&config)?;
            commands::call(&mut client, &uri, &payload, allow_redirect, io)
        }
        CliCommand::Subscribe { uri, payload } => {
            let request = if uri.is_none() && payload.is_none() {
                SubscriptionRequest::events()
            } else {
                SubscriptionRequest::new(
                    uri.unwrap_or_else(|| SubscriptionRequest::events().uri),
                    commands::read_payload(payload.as_deref(), &mut *io.stdin)?,
                )
            };
            let mut client = build_client(&config)?;
            let cancel = commands::cancellation_flag()?;
            commands::subscribe(&mut client, &request, &cancel, io)
        }
    }
}

fn build_client(config: &Config) -> Result<RpcClient<FileStateStore>, AppError> {
    let options = ClientOptions::from_config(config)?;
    debug!(
        target: CLI_TARGET,
        controller = %options.controller,
        state_file = %config.state_file(),
        "client configured"
    );
    Ok(RpcClient::new(options, FileStateStore::new(config.state_file())))
}

fn prepare_cli_arguments(args: &[OsString], split: &ConfigArgumentSplit) -> Vec<OsString> {
    args.first()
        .into_iter()
        .chain(args.get(split.command_start..).unwrap_or_default())
        .cloned()
        .collect()
}
