//! CLI argument definitions for `cmonctl`.

use clap::{Parser, Subcommand};

/// Command-line interface for the cmon controller client.
#[derive(Parser, Debug)]
#[command(name = "cmonctl", disable_help_subcommand = true)]
pub(crate) struct Cli {
    /// Talk to the configured controller only; ignore failover records and
    /// redirect replies.
    #[arg(long, global = true)]
    pub(crate) no_redirect: bool,
    /// The action to perform.
    #[command(subcommand)]
    pub(crate) command: CliCommand,
}

/// Actions supported by `cmonctl`.
#[derive(Subcommand, Debug, Clone)]
pub(crate) enum CliCommand {
    /// Sends one request and prints the reply.
    Call {
        /// Request URI, for example `/v2/clusters`.
        #[arg(value_name = "URI")]
        uri: String,
        /// JSON request payload, or `-` to read it from stdin.
        #[arg(value_name = "PAYLOAD")]
        payload: Option<String>,
    },
    /// Streams controller events until interrupted.
    Subscribe {
        /// Subscription URI; defaults to the cluster event stream.
        #[arg(long, value_name = "URI")]
        uri: Option<String>,
        /// JSON subscription payload, or `-` to read it from stdin; defaults to
        /// `{}` when only `--uri` is given.
        #[arg(long, value_name = "PAYLOAD")]
        payload: Option<String>,
    },
}
