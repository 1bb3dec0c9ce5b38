//! Error types for the CLI runtime.

use std::io;
use std::sync::Arc;

use cmon_config::ControllerUrlError;
use cmon_rpc::RpcError;
use thiserror::Error;

use crate::telemetry::TelemetryError;

#[derive(Debug, Error)]
pub(crate) enum AppError {
    #[error("failed to load configuration: {0}")]
    LoadConfiguration(Arc<ortho_config::OrthoError>),
    #[error("{0}")]
    CliUsage(clap::Error),
    #[error("invalid controller address: {0}")]
    Controller(#[from] ControllerUrlError),
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    #[error("failed to read request payload from stdin: {0}")]
    ReadPayload(io::Error),
    #[error("invalid request payload: {0}")]
    ParsePayload(serde_json::Error),
    #[error("request payload must be a JSON object")]
    PayloadNotObject,
    #[error("failed to install signal handlers: {0}")]
    InstallSignals(io::Error),
    #[error("failed to write output: {0}")]
    WriteOutput(io::Error),
    #[error(transparent)]
    Rpc(#[from] RpcError),
}
