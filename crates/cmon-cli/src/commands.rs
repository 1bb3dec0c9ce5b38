//! Execution of the `call` and `subscribe` subcommands.

use std::io::{self, Read, Write};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use cmon_rpc::{Connector, RpcClient, StateStore, SubscriptionRequest};
use serde_json::{Map, Value};
use signal_hook::consts::signal::{SIGINT, SIGTERM};
use tracing::info;

use crate::{AppError, CLI_TARGET, IoStreams};

/// Exit status for a reply whose `requestStatus` is not `ok`.
const REPLY_NOT_OK: u8 = 1;

/// Resolves a payload argument: absent means `{}`, `-` reads stdin.
pub(crate) fn read_payload<R: Read>(
    argument: Option<&str>,
    stdin: &mut R,
) -> Result<Value, AppError> {
    let text = match argument {
        None => return Ok(Value::Object(Map::new())),
        Some("-") => {
            let mut text = String::new();
            stdin
                .read_to_string(&mut text)
                .map_err(AppError::ReadPayload)?;
            text
        }
        Some(text) => text.to_owned(),
    };
    let payload: Value = serde_json::from_str(&text).map_err(AppError::ParsePayload)?;
    if !payload.is_object() {
        return Err(AppError::PayloadNotObject);
    }
    Ok(payload)
}

pub(crate) fn call<S, C, R, W, E>(
    client: &mut RpcClient<S, C>,
    uri: &str,
    payload: &Value,
    allow_redirect: bool,
    io: &mut IoStreams<'_, R, W, E>,
) -> Result<ExitCode, AppError>
where
    S: StateStore,
    C: Connector,
    R: Read,
    W: Write,
    E: Write,
{
    let reply = client.call(uri, payload, allow_redirect)?;
    serde_json::to_writer_pretty(&mut *io.stdout, reply.fields())
        .map_err(|error| AppError::WriteOutput(io::Error::other(error)))?;
    writeln!(io.stdout).map_err(AppError::WriteOutput)?;
    if reply.is_ok() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(REPLY_NOT_OK))
    }
}

/// Streams events to stdout, one JSON document per line, and reply records
/// to stderr until `cancel` is raised.
pub(crate) fn subscribe<S, C, R, W, E>(
    client: &mut RpcClient<S, C>,
    request: &SubscriptionRequest,
    cancel: &AtomicBool,
    io: &mut IoStreams<'_, R, W, E>,
) -> Result<ExitCode, AppError>
where
    S: StateStore,
    C: Connector,
    R: Read,
    W: Write,
    E: Write,
{
    let mut event_error: Option<io::Error> = None;
    let mut reply_error: Option<io::Error> = None;
    let stdout = &mut *io.stdout;
    let stderr = &mut *io.stderr;

    let outcome = client.subscribe(
        request,
        cancel,
        |event| {
            if let Err(error) = write_line(stdout, &Value::Object(event)) {
                event_error.get_or_insert(error);
                cancel.store(true, Ordering::SeqCst);
            }
        },
        |reply| {
            if let Err(error) = write_line(stderr, reply) {
                reply_error.get_or_insert(error);
            }
        },
    );

    if let Some(error) = event_error.or(reply_error) {
        return Err(AppError::WriteOutput(error));
    }
    let end = outcome?;
    info!(target: CLI_TARGET, ?end, "subscription finished");
    Ok(ExitCode::SUCCESS)
}

fn write_line<T: serde::Serialize + ?Sized>(sink: &mut impl Write, value: &T) -> io::Result<()> {
    serde_json::to_writer(&mut *sink, value).map_err(io::Error::other)?;
    sink.write_all(b"\n")?;
    sink.flush()
}

/// Raises the returned flag on SIGINT or SIGTERM.
pub(crate) fn cancellation_flag() -> Result<Arc<AtomicBool>, AppError> {
    let flag = Arc::new(AtomicBool::new(false));
    for signal in [SIGINT, SIGTERM] {
        signal_hook::flag::register(signal, Arc::clone(&flag)).map_err(AppError::InstallSignals)?;
    }
    Ok(flag)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[test]
    fn missing_payload_is_an_empty_object() {
        let payload = read_payload(None, &mut io::empty()).expect("default payload");
        assert_eq!(payload, json!({}));
    }

    #[test]
    fn dash_reads_payload_from_stdin() {
        let mut stdin = io::Cursor::new(br#"{"operation":"getAllClusterInfo"}"#.to_vec());
        let payload = read_payload(Some("-"), &mut stdin).expect("stdin payload");
        assert_eq!(payload, json!({"operation": "getAllClusterInfo"}));
    }

    #[rstest]
    #[case("[1, 2]")]
    #[case("\"text\"")]
    fn non_object_payload_is_rejected(#[case] text: &str) {
        let error = read_payload(Some(text), &mut io::empty()).expect_err("not an object");
        assert!(matches!(error, AppError::PayloadNotObject));
    }

    #[test]
    fn invalid_json_payload_is_rejected() {
        let error = read_payload(Some("{oops"), &mut io::empty()).expect_err("invalid json");
        assert!(matches!(error, AppError::ParsePayload(_)));
    }
}
