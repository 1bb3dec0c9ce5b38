//! Fake controller served from a loopback listener.
//!
//! Each scripted exchange accepts one connection, records the request, and
//! writes a canned response. Streamed responses keep the connection open
//! until the client closes it.

use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use serde_json::Value;

use crate::framing::{parse_head, split_head};

const ACCEPT_DEADLINE: Duration = Duration::from_secs(5);

/// One scripted connection.
pub(crate) enum Exchange {
    /// Write the bytes and close.
    Reply(Vec<u8>),
    /// Write the bytes and wait for the client to hang up.
    Stream(Vec<u8>),
}

/// A controller stand-in that serves scripted exchanges in order.
pub(crate) struct FakeController {
    port: u16,
    requests: Arc<Mutex<Vec<String>>>,
    handle: Option<thread::JoinHandle<Result<()>>>,
}

impl FakeController {
    pub(crate) fn spawn(exchanges: Vec<Exchange>) -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", 0)).context("bind fake controller")?;
        listener
            .set_nonblocking(true)
            .context("fake controller nonblocking")?;
        let port = listener.local_addr().context("local addr")?.port();
        let requests: Arc<Mutex<Vec<String>>> = Arc::default();
        let recorded = Arc::clone(&requests);
        let handle = thread::spawn(move || serve(&listener, exchanges, &recorded));
        Ok(Self {
            port,
            requests,
            handle: Some(handle),
        })
    }

    pub(crate) fn port(&self) -> u16 {
        self.port
    }

    /// Waits for every exchange to finish and returns the recorded requests.
    pub(crate) fn finish(&mut self) -> Result<Vec<String>> {
        if let Some(handle) = self.handle.take() {
            handle
                .join()
                .map_err(|_| anyhow!("fake controller thread panicked"))?
                .context("fake controller failed")?;
        }
        let requests = self
            .requests
            .lock()
            .map_err(|error| anyhow!("lock requests: {error}"))?;
        Ok(requests.clone())
    }
}

fn serve(
    listener: &TcpListener,
    exchanges: Vec<Exchange>,
    requests: &Arc<Mutex<Vec<String>>>,
) -> Result<()> {
    for exchange in exchanges {
        let Some(mut stream) = accept(listener)? else {
            return Ok(());
        };
        stream
            .set_nonblocking(false)
            .context("blocking client stream")?;
        stream
            .set_read_timeout(Some(ACCEPT_DEADLINE))
            .context("client read timeout")?;
        let request = read_request(&mut stream)?;
        requests
            .lock()
            .map_err(|error| anyhow!("lock requests: {error}"))?
            .push(request);
        match exchange {
            Exchange::Reply(bytes) => {
                stream.write_all(&bytes).context("write reply")?;
            }
            Exchange::Stream(bytes) => {
                stream.write_all(&bytes).context("write stream")?;
                wait_for_hangup(&mut stream);
            }
        }
    }
    Ok(())
}

fn accept(listener: &TcpListener) -> Result<Option<TcpStream>> {
    let deadline = Instant::now() + ACCEPT_DEADLINE;
    loop {
        match listener.accept() {
            Ok((stream, _)) => return Ok(Some(stream)),
            Err(ref error) if error.kind() == io::ErrorKind::WouldBlock => {
                if Instant::now() >= deadline {
                    return Ok(None);
                }
                thread::sleep(Duration::from_millis(5));
            }
            Err(error) => return Err(error).context("accept connection"),
        }
    }
}

fn read_request(stream: &mut TcpStream) -> Result<String> {
    let mut raw = Vec::new();
    let mut chunk = [0_u8; 256];
    loop {
        if let Some((head, body)) = split_head(&raw) {
            let expected = parse_head(head).content_length.unwrap_or(0);
            if body.len() >= expected {
                break;
            }
        }
        let count = stream.read(&mut chunk).context("read request")?;
        if count == 0 {
            break;
        }
        raw.extend_from_slice(&chunk[..count]);
    }
    String::from_utf8(raw).context("request is UTF-8")
}

fn wait_for_hangup(stream: &mut TcpStream) {
    let mut chunk = [0_u8; 64];
    while matches!(stream.read(&mut chunk), Ok(count) if count > 0) {}
}

/// A `200 OK` reply carrying `body`.
pub(crate) fn http_reply(body: &Value) -> Vec<u8> {
    http_reply_with_headers(body, "")
}

/// A `200 OK` reply carrying `body` plus extra header lines.
pub(crate) fn http_reply_with_headers(body: &Value, headers: &str) -> Vec<u8> {
    let body = body.to_string();
    format!(
        "HTTP/1.0 200 OK\r\nServer: cmon/2.0\r\n{headers}Content-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    )
    .into_bytes()
}

/// The header block that opens a subscription stream.
pub(crate) fn stream_head() -> Vec<u8> {
    b"HTTP/1.0 200 OK\r\nServer: cmon/2.0\r\nContent-Type: application/json\r\n\r\n".to_vec()
}

/// First line of a recorded request.
pub(crate) fn request_line(request: &str) -> &str {
    request.lines().next().unwrap_or_default()
}

/// JSON body of a recorded request.
pub(crate) fn request_body(request: &str) -> Value {
    let body = request
        .split_once("\r\n\r\n")
        .map(|(_, body)| body)
        .unwrap_or_default();
    serde_json::from_str(body).unwrap_or(Value::Null)
}
