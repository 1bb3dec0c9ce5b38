//! Shared harness for CLI behaviour tests.

use std::cell::RefCell;
use std::ffi::OsString;
use std::io::{self, Read, Write};
use std::net::TcpListener;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use std::thread;

use anyhow::{Context, Result, anyhow};
use camino::Utf8PathBuf;
use cmon_config::Config;
use rstest::fixture;
use serde_json::{Value, json};
use tempfile::TempDir;

use crate::{AppError, ConfigLoader, IoStreams};

pub(super) struct StaticConfigLoader {
    config: Config,
}

impl ConfigLoader for StaticConfigLoader {
    fn load(&self, _args: &[OsString]) -> Result<Config, AppError> {
        Ok(self.config.clone())
    }
}

/// Accepts one connection, records the request, and answers with `body`.
pub(super) struct FakeController {
    pub(super) port: u16,
    requests: Arc<Mutex<Vec<String>>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl FakeController {
    pub(super) fn spawn(body: Value) -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", 0)).context("bind fake controller")?;
        let port = listener.local_addr().context("local addr")?.port();
        let requests: Arc<Mutex<Vec<String>>> = Arc::default();
        let recorded = Arc::clone(&requests);
        let handle = thread::spawn(move || {
            let Ok((mut stream, _)) = listener.accept() else {
                return;
            };
            if let Ok(request) = read_request(&mut stream)
                && !request.is_empty()
            {
                recorded.lock().expect("lock requests").push(request);
            }
            let body = body.to_string();
            let reply = format!(
                "HTTP/1.0 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
                body.len()
            );
            let _ = stream.write_all(reply.as_bytes());
        });
        Ok(Self {
            port,
            requests,
            handle: Some(handle),
        })
    }

    pub(super) fn take_requests(&mut self) -> Result<Vec<String>> {
        if let Some(handle) = self.handle.take() {
            handle
                .join()
                .map_err(|_| anyhow!("fake controller panicked"))?;
        }
        let requests = self
            .requests
            .lock()
            .map_err(|error| anyhow!("lock requests: {error}"))?;
        Ok(requests.clone())
    }
}

fn read_request(stream: &mut impl Read) -> io::Result<String> {
    let mut raw = Vec::new();
    let mut chunk = [0_u8; 256];
    loop {
        let text = String::from_utf8_lossy(&raw);
        if let Some((head, body)) = text.split_once("\r\n\r\n") {
            let expected = head
                .lines()
                .find_map(|line| line.strip_prefix("Content-Length: "))
                .and_then(|value| value.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if body.len() >= expected {
                return Ok(text.into_owned());
            }
        }
        let count = stream.read(&mut chunk)?;
        if count == 0 {
            return Ok(text.into_owned());
        }
        raw.extend_from_slice(&chunk[..count]);
    }
}

#[derive(Default)]
pub(super) struct TestWorld {
    pub(super) config: Config,
    pub(super) state_dir: Option<TempDir>,
    pub(super) controller: Option<FakeController>,
    pub(super) stdout: Vec<u8>,
    pub(super) stderr: Vec<u8>,
    pub(super) exit_code: Option<ExitCode>,
    pub(super) requests: Vec<String>,
}

impl TestWorld {
    fn configure(&mut self, port: u16) -> Result<()> {
        let state_dir = TempDir::new().context("state directory")?;
        self.config.controller = Some(format!("http://127.0.0.1:{port}"));
        self.config.connect_timeout = Some(2);
        let state_file = Utf8PathBuf::from_path_buf(state_dir.path().join("cmon.state"))
            .map_err(|path| anyhow!("non UTF-8 state path {}", path.display()))?;
        self.config.state_file = Some(state_file);
        self.config.log_filter = Some(String::from("off"));
        self.state_dir = Some(state_dir);
        Ok(())
    }

    pub(super) fn start_controller(&mut self, status: &str) -> Result<()> {
        let controller = FakeController::spawn(json!({"requestStatus": status, "total": 0}))?;
        self.configure(controller.port)?;
        self.controller = Some(controller);
        Ok(())
    }

    pub(super) fn without_controller(&mut self) -> Result<()> {
        let probe = TcpListener::bind(("127.0.0.1", 0)).context("bind probe")?;
        let port = probe.local_addr().context("probe addr")?.port();
        drop(probe);
        self.configure(port)
    }

    pub(super) fn run(&mut self, command: &str) {
        self.stdout.clear();
        self.stderr.clear();
        let mut args = vec![OsString::from("cmonctl")];
        args.extend(command.split_whitespace().map(OsString::from));
        let loader = StaticConfigLoader {
            config: self.config.clone(),
        };
        let mut stdin = io::empty();
        let mut io = IoStreams::new(&mut stdin, &mut self.stdout, &mut self.stderr);
        self.exit_code = Some(crate::run_with_loader(args, &mut io, &loader));
        if let Some(controller) = self.controller.as_mut() {
            // Unblocks a controller that was never contacted.
            let _ = std::net::TcpStream::connect(("127.0.0.1", controller.port));
            self.requests = controller.take_requests().unwrap_or_default();
        }
    }

    pub(super) fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub(super) fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

#[fixture]
pub(super) fn world() -> RefCell<TestWorld> {
    RefCell::new(TestWorld::default())
}
