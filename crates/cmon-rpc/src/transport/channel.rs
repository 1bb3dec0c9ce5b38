//! Single-socket channel with interrupt and timeout handling.

use std::fmt;
use std::io::{self, Read, Write};

use tracing::debug;

use super::connector::format_endpoint;
use super::{Connector, TRANSPORT_TARGET, Transport, TransportError, TransportSettings};

/// Interrupted TLS reads retried before giving up.
pub(crate) const TLS_READ_RETRIES: u32 = 10;
/// Interrupted plain reads retried before giving up.
pub(crate) const PLAIN_READ_RETRIES: u32 = 100;

/// Lifecycle of a [`Channel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// No socket is open.
    Disconnected,
    /// A connect attempt is in progress.
    Connecting,
    /// A socket is open and usable.
    Connected,
}

/// Owns at most one open transport to a controller.
pub struct Channel {
    transport: Option<Box<dyn Transport>>,
    state: ChannelState,
    endpoint: Option<String>,
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("state", &self.state)
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl Default for Channel {
    fn default() -> Self {
        Self::new()
    }
}

impl Channel {
    /// Creates a disconnected channel.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            transport: None,
            state: ChannelState::Disconnected,
            endpoint: None,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Whether a socket is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state == ChannelState::Connected
    }

    /// The connected endpoint as `host:port`.
    #[must_use]
    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    /// Opens a socket to `host:port`, closing any previous one first.
    pub fn connect<C>(
        &mut self,
        connector: &C,
        host: &str,
        port: u16,
        settings: &TransportSettings,
    ) -> Result<(), TransportError>
    where
        C: Connector + ?Sized,
    {
        self.close();
        self.state = ChannelState::Connecting;
        match connector.open(host, port, settings) {
            Ok(transport) => {
                debug!(
                    target: TRANSPORT_TARGET,
                    host,
                    port,
                    tls = transport.is_tls(),
                    "channel connected"
                );
                self.transport = Some(transport);
                self.endpoint = Some(format_endpoint(host, port));
                self.state = ChannelState::Connected;
                Ok(())
            }
            Err(error) => {
                self.state = ChannelState::Disconnected;
                Err(error)
            }
        }
    }

    /// Writes every byte of `bytes`, restarting interrupted writes.
    pub fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let endpoint = self.endpoint_label();
        let transport = self.transport.as_mut().ok_or(TransportError::NotConnected)?;
        let mut written = 0;
        while written < bytes.len() {
            let remaining = bytes.get(written..).unwrap_or_default();
            match transport.write(remaining) {
                Ok(0) => {
                    return Err(TransportError::Write {
                        endpoint,
                        source: io::Error::from(io::ErrorKind::WriteZero),
                    });
                }
                Ok(count) => written += count,
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(source) => return Err(TransportError::Write { endpoint, source }),
            }
        }
        transport
            .flush()
            .map_err(|source| TransportError::Write { endpoint, source })
    }

    /// Reads into `buf`, returning `Ok(0)` when the peer closed the stream.
    ///
    /// Interrupted reads are restarted a bounded number of times. A read that
    /// hits the socket timeout reports [`TransportError::ReadTimeout`].
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let endpoint = self.endpoint_label();
        let transport = self.transport.as_mut().ok_or(TransportError::NotConnected)?;
        let retries = if transport.is_tls() {
            TLS_READ_RETRIES
        } else {
            PLAIN_READ_RETRIES
        };
        let mut attempts = 0;
        loop {
            match transport.read(buf) {
                Ok(count) => return Ok(count),
                Err(error) if error.kind() == io::ErrorKind::Interrupted && attempts < retries => {
                    attempts += 1;
                }
                Err(error)
                    if matches!(
                        error.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                    ) =>
                {
                    return Err(TransportError::ReadTimeout { endpoint });
                }
                Err(source) => return Err(TransportError::Read { endpoint, source }),
            }
        }
    }

    /// Shuts the transport down. Safe to call when already disconnected.
    pub fn close(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            debug!(target: TRANSPORT_TARGET, endpoint = ?self.endpoint, "closing channel");
            transport.shutdown();
        }
        self.endpoint = None;
        self.state = ChannelState::Disconnected;
    }

    fn endpoint_label(&self) -> String {
        self.endpoint.clone().unwrap_or_default()
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.close();
    }
}
