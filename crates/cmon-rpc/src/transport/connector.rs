//! Dialling controller endpoints over TCP.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tracing::debug;

use super::tls::TlsTransport;
use super::{TRANSPORT_TARGET, Transport, TransportError, TransportSettings};

/// Opens transports to controller endpoints.
#[cfg_attr(test, mockall::automock)]
pub trait Connector {
    /// Connects to `host:port`, negotiating TLS when requested.
    fn open(
        &self,
        host: &str,
        port: u16,
        settings: &TransportSettings,
    ) -> Result<Box<dyn Transport>, TransportError>;
}

/// Connector that dials real sockets.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    fn open(
        &self,
        host: &str,
        port: u16,
        settings: &TransportSettings,
    ) -> Result<Box<dyn Transport>, TransportError> {
        let endpoint = format_endpoint(host, port);
        let addresses = resolve(host, port, &endpoint)?;
        let socket = connect_any(&addresses, settings, &endpoint)?;
        if settings.use_tls {
            let transport = TlsTransport::handshake(socket, host, &endpoint, settings.verify_tls)?;
            Ok(Box::new(transport))
        } else {
            Ok(Box::new(PlainTransport { socket }))
        }
    }
}

pub(super) fn format_endpoint(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

fn resolve(host: &str, port: u16, endpoint: &str) -> Result<Vec<SocketAddr>, TransportError> {
    let host_not_found = |reason: String| TransportError::HostNotFound {
        endpoint: endpoint.to_owned(),
        reason,
    };
    let addresses: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|error| host_not_found(error.to_string()))?
        .collect();
    if addresses.is_empty() {
        return Err(host_not_found(String::from("no addresses resolved")));
    }
    Ok(addresses)
}

fn connect_any(
    addresses: &[SocketAddr],
    settings: &TransportSettings,
    endpoint: &str,
) -> Result<TcpStream, TransportError> {
    let mut last_error = None;
    for address in addresses {
        debug!(target: TRANSPORT_TARGET, %address, "connecting");
        match connect_one(address, settings) {
            Ok(stream) => return Ok(stream),
            Err(error) => last_error = Some(error),
        }
    }
    let error = last_error
        .unwrap_or_else(|| io::Error::new(io::ErrorKind::AddrNotAvailable, "no addresses"));
    Err(match error.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TransportError::ConnectTimeout {
            endpoint: endpoint.to_owned(),
        },
        _ => TransportError::ConnectRefused {
            endpoint: endpoint.to_owned(),
            source: error,
        },
    })
}

fn connect_one(address: &SocketAddr, settings: &TransportSettings) -> io::Result<TcpStream> {
    let socket = Socket::new(Domain::for_address(*address), Type::STREAM, Some(Protocol::TCP))?;
    let timeout = Some(settings.timeout).filter(|timeout| !timeout.is_zero());
    socket.set_read_timeout(timeout)?;
    socket.set_write_timeout(timeout)?;
    match timeout {
        Some(timeout) => socket.connect_timeout(&SockAddr::from(*address), timeout)?,
        None => socket.connect(&SockAddr::from(*address))?,
    }
    let stream: TcpStream = socket.into();
    stream.set_nodelay(true)?;
    Ok(stream)
}

struct PlainTransport {
    socket: TcpStream,
}

impl Read for PlainTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.socket.read(buf)
    }
}

impl Write for PlainTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.socket.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.socket.flush()
    }
}

impl Transport for PlainTransport {
    fn is_tls(&self) -> bool {
        false
    }

    fn shutdown(&mut self) {
        let _ = self.socket.shutdown(Shutdown::Both);
    }
}
